use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inferplan_core::config::PlanConfig;

fn test_config(strategy: &str, nodes: u32) -> PlanConfig {
    let mut toml = format!(
        r#"
[model]
preset = "llama-7b"

[search]
strategy = "{}"
seed = 42
max_evaluations = 200
engines = ["vllm"]
"#,
        strategy
    );
    for i in 0..nodes {
        toml.push_str(&format!(
            r#"
[[cluster.nodes]]
name = "node-{}"

[[cluster.nodes.devices]]
profile = "h100"
count = 8
"#,
            i
        ));
    }
    PlanConfig::from_str(&toml).unwrap()
}

fn bench_direct_search(c: &mut Criterion) {
    let config = test_config("direct", 2);

    c.bench_function("direct_search_2_nodes", |b| {
        b.iter(|| inferplan_core::run_optimization(black_box(&config)).unwrap())
    });
}

fn bench_evolution_search(c: &mut Criterion) {
    let config = test_config("evolution", 2);

    c.bench_function("evolution_search_2_nodes", |b| {
        b.iter(|| inferplan_core::run_optimization(black_box(&config)).unwrap())
    });
}

fn bench_plan_assembly(c: &mut Criterion) {
    let config = test_config("direct", 8);
    let exclusions = inferplan_core::PlanExclusions::default();

    c.bench_function("plan_8_nodes_target_512", |b| {
        b.iter(|| {
            inferplan_core::plan_deployment(black_box(&config), 512, "optimal", &exclusions)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_direct_search,
    bench_evolution_search,
    bench_plan_assembly
);
criterion_main!(benches);
