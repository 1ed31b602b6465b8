/// Integration tests for cluster plan assembly on top of a real search.
use inferplan_core::config::PlanConfig;
use inferplan_core::error::SearchError;
use inferplan_core::PlanExclusions;

fn mixed_cluster_config() -> PlanConfig {
    PlanConfig::from_str(
        r#"
[model]
preset = "llama-7b"

[targets]
max_concurrency = 64

[search]
strategy = "direct"
engines = ["vllm"]

[[cluster.nodes]]
name = "node-a"

[[cluster.nodes.devices]]
profile = "h100"
count = 8

[[cluster.nodes]]
name = "node-b"

[[cluster.nodes.devices]]
profile = "a100"
count = 8

[[cluster.nodes]]
name = "node-c"

[[cluster.nodes.devices]]
profile = "l40s"
count = 4
"#,
    )
    .unwrap()
}

#[test]
fn test_plan_reaches_target_on_mixed_cluster() {
    let config = mixed_cluster_config();
    let exclusions = PlanExclusions::default();
    let (report, plan) =
        inferplan_core::plan_deployment(&config, 100, "greedy", &exclusions).unwrap();

    assert!(report.best().is_some());
    assert!(plan.total_concurrency >= 100);
    assert!(plan.total_cost_per_hour > 0.0);
    assert!(plan.blended_cost_per_million_tokens > 0.0);
    // Every allocation names a node from the inventory.
    for alloc in &plan.allocations {
        for node in &alloc.nodes {
            assert!(["node-a", "node-b", "node-c"].contains(&node.as_str()));
        }
    }
}

#[test]
fn test_optimal_plan_never_costs_more_than_greedy() {
    let config = mixed_cluster_config();
    let exclusions = PlanExclusions::default();
    for target in [32u64, 100, 300, 600] {
        let greedy = inferplan_core::plan_deployment(&config, target, "greedy", &exclusions);
        let optimal = inferplan_core::plan_deployment(&config, target, "optimal", &exclusions);
        match (greedy, optimal) {
            (Ok((_, g)), Ok((_, o))) => {
                assert!(o.total_cost_per_hour <= g.total_cost_per_hour + 1e-9);
                assert!(o.total_concurrency >= target);
            }
            (Err(_), Err(_)) => {}
            (g, o) => panic!(
                "planners disagree at target {}: greedy ok={} optimal ok={}",
                target,
                g.is_ok(),
                o.is_ok()
            ),
        }
    }
}

#[test]
fn test_unreachable_target_fails_closed() {
    let config = mixed_cluster_config();
    let exclusions = PlanExclusions::default();
    let err = inferplan_core::plan_deployment(&config, 1_000_000, "optimal", &exclusions)
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::PlanAssemblyFailed { target: 1_000_000 }
    ));
    assert!(err.is_recoverable());
}

#[test]
fn test_exclusion_removes_device_type() {
    let config = mixed_cluster_config();
    let mut exclusions = PlanExclusions::default();
    exclusions.ban_device_type("h100");
    let (_, plan) = inferplan_core::plan_deployment(&config, 64, "greedy", &exclusions).unwrap();
    assert!(plan.allocations.iter().all(|a| a.device_type != "h100"));
}

#[test]
fn test_ragged_node_counts_reach_target() {
    // Six H100s split 3+3 across two nodes host only two tp=2 replicas;
    // the third slice of the target must come from the spare large-memory
    // device instead of the plan failing on unplaceable replicas.
    let config = PlanConfig::from_str(
        r#"
[model]
preset = "llama-70b"

[targets]
max_concurrency = 8

[search]
strategy = "direct"
engines = ["vllm"]

[[cluster.nodes]]
name = "node-a"

[[cluster.nodes.devices]]
profile = "h100"
count = 3

[[cluster.nodes]]
name = "node-b"

[[cluster.nodes.devices]]
profile = "h100"
count = 3

[[cluster.nodes]]
name = "node-c"

[[cluster.nodes.devices]]
name = "bigmem"
count = 1
memory_gb = 200
hbm_bandwidth_gb_s = 4000
peak_tflops = 900
purchase_price_usd = 80000
"#,
    )
    .unwrap();
    let exclusions = PlanExclusions::default();
    let (_, plan) =
        inferplan_core::plan_deployment(&config, 24, "optimal", &exclusions).unwrap();
    assert!(plan.total_concurrency >= 24);
    let h100_replicas = plan
        .allocations
        .iter()
        .filter(|a| a.device_type == "h100")
        .count();
    assert!(h100_replicas <= 2, "oversold h100: {}", h100_replicas);
    assert!(plan
        .allocations
        .iter()
        .any(|a| a.device_type == "bigmem"));
}

#[test]
fn test_banned_winner_is_not_redeployed() {
    let config = mixed_cluster_config();
    let cluster = config.cluster_topology().unwrap();
    let report = inferplan_core::run_optimization(&config).unwrap();
    let winner = report.best().unwrap().best_record.clone().unwrap();

    let mut exclusions = PlanExclusions::default();
    exclusions.ban_config(&winner.config);
    let plan =
        inferplan_core::assemble_plan(&report, &cluster, 64, "greedy", &exclusions).unwrap();
    for alloc in &plan.allocations {
        let same_config = alloc.device_type == winner.config.device_type
            && alloc.tensor_parallel == winner.config.tensor_parallel
            && alloc.pipeline_parallel == winner.config.pipeline_parallel
            && alloc.concurrency == winner.config.concurrency;
        assert!(!same_config, "banned config reappeared in the plan");
    }
}

#[test]
fn test_plan_serializes_to_json() {
    let config = mixed_cluster_config();
    let exclusions = PlanExclusions::default();
    let (_, plan) = inferplan_core::plan_deployment(&config, 64, "optimal", &exclusions).unwrap();
    let json = serde_json::to_string_pretty(&plan).unwrap();
    assert!(json.contains("allocations"));
    assert!(json.contains("engine_args"));
}
