/// Integration tests for the end-to-end optimization run.
use inferplan_core::config::PlanConfig;
use inferplan_core::error::SearchError;

fn production_config() -> PlanConfig {
    PlanConfig::from_str(
        r#"
[model]
preset = "llama-7b"
precision = "bf16"

[workload]
input_tokens = 1024
output_tokens = 256

[targets]
ttft_ms = 2000
throughput_per_user = 10
e2e_latency_s = 60
error_threshold = 0.1
max_concurrency = 128

[search]
strategy = "direct"
seed = 42
max_evaluations = 200
engines = ["vllm", "sglang"]

[[cluster.nodes]]
name = "node-a"

[[cluster.nodes.devices]]
profile = "h100"
count = 8

[[cluster.nodes]]
name = "node-b"

[[cluster.nodes.devices]]
profile = "h100"
count = 8

[[cluster.nodes.devices]]
profile = "l40s"
count = 4
"#,
    )
    .unwrap()
}

#[test]
fn test_full_optimization_direct() {
    let config = production_config();
    let report = inferplan_core::run_optimization(&config).unwrap();

    // h100 serves vllm and sglang, l40s the same: at least three pairs
    // should survive (sglang is cuda-only but both types are cuda).
    assert!(report.results.len() >= 3);
    assert!(report.total_evaluations > 0);
    let best = report.best().expect("a 7B model must fit somewhere");
    let record = best.best_record.as_ref().unwrap();
    assert!(record.cost_per_million_tokens > 0.0);
    assert!(record.throughput_per_user > 0.0);
    assert!(record.total_memory_gb < 80.0);
}

#[test]
fn test_full_optimization_evolution_is_seeded() {
    let mut config = production_config();
    config.search.strategy = "evolution".to_string();

    let first = inferplan_core::run_optimization(&config).unwrap();
    let second = inferplan_core::run_optimization(&config).unwrap();
    assert_eq!(first.total_evaluations, second.total_evaluations);

    let best_key = |r: &inferplan_core::orchestrator::OptimizationReport| {
        r.best().and_then(|p| p.best_record.as_ref()).map(|rec| {
            (
                rec.config.device_type.clone(),
                rec.config.tensor_parallel,
                rec.config.pipeline_parallel,
                rec.config.concurrency,
            )
        })
    };
    assert_eq!(best_key(&first), best_key(&second));
}

#[test]
fn test_oversized_model_forces_sharding() {
    let mut config = production_config();
    config.model.preset = Some("llama-70b".to_string());
    let report = inferplan_core::run_optimization(&config).unwrap();

    // 138 GB of bf16 weights: tp >= 2 on 80 GB devices, tp = 4 on 48 GB.
    for result in &report.results {
        if let Some(record) = &result.best_record {
            assert!(record.config.tensor_parallel >= 2);
            if result.device_type == "l40s" {
                assert_eq!(record.config.tensor_parallel, 4);
            }
        }
    }
}

#[test]
fn test_shared_mode_single_device_replicas() {
    let mut config = production_config();
    config.search.hardware_mode = inferplan_core::HardwareMode::Shared;
    let report = inferplan_core::run_optimization(&config).unwrap();

    for result in &report.results {
        if let Some(record) = &result.best_record {
            assert_eq!(record.config.tensor_parallel, 1);
            assert_eq!(record.config.pipeline_parallel, 1);
        }
    }
}

#[test]
fn test_evaluation_ceiling_respected() {
    let mut config = production_config();
    config.search.max_evaluations = 10;
    let report = inferplan_core::run_optimization(&config).unwrap();
    for result in &report.results {
        assert!(result.evaluations <= 10);
    }
}

#[test]
fn test_incompatible_cluster_is_fatal() {
    let mut config = production_config();
    // Gaudi2 with sglang only: no engine can drive the device.
    config.search.engines = vec!["sglang".to_string()];
    for node in &mut config.cluster.nodes {
        for device in &mut node.devices {
            device.profile = Some("gaudi2".to_string());
            device.name = None;
        }
    }
    let err = inferplan_core::run_optimization(&config).unwrap_err();
    assert!(matches!(err, SearchError::NoCompatibleEngine));
    assert!(!err.is_recoverable());
}

#[test]
fn test_quantization_lowers_cost() {
    let config = production_config();
    let bf16 = inferplan_core::run_optimization(&config).unwrap();

    let mut quant_config = production_config();
    quant_config.model.precision = inferplan_core::Precision::Int4;
    let int4 = inferplan_core::run_optimization(&quant_config).unwrap();

    let best_cost = |r: &inferplan_core::orchestrator::OptimizationReport| {
        r.best()
            .and_then(|p| p.best_record.as_ref())
            .map(|rec| rec.cost_per_million_tokens)
            .unwrap()
    };
    assert!(best_cost(&int4) <= best_cost(&bf16));
}
