//! Deployment-plan materialization.
//!
//! The planners in the search crate decide *how many* replicas of each
//! winning configuration to run; this module decides *where*. Replicas
//! are placed onto concrete nodes from the cluster inventory, tensor
//! groups never straddle a node, and pipeline stages claim one node per
//! stage. The result is a [`DeploymentPlan`] with launchable engine
//! arguments per replica.

use crate::cost::device_cost_per_hour;
use crate::error::SearchError;
use crate::evaluate::EvaluationRecord;
use crate::topology::DeviceTypeGroup;
use inferplan_search::{PlanCandidate, PlanSelection};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A winning per-(device type, engine) configuration offered to the
/// planners, paired with the inventory it draws from.
#[derive(Debug, Clone)]
pub struct PlanOption {
    pub record: EvaluationRecord,
    pub group: DeviceTypeGroup,
}

impl PlanOption {
    /// Project this option into the planner-facing candidate shape.
    pub fn to_candidate(&self) -> PlanCandidate {
        let config = &self.record.config;
        let devices = config.tensor_parallel * config.pipeline_parallel;
        PlanCandidate {
            device_type: config.device_type.clone(),
            engine: config.engine.name().to_string(),
            max_replicas: placeable_replicas(
                &self.group.node_distribution,
                config.tensor_parallel,
                config.pipeline_parallel,
            ),
            concurrency_per_replica: config.concurrency,
            cost_per_replica: device_cost_per_hour(&self.group.device) * devices as f64,
            cost_per_million_tokens: self.record.cost_per_million_tokens,
        }
    }
}

/// How many replicas the node inventory can host, by running the same
/// claiming rule `materialize_plan` uses. The cluster-wide device total is
/// not the right capacity: each stage needs `tp` free units on one node,
/// so a 3+3 split fits two tp=2 replicas, not three.
fn placeable_replicas(node_distribution: &[(String, u32)], tp: u32, pp: u32) -> u32 {
    if tp == 0 || pp == 0 {
        return 0;
    }
    let mut nodes = node_distribution.to_vec();
    let mut replicas = 0;
    while claim_stages(&mut nodes, tp, pp).is_some() {
        replicas += 1;
    }
    replicas
}

/// One replica placed on concrete hardware.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAllocation {
    pub device_type: String,
    pub engine: String,
    /// One node per pipeline stage; a single entry when `pipeline_parallel`
    /// is 1.
    pub nodes: Vec<String>,
    pub tensor_parallel: u32,
    pub pipeline_parallel: u32,
    pub concurrency: u32,
    pub engine_args: Vec<String>,
    pub engine_envs: Vec<(String, String)>,
    pub cost_per_hour: f64,
}

/// The assembled and placed deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub allocations: Vec<DeviceAllocation>,
    pub total_replicas: u32,
    pub total_concurrency: u64,
    pub total_cost_per_hour: f64,
    /// Concurrency-weighted mean over the selected configurations.
    pub blended_cost_per_million_tokens: f64,
    pub mean_ttft_ms: f64,
    pub mean_e2e_latency_s: f64,
}

/// Place every replica of a selection onto nodes. Fails with
/// [`SearchError::PlanAssemblyFailed`] only if the inventory cannot host
/// the selection, which indicates the caller offered stale options.
pub fn materialize_plan(
    selection: &PlanSelection,
    options: &[PlanOption],
    target_concurrency: u64,
) -> Result<DeploymentPlan, SearchError> {
    // Per-device-type remaining units by node, consumed as replicas land.
    let mut remaining: HashMap<&str, Vec<(String, u32)>> = HashMap::new();
    for option in options {
        remaining
            .entry(option.record.config.device_type.as_str())
            .or_insert_with(|| option.group.node_distribution.clone());
    }

    let mut allocations = Vec::new();
    let mut total_replicas = 0u32;
    let mut weighted_cost = 0.0;
    let mut weighted_ttft = 0.0;
    let mut weighted_e2e = 0.0;

    for pick in &selection.picks {
        let option = options
            .get(pick.candidate)
            .ok_or(SearchError::PlanAssemblyFailed {
                target: target_concurrency,
            })?;
        let config = &option.record.config;
        let tp = config.tensor_parallel;
        let pp = config.pipeline_parallel;
        let per_device_cost = device_cost_per_hour(&option.group.device);
        let nodes = remaining
            .get_mut(config.device_type.as_str())
            .ok_or(SearchError::PlanAssemblyFailed {
                target: target_concurrency,
            })?;

        for _ in 0..pick.replicas {
            let stage_nodes = claim_stages(nodes, tp, pp).ok_or(
                SearchError::PlanAssemblyFailed {
                    target: target_concurrency,
                },
            )?;
            let weight = config.concurrency as f64;
            weighted_cost += option.record.cost_per_million_tokens * weight;
            weighted_ttft += option.record.ttft_ms * weight;
            weighted_e2e += option.record.e2e_latency_s * weight;
            allocations.push(DeviceAllocation {
                device_type: config.device_type.clone(),
                engine: config.engine.name().to_string(),
                nodes: stage_nodes,
                tensor_parallel: tp,
                pipeline_parallel: pp,
                concurrency: config.concurrency,
                engine_args: config.to_args(),
                engine_envs: config.to_envs(),
                cost_per_hour: per_device_cost * (tp * pp) as f64,
            });
            total_replicas += 1;
        }
    }

    let total_concurrency: u64 = allocations.iter().map(|a| a.concurrency as u64).sum();
    debug!(
        replicas = total_replicas,
        concurrency = total_concurrency,
        cost_per_hour = selection.total_cost_per_hour,
        "materialized deployment plan"
    );

    Ok(DeploymentPlan {
        allocations,
        total_replicas,
        total_concurrency,
        total_cost_per_hour: selection.total_cost_per_hour,
        blended_cost_per_million_tokens: weighted_mean(weighted_cost, total_concurrency),
        mean_ttft_ms: weighted_mean(weighted_ttft, total_concurrency),
        mean_e2e_latency_s: weighted_mean(weighted_e2e, total_concurrency),
    })
}

fn weighted_mean(sum: f64, total_weight: u64) -> f64 {
    if total_weight == 0 {
        0.0
    } else {
        sum / total_weight as f64
    }
}

/// Claim `tp` devices on each of `pp` distinct nodes. Tensor groups never
/// span nodes, so a node must have `tp` units free to host a stage.
fn claim_stages(nodes: &mut [(String, u32)], tp: u32, pp: u32) -> Option<Vec<String>> {
    let mut chosen = Vec::with_capacity(pp as usize);
    for (name, count) in nodes.iter() {
        if chosen.len() == pp as usize {
            break;
        }
        if *count >= tp {
            chosen.push(name.clone());
        }
    }
    if chosen.len() < pp as usize {
        return None;
    }
    for (name, count) in nodes.iter_mut() {
        if chosen.contains(name) {
            *count -= tp;
        }
    }
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineKind};
    use crate::memory::MemoryBreakdown;
    use crate::model::Precision;
    use crate::topology::tests::two_node_cluster;
    use crate::topology::{AcceleratorProfile, ClusterTopology, DeviceSpec, NodeTopology};
    use inferplan_search::{GreedyPlanner, OptimalPlanner, PlanAssembler};

    fn record(device_type: &str, tp: u32, pp: u32, concurrency: u32) -> EvaluationRecord {
        EvaluationRecord {
            config: EngineConfig {
                engine: EngineKind::Vllm,
                device_type: device_type.to_string(),
                model_name: "llama-7b".to_string(),
                tensor_parallel: tp,
                pipeline_parallel: pp,
                concurrency,
                precision: Precision::Bf16,
                block_size: 16,
                scheduler_delay_factor: 0.0,
                enable_chunked_prefill: false,
            },
            ttft_ms: 400.0,
            throughput_per_user: 25.0,
            e2e_latency_s: 11.0,
            cost_per_million_tokens: 0.8,
            penalty: 0.0,
            meets_targets: true,
            memory: MemoryBreakdown {
                weights_gb: 13.5,
                kv_cache_gb: 4.0,
                activations_gb: 0.1,
            },
            total_memory_gb: 17.6,
        }
    }

    fn options(cluster: &ClusterTopology, specs: &[(&str, u32, u32, u32)]) -> Vec<PlanOption> {
        specs
            .iter()
            .map(|&(device_type, tp, pp, conc)| PlanOption {
                record: record(device_type, tp, pp, conc),
                group: cluster.group(device_type).unwrap().clone(),
            })
            .collect()
    }

    fn assemble(options: &[PlanOption], target: u64) -> DeploymentPlan {
        let candidates: Vec<_> = options.iter().map(PlanOption::to_candidate).collect();
        let selection = GreedyPlanner::new().assemble(&candidates, target).unwrap();
        materialize_plan(&selection, options, target).unwrap()
    }

    #[test]
    fn test_replicas_land_on_real_nodes() {
        let cluster = two_node_cluster();
        let opts = options(&cluster, &[("h100", 2, 1, 32)]);
        let plan = assemble(&opts, 120);
        // 4 replicas of tp=2 across 16 H100s on two nodes.
        assert_eq!(plan.total_replicas, 4);
        assert!(plan.total_concurrency >= 120);
        for alloc in &plan.allocations {
            assert_eq!(alloc.nodes.len(), 1);
            assert!(alloc.engine_args.contains(&"--tensor-parallel-size".to_string()));
        }
    }

    #[test]
    fn test_pipeline_replica_spans_nodes() {
        let cluster = two_node_cluster();
        let opts = options(&cluster, &[("h100", 4, 2, 64)]);
        let plan = assemble(&opts, 64);
        assert_eq!(plan.total_replicas, 1);
        let alloc = &plan.allocations[0];
        assert_eq!(alloc.nodes.len(), 2);
        assert_ne!(alloc.nodes[0], alloc.nodes[1]);
    }

    #[test]
    fn test_blended_cost_is_concurrency_weighted() {
        let cluster = two_node_cluster();
        let mut opts = options(&cluster, &[("h100", 1, 1, 60), ("l40s", 1, 1, 20)]);
        opts[0].record.cost_per_million_tokens = 1.0;
        opts[1].record.cost_per_million_tokens = 4.0;
        let selection = PlanSelection {
            picks: vec![
                inferplan_search::PlanPick {
                    candidate: 0,
                    replicas: 1,
                },
                inferplan_search::PlanPick {
                    candidate: 1,
                    replicas: 1,
                },
            ],
            total_concurrency: 80,
            total_cost_per_hour: 1.0,
        };
        let plan = materialize_plan(&selection, &opts, 80).unwrap();
        // 60 units at 1.0 plus 20 units at 4.0 blends to 1.75.
        assert!((plan.blended_cost_per_million_tokens - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_counts_per_node_groups() {
        // Six devices split 3+3: a third tp=2 replica has no node with two
        // free units, even though two spare devices exist cluster-wide.
        let nodes = vec![("node-a".to_string(), 3), ("node-b".to_string(), 3)];
        assert_eq!(placeable_replicas(&nodes, 2, 1), 2);
        assert_eq!(placeable_replicas(&nodes, 3, 1), 2);
        assert_eq!(placeable_replicas(&nodes, 2, 2), 1);
        assert_eq!(placeable_replicas(&nodes, 4, 1), 0);
    }

    #[test]
    fn test_ragged_inventory_falls_back_to_second_type() {
        // Two 3-device nodes host only two tp=2 replicas; reaching the
        // target takes a third replica from the spare single-device node
        // rather than overselling the first type.
        let h100 = DeviceSpec::from_profile("h100", &AcceleratorProfile::H100Sxm, 3);
        let big = DeviceSpec::from_profile(
            "bigmem",
            &AcceleratorProfile::Custom {
                memory_gb: 200.0,
                hbm_bandwidth_gb_s: 4000.0,
                peak_tflops: 900.0,
                purchase_price_usd: 80_000.0,
            },
            1,
        );
        let cluster = ClusterTopology::from_nodes(vec![
            NodeTopology {
                node: "node-a".to_string(),
                devices: vec![h100.clone()],
            },
            NodeTopology {
                node: "node-b".to_string(),
                devices: vec![h100],
            },
            NodeTopology {
                node: "node-c".to_string(),
                devices: vec![big],
            },
        ]);
        let opts = options(&cluster, &[("h100", 2, 1, 8), ("bigmem", 1, 1, 8)]);
        let candidates: Vec<_> = opts.iter().map(PlanOption::to_candidate).collect();
        assert_eq!(candidates[0].max_replicas, 2);

        for planner in [
            Box::new(GreedyPlanner::new()) as Box<dyn PlanAssembler>,
            Box::new(OptimalPlanner::new()),
        ] {
            let selection = planner.assemble(&candidates, 24).unwrap();
            let plan = materialize_plan(&selection, &opts, 24).unwrap();
            assert!(plan.total_concurrency >= 24);
            let h100_replicas = plan
                .allocations
                .iter()
                .filter(|a| a.device_type == "h100")
                .count();
            assert!(h100_replicas <= 2, "oversold h100: {}", h100_replicas);
        }
    }

    #[test]
    fn test_stale_inventory_fails_closed() {
        let cluster = two_node_cluster();
        let opts = options(&cluster, &[("h100", 8, 2, 32)]);
        // A pp=2 replica needs 8 free devices on each of two nodes; claim
        // them twice and the second replica cannot be placed.
        let selection = PlanSelection {
            picks: vec![inferplan_search::PlanPick {
                candidate: 0,
                replicas: 2,
            }],
            total_concurrency: 64,
            total_cost_per_hour: 10.0,
        };
        let err = materialize_plan(&selection, &opts, 64).unwrap_err();
        assert!(matches!(err, SearchError::PlanAssemblyFailed { target: 64 }));
    }
}
