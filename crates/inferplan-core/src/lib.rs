//! inferplan — Pick the cheapest serving configuration for a model on a
//! heterogeneous cluster, without touching a GPU.
//!
//! The core crate models the domain: cluster topology, transformer
//! architecture analysis, memory feasibility, performance prediction, and
//! cost. Search strategies and plan assemblers from `inferplan-search` are
//! plugged in to explore the configuration space and pack the winners into
//! a deployment plan.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Config  │────▶│ Orchestrator │────▶│    Report    │
//! │  (TOML)  │     │   (rayon)    │     │   Ranking    │
//! └──────────┘     └──────┬───────┘     └──────────────┘
//!                         │ per (device type, engine)
//!                 ┌───────┴───────┐
//!                 │   Strategy    │
//!                 │ (direct / GA) │
//!                 └───────┬───────┘
//!                         │ candidates
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!    ┌──────────┐   ┌──────────┐   ┌──────────┐
//!    │  Memory  │   │ Predictor│   │   Cost   │
//!    │   gate   │   │(roofline/│   │ (amort.) │
//!    │          │   │   regr.) │   │          │
//!    └──────────┘   └──────────┘   └──────────┘
//! ```

pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod predict;
pub mod report;
pub mod space;
pub mod topology;

// Re-export key types for convenience.
pub use config::{ConfigError, PlanConfig};
pub use engine::{EngineConfig, EngineKind};
pub use error::SearchError;
pub use evaluate::{EvaluationRecord, Evaluator, SearchTargets, WorkloadShape};
pub use memory::{MemoryCheck, MemoryRequest, MemoryValidator};
pub use model::{analyze_model, ModelAnalysis, ModelSpec, Precision};
pub use orchestrator::{
    assemble_plan, optimize, OptimizationReport, OptimizeRequest, PlanExclusions,
};
pub use plan::{DeploymentPlan, DeviceAllocation};
pub use predict::{HeuristicPredictor, PerformancePredictor, Prediction, RegressionPredictor};
pub use space::SearchSpace;
pub use topology::{ClusterTopology, DeviceSpec, DeviceTypeGroup, HardwareMode, NodeTopology};

/// Run a complete optimization from a parsed configuration.
pub fn run_optimization(config: &PlanConfig) -> Result<OptimizationReport, SearchError> {
    let cluster = config.cluster_topology()?;
    let request = config.optimize_request()?;
    optimize(&cluster, &request)
}

/// Run the optimization and pack the winners into a deployment plan for an
/// aggregate concurrency target.
pub fn plan_deployment(
    config: &PlanConfig,
    target_concurrency: u64,
    planner: &str,
    exclusions: &PlanExclusions,
) -> Result<(OptimizationReport, DeploymentPlan), SearchError> {
    let cluster = config.cluster_topology()?;
    let request = config.optimize_request()?;
    let report = optimize(&cluster, &request)?;
    let plan = assemble_plan(&report, &cluster, target_concurrency, planner, exclusions)?;
    Ok((report, plan))
}
