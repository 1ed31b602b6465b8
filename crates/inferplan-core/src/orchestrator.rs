//! Optimization orchestration.
//!
//! One run fans out over every (device type, engine) pair the cluster and
//! engine list produce, runs the configured search strategy against each
//! pair's feasible space in parallel, and ranks the per-pair winners by
//! cost. A second entry point packs the winners into a deployment plan
//! for an aggregate concurrency target.
//!
//! ```text
//!            cluster x engines
//!                   |
//!       compatibility + memory probe        (skip: incompatible,
//!                   |                        warn: model too large)
//!          search per pair (rayon)
//!                   |
//!            rank by cost  ->  OptimizationReport
//!                   |
//!        plan assembly (greedy/optimal)  ->  DeploymentPlan
//! ```

use crate::engine::{EngineConfig, EngineKind};
use crate::error::SearchError;
use crate::evaluate::{EvaluationRecord, Evaluator, SearchTargets, WorkloadShape};
use crate::model::{ModelSpec, Precision};
use crate::plan::{materialize_plan, DeploymentPlan, PlanOption};
use crate::predict::{HeuristicPredictor, PerformancePredictor, RegressionPredictor, RegressionStore};
use crate::space::SearchSpace;
use crate::topology::{ClusterTopology, HardwareMode};
use inferplan_search::{
    planner_by_name, strategy_by_name, CandidateEvaluator, SearchLimits, SearchOutcome,
    SearchStrategy,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one optimization run needs besides the cluster itself.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub model: ModelSpec,
    pub precision: Precision,
    pub engines: Vec<EngineKind>,
    pub targets: SearchTargets,
    pub workload: WorkloadShape,
    pub mode: HardwareMode,
    pub strategy: String,
    pub seed: u64,
    pub limits: SearchLimits,
    /// Directory of regression artifacts; heuristic-only when absent.
    pub artifact_dir: Option<PathBuf>,
}

impl OptimizeRequest {
    pub fn new(model: ModelSpec, engines: Vec<EngineKind>) -> Self {
        Self {
            model,
            precision: Precision::Bf16,
            engines,
            targets: SearchTargets::default(),
            workload: WorkloadShape::default(),
            mode: HardwareMode::Dedicated,
            strategy: "direct".to_string(),
            seed: 42,
            limits: SearchLimits::default(),
            artifact_dir: None,
        }
    }
}

/// Search result for one (device type, engine) pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairResult {
    pub device_type: String,
    pub engine: EngineKind,
    pub outcome: SearchOutcome,
    /// Full detail for the winning configuration, when one exists.
    pub best_record: Option<EvaluationRecord>,
    /// Records for the ranked runner-up configurations, best first. Plan
    /// assembly falls back through these when a config is banned.
    pub top_records: Vec<EvaluationRecord>,
    pub evaluations: u64,
}

/// Ranked per-pair results for one optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    /// Results ordered best first: targets met, then penalty, then cost.
    pub results: Vec<PairResult>,
    pub total_evaluations: u64,
}

impl OptimizationReport {
    pub fn best(&self) -> Option<&PairResult> {
        self.results.iter().find(|r| r.best_record.is_some())
    }

    /// True if any pair produced a configuration meeting all targets.
    pub fn targets_met(&self) -> bool {
        self.results.iter().any(|r| r.outcome.targets_met)
    }
}

fn build_predictor(artifact_dir: Option<&PathBuf>) -> Arc<dyn PerformancePredictor> {
    match artifact_dir {
        Some(dir) => Arc::new(
            RegressionPredictor::new(Arc::new(RegressionStore::new(dir.clone())))
                .with_heuristic_fallback(),
        ),
        None => Arc::new(HeuristicPredictor),
    }
}

/// Run the search across the whole cluster.
///
/// Pairs whose engine cannot drive the device kind are silently skipped;
/// pairs where the model cannot fit are skipped with a warning. If no
/// pair survives either filter the run fails with
/// [`SearchError::NoCompatibleEngine`].
pub fn optimize(
    cluster: &ClusterTopology,
    request: &OptimizeRequest,
) -> Result<OptimizationReport, SearchError> {
    // Validate the strategy name once, before spending any evaluations.
    if strategy_by_name(&request.strategy, request.seed).is_none() {
        return Err(SearchError::UnknownAlgorithm {
            kind: "strategy",
            name: request.strategy.clone(),
        });
    }

    let pairs: Vec<(String, EngineKind)> = cluster
        .device_types()
        .flat_map(|(device_type, group)| {
            request
                .engines
                .iter()
                .filter(|engine| engine.supports_device(group.device.kind))
                .map(|engine| (device_type.clone(), *engine))
                .collect::<Vec<_>>()
        })
        .collect();
    if pairs.is_empty() {
        return Err(SearchError::NoCompatibleEngine);
    }

    let predictor = build_predictor(request.artifact_dir.as_ref());
    let seq_len = request.workload.input_tokens + request.workload.output_tokens;

    let mut results: Vec<PairResult> = pairs
        .par_iter()
        .filter_map(|(device_type, engine)| {
            let group = cluster.group(device_type)?;
            let space = match SearchSpace::build(
                group,
                &request.model,
                request.precision,
                *engine,
                request.mode,
                seq_len,
                request.targets.max_concurrency,
            ) {
                Ok(space) => space,
                Err(err) => {
                    warn!(
                        device_type = %device_type,
                        engine = engine.name(),
                        error = %err,
                        "skipping pair"
                    );
                    return None;
                }
            };

            let mut evaluator = Evaluator::new(
                *engine,
                group.device.clone(),
                request.model.clone(),
                request.precision,
                request.targets,
                request.workload,
                request.mode,
                Arc::clone(&predictor),
            );
            // Checked above; each worker gets its own strategy instance.
            let mut strategy = strategy_by_name(&request.strategy, request.seed)?;
            let outcome = strategy.search(space.view(), &mut evaluator, &request.limits);
            let best_record = outcome
                .best
                .as_ref()
                .and_then(|best| evaluator.record(&best.config).cloned());
            let top_records: Vec<EvaluationRecord> = outcome
                .top
                .iter()
                .filter_map(|eval| evaluator.record(&eval.config).cloned())
                .collect();
            info!(
                device_type = %device_type,
                engine = engine.name(),
                evaluations = outcome.evaluations,
                targets_met = outcome.targets_met,
                "pair search finished"
            );
            Some(PairResult {
                device_type: device_type.clone(),
                engine: *engine,
                outcome,
                best_record,
                top_records,
                evaluations: evaluator.evaluations_used(),
            })
        })
        .collect();

    if results.is_empty() {
        return Err(SearchError::NoCompatibleEngine);
    }

    results.sort_by(|a, b| {
        let key = |r: &PairResult| {
            (
                !r.outcome.targets_met,
                r.best_record.is_none(),
                r.best_record
                    .as_ref()
                    .map(|rec| rec.cost_per_million_tokens)
                    .unwrap_or(f64::INFINITY),
            )
        };
        let (am, an, ac) = key(a);
        let (bm, bn, bc) = key(b);
        (am, an)
            .cmp(&(bm, bn))
            .then(ac.partial_cmp(&bc).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.device_type.cmp(&b.device_type))
            .then(a.engine.name().cmp(b.engine.name()))
    });

    let total_evaluations = results.iter().map(|r| r.evaluations).sum();
    Ok(OptimizationReport {
        results,
        total_evaluations,
    })
}

/// Filters applied when assembling a plan, without re-running the search.
///
/// Device types are removed from the inventory wholesale. Banned configs
/// are keyed by (device type, tensor parallel, pipeline parallel,
/// concurrency); a pair whose winner is banned falls back to its next-best
/// record, so one bad deployment does not disqualify the hardware it ran on.
#[derive(Debug, Clone, Default)]
pub struct PlanExclusions {
    pub device_types: HashSet<String>,
    configs: HashSet<(String, u32, u32, u32)>,
}

impl PlanExclusions {
    pub fn ban_device_type(&mut self, device_type: impl Into<String>) {
        self.device_types.insert(device_type.into());
    }

    /// Bar a previously produced configuration from future plans.
    pub fn ban_config(&mut self, config: &EngineConfig) {
        self.configs.insert(Self::key(config));
    }

    pub fn allows(&self, config: &EngineConfig) -> bool {
        !self.configs.contains(&Self::key(config))
    }

    fn key(config: &EngineConfig) -> (String, u32, u32, u32) {
        (
            config.device_type.clone(),
            config.tensor_parallel,
            config.pipeline_parallel,
            config.concurrency,
        )
    }
}

/// Pack an optimization report's winners into a cluster deployment plan.
pub fn assemble_plan(
    report: &OptimizationReport,
    cluster: &ClusterTopology,
    target_concurrency: u64,
    planner: &str,
    exclusions: &PlanExclusions,
) -> Result<DeploymentPlan, SearchError> {
    let assembler = planner_by_name(planner).ok_or_else(|| SearchError::UnknownAlgorithm {
        kind: "planner",
        name: planner.to_string(),
    })?;

    let mut options: Vec<PlanOption> = Vec::new();
    for result in &report.results {
        if exclusions.device_types.contains(&result.device_type) {
            continue;
        }
        // One option per device type: results are best-first, so the first
        // pair that yields an allowed record for a type is its winner.
        if options
            .iter()
            .any(|o| o.record.config.device_type == result.device_type)
        {
            continue;
        }
        let Some(group) = cluster.group(&result.device_type) else {
            continue;
        };
        let Some(record) = result
            .top_records
            .iter()
            .find(|rec| exclusions.allows(&rec.config))
        else {
            continue;
        };
        options.push(PlanOption {
            record: record.clone(),
            group: group.clone(),
        });
    }

    let candidates: Vec<_> = options.iter().map(PlanOption::to_candidate).collect();
    let selection = assembler
        .assemble(&candidates, target_concurrency)
        .ok_or(SearchError::PlanAssemblyFailed {
            target: target_concurrency,
        })?;
    info!(
        planner = assembler.name(),
        replicas = selection.picks.iter().map(|p| p.replicas).sum::<u32>(),
        concurrency = selection.total_concurrency,
        cost_per_hour = selection.total_cost_per_hour,
        "assembled cluster plan"
    );
    materialize_plan(&selection, &options, target_concurrency)
}
