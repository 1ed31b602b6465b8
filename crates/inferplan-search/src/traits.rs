//! Search strategy trait definitions.
//!
//! All search strategies implement the [`SearchStrategy`] trait, which
//! receives the valid configuration space and an evaluator to score
//! individual (TP, PP, concurrency) candidates.

use serde::{Deserialize, Serialize};

/// A single point in the configuration search space.
///
/// `tensor_parallel`, `pipeline_parallel`, and `concurrency` determine memory
/// feasibility, predicted performance, and cost. The remaining fields are
/// engine knobs explored by the evolutionary search; they shape the generated
/// engine arguments but not the performance prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub tensor_parallel: u32,
    pub pipeline_parallel: u32,
    pub concurrency: u32,
    /// KV-cache block size in tokens.
    pub block_size: u32,
    /// Scheduler delay factor (engine knob, 0.0 - 1.0).
    pub scheduler_delay_factor: f64,
    /// Whether chunked prefill is enabled.
    pub enable_chunked_prefill: bool,
}

impl CandidateConfig {
    /// A candidate with default engine knobs.
    pub fn new(tensor_parallel: u32, pipeline_parallel: u32, concurrency: u32) -> Self {
        Self {
            tensor_parallel,
            pipeline_parallel,
            concurrency,
            block_size: 16,
            scheduler_delay_factor: 0.0,
            enable_chunked_prefill: false,
        }
    }

    /// Hashable dedup key covering the full gene vector.
    ///
    /// The scheduler delay factor is quantized to two decimal places so that
    /// floating-point noise from crossover does not defeat deduplication.
    pub fn dedup_key(&self) -> (u32, u32, u32, u32, u64, bool) {
        (
            self.tensor_parallel,
            self.pipeline_parallel,
            self.concurrency,
            self.block_size,
            (self.scheduler_delay_factor * 100.0).round() as u64,
            self.enable_chunked_prefill,
        )
    }
}

/// The scored outcome of evaluating one candidate.
///
/// This is the search crate's view of an evaluation — it carries only what
/// strategies and planners need, not the full memory breakdown held by the
/// core evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub config: CandidateConfig,
    pub ttft_ms: f64,
    pub throughput_per_user: f64,
    pub e2e_latency_s: f64,
    pub cost_per_million_tokens: f64,
    /// Mean normalized overage across the three performance targets.
    pub penalty: f64,
    pub meets_targets: bool,
    /// Ordinal assigned by the evaluator (evaluation count at scoring time).
    pub search_step: u64,
}

/// The valid configuration space for one device type, as derived by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceView {
    /// Valid tensor-parallel sizes, ascending powers of two.
    pub valid_tp: Vec<u32>,
    /// Valid pipeline-parallel sizes, ascending from 1.
    pub valid_pp: Vec<u32>,
    /// Highest concurrency to consider.
    pub max_concurrency: u32,
    /// Step used when walking concurrency downward.
    pub concurrency_step: u32,
}

impl SpaceView {
    /// Whether the space contains no candidates at all.
    pub fn is_empty(&self) -> bool {
        self.valid_tp.is_empty() || self.valid_pp.is_empty() || self.max_concurrency == 0
    }

    /// Concurrency levels from max downward in fixed steps, always ending at 1.
    pub fn concurrency_levels(&self) -> Vec<u32> {
        let step = self.concurrency_step.max(1);
        let mut levels = Vec::new();
        let mut c = self.max_concurrency;
        while c > 1 {
            levels.push(c);
            c = c.saturating_sub(step);
        }
        levels.push(1);
        levels
    }
}

/// Limits that bound a single search run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchLimits {
    /// Cooperative evaluation ceiling; strategies check it between
    /// evaluations and return best-effort results once reached.
    pub max_evaluations: u64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_evaluations: 200,
        }
    }
}

/// Scores candidates on behalf of a strategy.
///
/// Returns `None` when a candidate fails the memory feasibility check;
/// infeasible candidates are never scored for performance. Implementations
/// cache by (tp, pp, concurrency) so re-submitting a tuple is cheap.
pub trait CandidateEvaluator {
    fn evaluate(&mut self, candidate: &CandidateConfig) -> Option<Evaluation>;

    /// Number of distinct evaluations performed so far.
    fn evaluations_used(&self) -> u64;
}

/// Result of one strategy run over one device type's space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Best configuration found, if any candidate was memory-feasible.
    pub best: Option<Evaluation>,
    /// Top results ordered best-first (penalty, then cost).
    pub top: Vec<Evaluation>,
    /// Whether `best` actually meets the performance targets.
    pub targets_met: bool,
    /// Evaluations consumed by this run.
    pub evaluations: u64,
}

impl SearchOutcome {
    /// An outcome for an empty or fully infeasible space.
    pub fn empty(evaluations: u64) -> Self {
        Self {
            best: None,
            top: Vec::new(),
            targets_met: false,
            evaluations,
        }
    }
}

/// The core search strategy trait.
///
/// Implement this trait to plug a custom optimization strategy into the
/// orchestrator. A strategy instance runs single-threaded over one device
/// type's space; parallelism happens across strategy instances.
pub trait SearchStrategy: Send {
    /// Explore `space`, scoring candidates via `evaluator`, within `limits`.
    fn search(
        &mut self,
        space: &SpaceView,
        evaluator: &mut dyn CandidateEvaluator,
        limits: &SearchLimits,
    ) -> SearchOutcome;

    /// Human-readable name for reports.
    fn name(&self) -> &str;
}

/// Order evaluations best-first: target-meeting configs before misses,
/// then by penalty, then by cost.
pub fn rank_evaluations(evals: &mut [Evaluation]) {
    evals.sort_by(|a, b| {
        b.meets_targets
            .cmp(&a.meets_targets)
            .then(
                a.penalty
                    .partial_cmp(&b.penalty)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                a.cost_per_million_tokens
                    .partial_cmp(&b.cost_per_million_tokens)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}
