//! Deterministic staged search over the configuration space.
//!
//! Walks the space from cheapest hardware to most expensive: PP ascending,
//! TP ascending from the minimum that fits, concurrency descending from the
//! maximum. Higher concurrency amortizes device cost over more requests, so
//! within one (TP, PP) pair the first concurrency that meets targets is also
//! the cheapest per token. The first candidate that meets all targets is
//! therefore the optimum under this ordering and the search stops there.

use crate::traits::*;

/// Deterministic staged search strategy.
pub struct DirectSearch {
    /// Keep this many top results for reporting.
    top_k: usize,
}

impl DirectSearch {
    pub fn new() -> Self {
        Self { top_k: 5 }
    }

    pub fn with_top_k(top_k: usize) -> Self {
        assert!(top_k > 0, "top_k must be > 0, got {}", top_k);
        Self { top_k }
    }
}

impl Default for DirectSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for DirectSearch {
    fn search(
        &mut self,
        space: &SpaceView,
        evaluator: &mut dyn CandidateEvaluator,
        limits: &SearchLimits,
    ) -> SearchOutcome {
        if space.is_empty() {
            return SearchOutcome::empty(0);
        }

        let levels = space.concurrency_levels();
        let mut evaluated: Vec<Evaluation> = Vec::new();
        let mut winner: Option<Evaluation> = None;

        'outer: for &pp in &space.valid_pp {
            for &tp in &space.valid_tp {
                for &concurrency in &levels {
                    if evaluator.evaluations_used() >= limits.max_evaluations {
                        break 'outer;
                    }
                    let candidate = CandidateConfig::new(tp, pp, concurrency);
                    let Some(eval) = evaluator.evaluate(&candidate) else {
                        // Memory-rejected; lower concurrency may still fit.
                        continue;
                    };
                    let meets = eval.meets_targets;
                    evaluated.push(eval.clone());
                    if meets {
                        winner = Some(eval);
                        break 'outer;
                    }
                }
            }
        }

        let evaluations = evaluator.evaluations_used();
        if evaluated.is_empty() {
            return SearchOutcome::empty(evaluations);
        }

        rank_evaluations(&mut evaluated);
        evaluated.truncate(self.top_k);

        match winner {
            Some(best) => SearchOutcome {
                best: Some(best),
                top: evaluated,
                targets_met: true,
                evaluations,
            },
            // Exhausted (or hit the ceiling) without a target-meeting config:
            // return the lowest-penalty result, flagged as best-effort.
            None => SearchOutcome {
                best: evaluated.first().cloned(),
                top: evaluated,
                targets_met: false,
                evaluations,
            },
        }
    }

    fn name(&self) -> &str {
        "direct"
    }
}
