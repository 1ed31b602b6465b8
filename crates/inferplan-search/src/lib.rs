//! Search strategies and plan assembly for inferplan.
//!
//! This crate provides the [`SearchStrategy`] trait and the two built-in
//! optimization strategies, plus the [`PlanAssembler`] trait and the two
//! bin-packing planners that combine per-device-type results into a cluster
//! plan:
//!
//! | Name | Kind | Best For |
//! |------|------|----------|
//! | [`DirectSearch`] | staged deterministic search | small, monotonic spaces |
//! | [`EvolutionSearch`] | NSGA-II multi-objective GA | large or non-monotonic spaces |
//! | [`GreedyPlanner`] | ratio-ordered consumption | fast plan assembly |
//! | [`OptimalPlanner`] | seeded fill + swap | lowest-cost plan assembly |

pub mod direct;
pub mod evolution;
pub mod planner;
pub mod traits;

pub use direct::DirectSearch;
pub use evolution::{EvolutionParams, EvolutionSearch};
pub use planner::{
    available_planners, planner_by_name, GreedyPlanner, OptimalPlanner, PlanAssembler,
    PlanCandidate, PlanPick, PlanSelection,
};
pub use traits::*;

/// Create a search strategy by name. `seed` feeds the evolutionary search's
/// RNG and is ignored by deterministic strategies.
pub fn strategy_by_name(name: &str, seed: u64) -> Option<Box<dyn SearchStrategy>> {
    match name {
        "direct" => Some(Box::new(DirectSearch::new())),
        "evolution" => Some(Box::new(EvolutionSearch::new(seed))),
        _ => None,
    }
}

/// List all available built-in strategy names.
pub fn available_strategies() -> Vec<&'static str> {
    vec!["direct", "evolution"]
}
