//! Cluster plan assembly: combine per-device-type optimal configurations
//! into one selection that reaches an aggregate concurrency target.
//!
//! Two interchangeable algorithms implement [`PlanAssembler`]:
//! [`GreedyPlanner`] consumes replicas in cost/concurrency-ratio order, and
//! [`OptimalPlanner`] additionally enumerates seeds and applies a single
//! best-alternative swap. Both fail closed: `None` means no feasible plan,
//! never a plan below the target.

use serde::{Deserialize, Serialize};

/// One per-device-type winning configuration, offered to the planners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCandidate {
    pub device_type: String,
    pub engine: String,
    /// Replicas the per-node inventory can actually place. Computed by the
    /// caller from node-level device counts; a cluster-wide device total
    /// would oversell ragged inventories.
    pub max_replicas: u32,
    /// Concurrency served by one replica.
    pub concurrency_per_replica: u32,
    /// Hourly cost of one replica (amortized price x devices in the group).
    pub cost_per_replica: f64,
    /// Normalized cost metric carried through for reporting.
    pub cost_per_million_tokens: f64,
}

impl PlanCandidate {
    /// Cost per unit of concurrency; the greedy ordering key.
    fn ratio(&self) -> f64 {
        self.cost_per_replica / self.concurrency_per_replica.max(1) as f64
    }
}

/// A number of replicas taken from one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPick {
    /// Index into the candidate slice passed to `assemble`.
    pub candidate: usize,
    pub replicas: u32,
}

/// The assembled selection: which candidates, how many replicas each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSelection {
    pub picks: Vec<PlanPick>,
    pub total_concurrency: u64,
    pub total_cost_per_hour: f64,
}

/// Plan-assembly algorithm contract.
///
/// A `None` result means no combination of available devices reaches the
/// target concurrency.
pub trait PlanAssembler: Send {
    fn assemble(
        &self,
        candidates: &[PlanCandidate],
        target_concurrency: u64,
    ) -> Option<PlanSelection>;

    fn name(&self) -> &str;
}

/// Candidate indices ordered by ascending cost/concurrency ratio.
/// Ties break by replica cost, then by index, keeping the order deterministic.
fn ratio_order(candidates: &[PlanCandidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].max_replicas > 0 && candidates[i].concurrency_per_replica > 0)
        .collect();
    order.sort_by(|&a, &b| {
        candidates[a]
            .ratio()
            .partial_cmp(&candidates[b].ratio())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                candidates[a]
                    .cost_per_replica
                    .partial_cmp(&candidates[b].cost_per_replica)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.cmp(&b))
    });
    order
}

/// Consume replicas in the given order until the target is reached.
fn fill(
    candidates: &[PlanCandidate],
    order: &[usize],
    target: u64,
) -> Option<PlanSelection> {
    let mut picks = Vec::new();
    let mut achieved = 0u64;
    let mut cost = 0.0;

    for &idx in order {
        if achieved >= target {
            break;
        }
        let c = &candidates[idx];
        let per = c.concurrency_per_replica as u64;
        let needed = (target - achieved).div_ceil(per) as u32;
        let take = needed.min(c.max_replicas);
        if take == 0 {
            continue;
        }
        achieved += take as u64 * per;
        cost += take as f64 * c.cost_per_replica;
        picks.push(PlanPick {
            candidate: idx,
            replicas: take,
        });
    }

    if achieved >= target {
        Some(PlanSelection {
            picks,
            total_concurrency: achieved,
            total_cost_per_hour: cost,
        })
    } else {
        None
    }
}

/// Sort by cost/concurrency ratio and consume devices until the target is met.
#[derive(Debug, Default)]
pub struct GreedyPlanner;

impl GreedyPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl PlanAssembler for GreedyPlanner {
    fn assemble(
        &self,
        candidates: &[PlanCandidate],
        target_concurrency: u64,
    ) -> Option<PlanSelection> {
        if target_concurrency == 0 {
            return None;
        }
        let order = ratio_order(candidates);
        fill(candidates, &order, target_concurrency)
    }

    fn name(&self) -> &str {
        "greedy"
    }
}

/// Seed-enumerating planner with a single best-alternative swap.
///
/// For each candidate as a seed, fill the remainder greedily, then try to
/// replace the final replica with one replica of a cheaper candidate that
/// still covers the remaining gap. The global minimum over all seeds is kept.
/// One seed reproduces the pure greedy selection, so the result never costs
/// more than [`GreedyPlanner`]'s. This is a deterministic bounded local
/// search, not an exhaustive optimum over the device inventory.
#[derive(Debug, Default)]
pub struct OptimalPlanner;

impl OptimalPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Try to swap the last replica of the last pick for one replica of a
    /// candidate outside the selection, keeping the target met.
    fn try_swap(
        candidates: &[PlanCandidate],
        selection: &mut PlanSelection,
        target: u64,
    ) {
        let Some(last) = selection.picks.last() else {
            return;
        };
        let last_candidate = last.candidate;
        let last_cost = candidates[last_candidate].cost_per_replica;
        let last_conc = candidates[last_candidate].concurrency_per_replica as u64;
        let without_last = selection.total_concurrency - last_conc;
        let deficit = target.saturating_sub(without_last);

        let included: Vec<usize> = selection.picks.iter().map(|p| p.candidate).collect();
        let mut alternative: Option<usize> = None;
        for (i, c) in candidates.iter().enumerate() {
            if included.contains(&i) || c.max_replicas == 0 {
                continue;
            }
            if (c.concurrency_per_replica as u64) < deficit {
                continue;
            }
            if c.cost_per_replica >= last_cost {
                continue;
            }
            let better = match alternative {
                Some(a) => c.cost_per_replica < candidates[a].cost_per_replica,
                None => true,
            };
            if better {
                alternative = Some(i);
            }
        }

        if let Some(alt) = alternative {
            let alt_conc = candidates[alt].concurrency_per_replica as u64;
            let alt_cost = candidates[alt].cost_per_replica;
            if let Some(last_pick) = selection.picks.last_mut() {
                last_pick.replicas -= 1;
                if last_pick.replicas == 0 {
                    selection.picks.pop();
                }
            }
            selection.picks.push(PlanPick {
                candidate: alt,
                replicas: 1,
            });
            selection.total_concurrency = without_last + alt_conc;
            selection.total_cost_per_hour += alt_cost - last_cost;
        }
    }
}

impl PlanAssembler for OptimalPlanner {
    fn assemble(
        &self,
        candidates: &[PlanCandidate],
        target_concurrency: u64,
    ) -> Option<PlanSelection> {
        if target_concurrency == 0 {
            return None;
        }
        let base_order = ratio_order(candidates);
        let mut best: Option<PlanSelection> = None;

        for &seed in &base_order {
            let mut order = vec![seed];
            order.extend(base_order.iter().copied().filter(|&i| i != seed));

            let Some(mut selection) = fill(candidates, &order, target_concurrency) else {
                continue;
            };
            Self::try_swap(candidates, &mut selection, target_concurrency);
            debug_assert!(selection.total_concurrency >= target_concurrency);

            let better = match &best {
                Some(b) => selection.total_cost_per_hour < b.total_cost_per_hour,
                None => true,
            };
            if better {
                best = Some(selection);
            }
        }
        best
    }

    fn name(&self) -> &str {
        "optimal"
    }
}

/// Create a plan assembler by name.
pub fn planner_by_name(name: &str) -> Option<Box<dyn PlanAssembler>> {
    match name {
        "greedy" => Some(Box::new(GreedyPlanner::new())),
        "optimal" => Some(Box::new(OptimalPlanner::new())),
        _ => None,
    }
}

/// List all available planner names.
pub fn available_planners() -> Vec<&'static str> {
    vec!["greedy", "optimal"]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        device_type: &str,
        max_replicas: u32,
        conc: u32,
        cost_per_replica: f64,
    ) -> PlanCandidate {
        PlanCandidate {
            device_type: device_type.to_string(),
            engine: "vllm".to_string(),
            max_replicas,
            concurrency_per_replica: conc,
            cost_per_replica,
            cost_per_million_tokens: cost_per_replica / conc as f64,
        }
    }

    #[test]
    fn test_greedy_reaches_target() {
        let candidates = vec![
            candidate("a100", 8, 60, 1.0),
            candidate("h100", 8, 60, 2.0),
        ];
        let plan = GreedyPlanner::new().assemble(&candidates, 100).unwrap();
        assert!(plan.total_concurrency >= 100);
        // Cheaper type is consumed first.
        assert_eq!(plan.picks[0].candidate, 0);
    }

    #[test]
    fn test_greedy_returns_none_when_exhausted() {
        let candidates = vec![candidate("l40s", 2, 10, 1.0)];
        assert!(GreedyPlanner::new().assemble(&candidates, 100).is_none());
    }

    #[test]
    fn test_cheaper_type_fully_used_before_partial_second() {
        // Target 100, two types at 60 concurrency each; the cheap type alone
        // is insufficient, so a partial second is required — but the cheap
        // one must be consumed fully first.
        let candidates = vec![
            candidate("cheap", 1, 60, 1.0),
            candidate("dear", 1, 60, 2.0),
        ];
        let plan = OptimalPlanner::new().assemble(&candidates, 100).unwrap();
        assert_eq!(plan.total_concurrency, 120);
        let cheap_replicas: u32 = plan
            .picks
            .iter()
            .filter(|p| p.candidate == 0)
            .map(|p| p.replicas)
            .sum();
        assert_eq!(cheap_replicas, 1);
        assert!((plan.total_cost_per_hour - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_optimal_beats_greedy_via_swap() {
        // Greedy takes two 60-concurrency replicas of the best-ratio type
        // (cost 8.0); swapping the overshooting second replica for a single
        // 50-concurrency replica gives 110 at cost 7.5.
        let candidates = vec![
            candidate("b", 8, 60, 4.0),
            candidate("c", 8, 50, 3.5),
            candidate("a", 1, 100, 10.0),
        ];
        let greedy = GreedyPlanner::new().assemble(&candidates, 110).unwrap();
        let optimal = OptimalPlanner::new().assemble(&candidates, 110).unwrap();
        assert!((greedy.total_cost_per_hour - 8.0).abs() < 1e-9);
        assert!((optimal.total_cost_per_hour - 7.5).abs() < 1e-9);
        assert!(optimal.total_concurrency >= 110);
    }

    #[test]
    fn test_optimal_never_worse_than_greedy() {
        let inventories = vec![
            vec![
                candidate("a", 2, 40, 6.0),
                candidate("b", 8, 25, 2.0),
                candidate("c", 3, 80, 9.0),
            ],
            vec![candidate("a", 4, 128, 20.0)],
            vec![
                candidate("a", 2, 30, 1.5),
                candidate("b", 2, 30, 1.5),
            ],
        ];
        for candidates in inventories {
            for target in [1u64, 50, 100, 200, 10_000] {
                let greedy = GreedyPlanner::new().assemble(&candidates, target);
                let optimal = OptimalPlanner::new().assemble(&candidates, target);
                match (greedy, optimal) {
                    (Some(g), Some(o)) => {
                        assert!(
                            o.total_cost_per_hour <= g.total_cost_per_hour + 1e-9,
                            "optimal ({}) worse than greedy ({}) at target {}",
                            o.total_cost_per_hour,
                            g.total_cost_per_hour,
                            target
                        );
                        assert!(o.total_concurrency >= target);
                    }
                    (None, None) => {}
                    (g, o) => panic!(
                        "planners disagree on feasibility at target {}: greedy={:?} optimal={:?}",
                        target,
                        g.is_some(),
                        o.is_some()
                    ),
                }
            }
        }
    }

    #[test]
    fn test_zero_target_is_rejected() {
        let candidates = vec![candidate("a", 8, 60, 1.0)];
        assert!(GreedyPlanner::new().assemble(&candidates, 0).is_none());
        assert!(OptimalPlanner::new().assemble(&candidates, 0).is_none());
    }

    #[test]
    fn test_planner_by_name() {
        for name in available_planners() {
            assert!(planner_by_name(name).is_some(), "Missing: {}", name);
        }
        assert!(planner_by_name("nonexistent").is_none());
    }
}
