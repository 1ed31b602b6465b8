//! Multi-objective evolutionary search (NSGA-II style).
//!
//! Used when the configuration space is too large or non-monotonic for the
//! staged direct search. Individuals are full gene vectors (TP, PP,
//! concurrency plus engine knobs); fitness is the triple
//! (performance penalty, concurrency utilization, cost per million tokens)
//! minimizing penalty and cost while maximizing utilization. Selection is
//! non-dominated sorting with crowding distance; variation is blend
//! crossover and per-gene mutation with deduplication against the set of
//! already-evaluated gene vectors.

use crate::traits::*;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use tracing::debug;

const BLOCK_SIZE_CHOICES: [u32; 3] = [8, 16, 32];

/// Tunable parameters for the evolutionary search.
#[derive(Debug, Clone)]
pub struct EvolutionParams {
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    /// Fraction of each generation carried over unchanged.
    pub elite_ratio: f64,
    /// Stop early after this many generations with a stable top-k set.
    pub convergence_generations: u32,
    pub top_k: usize,
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            population_size: 24,
            generations: 40,
            mutation_rate: 0.3,
            crossover_rate: 0.9,
            elite_ratio: 0.1,
            convergence_generations: 5,
            top_k: 5,
        }
    }
}

/// NSGA-II style evolutionary search strategy.
pub struct EvolutionSearch {
    params: EvolutionParams,
    rng: ChaCha8Rng,
}

/// Fitness objectives for one individual.
/// Penalty and cost are minimized, utilization is maximized.
#[derive(Debug, Clone, Copy)]
struct Fitness {
    penalty: f64,
    utilization: f64,
    cost: f64,
}

impl Fitness {
    fn of(eval: &Evaluation, max_concurrency: u32) -> Self {
        Self {
            penalty: eval.penalty,
            utilization: eval.config.concurrency as f64 / max_concurrency.max(1) as f64,
            cost: eval.cost_per_million_tokens,
        }
    }

    /// Pareto dominance: no worse in all objectives, strictly better in one.
    fn dominates(&self, other: &Fitness) -> bool {
        let no_worse = self.penalty <= other.penalty
            && self.utilization >= other.utilization
            && self.cost <= other.cost;
        let strictly_better = self.penalty < other.penalty
            || self.utilization > other.utilization
            || self.cost < other.cost;
        no_worse && strictly_better
    }

    fn objective(&self, i: usize) -> f64 {
        match i {
            0 => self.penalty,
            1 => -self.utilization, // negate so all objectives minimize
            _ => self.cost,
        }
    }
}

impl EvolutionSearch {
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, EvolutionParams::default())
    }

    pub fn with_params(seed: u64, params: EvolutionParams) -> Self {
        assert!(
            params.population_size >= 4,
            "population_size must be >= 4, got {}",
            params.population_size
        );
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn random_candidate(&mut self, space: &SpaceView) -> CandidateConfig {
        let tp = space.valid_tp[self.rng.gen_range(0..space.valid_tp.len())];
        let pp = space.valid_pp[self.rng.gen_range(0..space.valid_pp.len())];
        CandidateConfig {
            tensor_parallel: tp,
            pipeline_parallel: pp,
            concurrency: self.rng.gen_range(1..=space.max_concurrency),
            block_size: BLOCK_SIZE_CHOICES[self.rng.gen_range(0..BLOCK_SIZE_CHOICES.len())],
            scheduler_delay_factor: self.rng.gen::<f64>() * 0.5,
            enable_chunked_prefill: self.rng.gen_bool(0.5),
        }
    }

    /// Blend crossover: numeric genes interpolate, discrete genes pick a parent.
    fn crossover(
        &mut self,
        a: &CandidateConfig,
        b: &CandidateConfig,
        space: &SpaceView,
    ) -> CandidateConfig {
        let t = self.rng.gen::<f64>();
        let concurrency = blend_u32(a.concurrency, b.concurrency, t).clamp(1, space.max_concurrency);
        let tp_raw = blend_u32(a.tensor_parallel, b.tensor_parallel, t);
        CandidateConfig {
            tensor_parallel: snap_to_valid(tp_raw, &space.valid_tp),
            pipeline_parallel: if self.rng.gen_bool(0.5) {
                a.pipeline_parallel
            } else {
                b.pipeline_parallel
            },
            concurrency,
            block_size: if self.rng.gen_bool(0.5) {
                a.block_size
            } else {
                b.block_size
            },
            scheduler_delay_factor: a.scheduler_delay_factor
                + t * (b.scheduler_delay_factor - a.scheduler_delay_factor),
            enable_chunked_prefill: if self.rng.gen_bool(0.5) {
                a.enable_chunked_prefill
            } else {
                b.enable_chunked_prefill
            },
        }
    }

    /// Per-gene randomized mutation.
    fn mutate(&mut self, individual: &mut CandidateConfig, space: &SpaceView) {
        let rate = self.params.mutation_rate;
        if self.rng.gen_bool(rate) {
            individual.tensor_parallel =
                space.valid_tp[self.rng.gen_range(0..space.valid_tp.len())];
        }
        if self.rng.gen_bool(rate) {
            individual.pipeline_parallel =
                space.valid_pp[self.rng.gen_range(0..space.valid_pp.len())];
        }
        if self.rng.gen_bool(rate) {
            individual.concurrency = self.rng.gen_range(1..=space.max_concurrency);
        }
        if self.rng.gen_bool(rate) {
            individual.block_size =
                BLOCK_SIZE_CHOICES[self.rng.gen_range(0..BLOCK_SIZE_CHOICES.len())];
        }
        if self.rng.gen_bool(rate) {
            individual.scheduler_delay_factor = self.rng.gen::<f64>() * 0.5;
        }
        if self.rng.gen_bool(rate) {
            individual.enable_chunked_prefill = !individual.enable_chunked_prefill;
        }
    }

    /// Evaluate candidates that have not been seen before, within limits.
    fn evaluate_new(
        &mut self,
        candidates: Vec<CandidateConfig>,
        evaluator: &mut dyn CandidateEvaluator,
        limits: &SearchLimits,
        seen: &mut HashSet<(u32, u32, u32, u32, u64, bool)>,
    ) -> Vec<Evaluation> {
        let mut out = Vec::new();
        for candidate in candidates {
            if evaluator.evaluations_used() >= limits.max_evaluations {
                break;
            }
            if !seen.insert(candidate.dedup_key()) {
                continue;
            }
            if let Some(eval) = evaluator.evaluate(&candidate) {
                out.push(eval);
            }
        }
        out
    }
}

impl SearchStrategy for EvolutionSearch {
    fn search(
        &mut self,
        space: &SpaceView,
        evaluator: &mut dyn CandidateEvaluator,
        limits: &SearchLimits,
    ) -> SearchOutcome {
        if space.is_empty() {
            return SearchOutcome::empty(0);
        }

        let mut seen: HashSet<(u32, u32, u32, u32, u64, bool)> = HashSet::new();

        // Seed population: random individuals, keeping only memory-feasible ones.
        let mut initial = Vec::new();
        let mut attempts = 0;
        while initial.len() < self.params.population_size * 4
            && attempts < self.params.population_size * 16
        {
            initial.push(self.random_candidate(space));
            attempts += 1;
        }
        let mut population = self.evaluate_new(initial, evaluator, limits, &mut seen);
        if population.is_empty() {
            return SearchOutcome::empty(evaluator.evaluations_used());
        }
        population = nsga_select(population, self.params.population_size, space.max_concurrency);

        // Best-ever results, bounded to top_k, plus convergence tracking.
        let mut best_ever: Vec<Evaluation> = population.clone();
        rank_evaluations(&mut best_ever);
        best_ever.truncate(self.params.top_k);
        let mut stable_generations = 0u32;

        let mut generations_run = 0;
        for _generation in 0..self.params.generations {
            generations_run += 1;
            if evaluator.evaluations_used() >= limits.max_evaluations {
                break;
            }

            // Variation: crossover pairs from the current population, mutate.
            let mut offspring = Vec::with_capacity(self.params.population_size);
            for i in 0..self.params.population_size {
                let a = population[i % population.len()].config.clone();
                let j = self.rng.gen_range(0..population.len());
                let b = population[j].config.clone();
                let mut child = if self.rng.gen_bool(self.params.crossover_rate) {
                    self.crossover(&a, &b, space)
                } else {
                    a
                };
                self.mutate(&mut child, space);
                offspring.push(child);
            }
            offspring.retain(|c| !seen.contains(&c.dedup_key()));
            if offspring.is_empty() {
                // No genuinely new gene vectors can be produced.
                break;
            }

            let scored = self.evaluate_new(offspring, evaluator, limits, &mut seen);

            // Elitism: the top elite_ratio fraction survives unconditionally.
            let elite_count =
                ((self.params.population_size as f64 * self.params.elite_ratio).ceil() as usize)
                    .max(1);
            let mut ranked = population.clone();
            rank_evaluations(&mut ranked);
            let elites: Vec<Evaluation> = ranked.into_iter().take(elite_count).collect();

            let mut combined = population;
            combined.extend(scored);
            combined.extend(elites);
            population =
                nsga_select(combined, self.params.population_size, space.max_concurrency);

            // Update the bounded best-ever set; a stable set counts toward
            // convergence.
            let mut merged = best_ever.clone();
            merged.extend(population.iter().cloned());
            dedup_evaluations(&mut merged);
            rank_evaluations(&mut merged);
            merged.truncate(self.params.top_k);
            let changed = merged
                .iter()
                .map(|e| e.config.dedup_key())
                .ne(best_ever.iter().map(|e| e.config.dedup_key()));
            best_ever = merged;
            if changed {
                stable_generations = 0;
            } else {
                stable_generations += 1;
                if stable_generations >= self.params.convergence_generations {
                    break;
                }
            }
        }

        let best = best_ever.first().cloned();
        let targets_met = best.as_ref().map(|e| e.meets_targets).unwrap_or(false);
        debug!(
            generations = generations_run,
            evaluations = evaluator.evaluations_used(),
            targets_met,
            "evolution search finished"
        );
        SearchOutcome {
            best,
            top: best_ever,
            targets_met,
            evaluations: evaluator.evaluations_used(),
        }
    }

    fn name(&self) -> &str {
        "evolution"
    }
}

fn blend_u32(a: u32, b: u32, t: f64) -> u32 {
    (a as f64 + t * (b as f64 - a as f64)).round().max(1.0) as u32
}

/// Snap a raw gene value to the nearest entry in the valid list.
fn snap_to_valid(raw: u32, valid: &[u32]) -> u32 {
    *valid
        .iter()
        .min_by_key(|&&v| v.abs_diff(raw))
        .unwrap_or(&1)
}

fn dedup_evaluations(evals: &mut Vec<Evaluation>) {
    let mut keys = HashSet::new();
    evals.retain(|e| keys.insert(e.config.dedup_key()));
}

/// Non-dominated sorting + crowding-distance truncation to `target` survivors.
fn nsga_select(
    individuals: Vec<Evaluation>,
    target: usize,
    max_concurrency: u32,
) -> Vec<Evaluation> {
    let mut pool = individuals;
    dedup_evaluations(&mut pool);
    if pool.len() <= target {
        return pool;
    }

    let fitness: Vec<Fitness> = pool
        .iter()
        .map(|e| Fitness::of(e, max_concurrency))
        .collect();
    let fronts = non_dominated_fronts(&fitness);

    let mut survivors: Vec<usize> = Vec::with_capacity(target);
    for front in fronts {
        if survivors.len() + front.len() <= target {
            survivors.extend(front);
        } else {
            // Partial front: keep the most spread-out individuals.
            let mut by_crowding: Vec<(usize, f64)> = crowding_distances(&front, &fitness);
            by_crowding.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            for (idx, _) in by_crowding {
                if survivors.len() >= target {
                    break;
                }
                survivors.push(idx);
            }
        }
        if survivors.len() >= target {
            break;
        }
    }

    survivors.sort_unstable();
    survivors.into_iter().map(|i| pool[i].clone()).collect()
}

/// Fast non-dominated sort: returns fronts of indices, best front first.
fn non_dominated_fronts(fitness: &[Fitness]) -> Vec<Vec<usize>> {
    let n = fitness.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];

    for i in 0..n {
        for j in (i + 1)..n {
            if fitness[i].dominates(&fitness[j]) {
                dominated_by[i].push(j);
                domination_count[j] += 1;
            } else if fitness[j].dominates(&fitness[i]) {
                dominated_by[j].push(i);
                domination_count[i] += 1;
            }
        }
    }

    let mut fronts = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| domination_count[i] == 0).collect();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_by[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(std::mem::take(&mut current));
        current = next;
    }
    fronts
}

/// Crowding distance of each index within one front.
fn crowding_distances(front: &[usize], fitness: &[Fitness]) -> Vec<(usize, f64)> {
    let mut distance: Vec<(usize, f64)> = front.iter().map(|&i| (i, 0.0)).collect();
    if front.len() <= 2 {
        for d in &mut distance {
            d.1 = f64::INFINITY;
        }
        return distance;
    }

    for obj in 0..3 {
        distance.sort_by(|a, b| {
            fitness[a.0]
                .objective(obj)
                .partial_cmp(&fitness[b.0].objective(obj))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let lo = fitness[distance[0].0].objective(obj);
        let hi = fitness[distance[distance.len() - 1].0].objective(obj);
        let range = hi - lo;
        distance[0].1 = f64::INFINITY;
        let last = distance.len() - 1;
        distance[last].1 = f64::INFINITY;
        if range <= 0.0 {
            continue;
        }
        for k in 1..last {
            let prev = fitness[distance[k - 1].0].objective(obj);
            let next = fitness[distance[k + 1].0].objective(obj);
            distance[k].1 += (next - prev) / range;
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FullSpaceEvaluator, ThresholdEvaluator};

    fn space() -> SpaceView {
        SpaceView {
            valid_tp: vec![1, 2, 4, 8],
            valid_pp: vec![1, 2],
            max_concurrency: 64,
            concurrency_step: 16,
        }
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let run = || {
            let mut evaluator = ThresholdEvaluator::meets_only_at(4, 1);
            let mut strategy = EvolutionSearch::new(7);
            strategy.search(&space(), &mut evaluator, &SearchLimits::default())
        };
        let a = run();
        let b = run();
        let keys = |o: &SearchOutcome| {
            o.top
                .iter()
                .map(|e| e.config.dedup_key())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&a), keys(&b), "same seed must give identical top-k");
    }

    #[test]
    fn test_different_seeds_may_differ_but_both_valid() {
        let mut e1 = FullSpaceEvaluator::new(0.0);
        let mut e2 = FullSpaceEvaluator::new(0.0);
        let o1 = EvolutionSearch::new(1).search(&space(), &mut e1, &SearchLimits::default());
        let o2 = EvolutionSearch::new(2).search(&space(), &mut e2, &SearchLimits::default());
        assert!(o1.best.is_some());
        assert!(o2.best.is_some());
    }

    #[test]
    fn test_respects_evaluation_ceiling() {
        let mut evaluator = FullSpaceEvaluator::new(0.9);
        let limits = SearchLimits {
            max_evaluations: 30,
        };
        let outcome = EvolutionSearch::new(3).search(&space(), &mut evaluator, &limits);
        assert!(outcome.evaluations <= 30);
    }

    #[test]
    fn test_empty_space() {
        let empty = SpaceView {
            valid_tp: vec![],
            valid_pp: vec![],
            max_concurrency: 0,
            concurrency_step: 16,
        };
        let mut evaluator = FullSpaceEvaluator::new(0.0);
        let outcome =
            EvolutionSearch::new(0).search(&empty, &mut evaluator, &SearchLimits::default());
        assert!(outcome.best.is_none());
    }

    #[test]
    fn test_top_k_bounded() {
        let mut evaluator = FullSpaceEvaluator::new(0.0);
        let outcome =
            EvolutionSearch::new(11).search(&space(), &mut evaluator, &SearchLimits::default());
        assert!(outcome.top.len() <= EvolutionParams::default().top_k);
    }

    #[test]
    fn test_dominance() {
        let a = Fitness {
            penalty: 0.0,
            utilization: 1.0,
            cost: 1.0,
        };
        let b = Fitness {
            penalty: 0.5,
            utilization: 0.5,
            cost: 2.0,
        };
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(!a.dominates(&a));
    }

    #[test]
    fn test_non_dominated_fronts() {
        let fitness = vec![
            Fitness {
                penalty: 0.0,
                utilization: 1.0,
                cost: 1.0,
            },
            Fitness {
                penalty: 1.0,
                utilization: 0.1,
                cost: 9.0,
            },
            Fitness {
                penalty: 0.0,
                utilization: 0.5,
                cost: 0.5,
            },
        ];
        let fronts = non_dominated_fronts(&fitness);
        // 0 and 2 are mutually non-dominating; 1 is dominated by both.
        assert_eq!(fronts[0], vec![0, 2]);
        assert_eq!(fronts[1], vec![1]);
    }

    #[test]
    fn test_snap_to_valid() {
        assert_eq!(snap_to_valid(3, &[1, 2, 4, 8]), 2);
        assert_eq!(snap_to_valid(7, &[1, 2, 4, 8]), 8);
        assert_eq!(snap_to_valid(100, &[1, 2, 4, 8]), 8);
    }
}
