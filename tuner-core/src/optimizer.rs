//! # Global Optimizer Module
//!
//! Bounded, derivative-free minimization by differential evolution
//! (`best/1/bin` with dithered mutation, deferred updating and a
//! Latin-hypercube start), followed by an optional projected-gradient polish
//! of the best member.
//!
//! The search only sees the [`Objective`] trait, so any cost function over a
//! bounded box can be minimized with it.

use std::thread;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::OptimizerConfig;
use crate::entropy::DEGENERATE_COST;
use crate::error::TuningError;
use crate::progress::ProgressSpan;

/// A scalar cost over a fixed number of real parameters.
///
/// Implementations must be pure: the same input always yields the same cost,
/// which lets candidates be evaluated on several threads.
pub trait Objective: Sync {
    fn dimensions(&self) -> usize;

    fn cost(&self, x: &[f64]) -> f64;

    /// Gradient used by the polish step. Defaults to central differences.
    fn gradient(&self, x: &[f64]) -> Vec<f64> {
        const H: f64 = 1e-4;
        let mut probe = x.to_vec();
        (0..x.len())
            .map(|i| {
                probe[i] = x[i] + H;
                let up = self.cost(&probe);
                probe[i] = x[i] - H;
                let down = self.cost(&probe);
                probe[i] = x[i];
                (up - down) / (2.0 * H)
            })
            .collect()
    }
}

/// Best point found by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub x: Vec<f64>,
    pub cost: f64,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Differential evolution over a box.
pub struct DifferentialEvolution<'a> {
    config: &'a OptimizerConfig,
    bounds: Vec<(f64, f64)>,
    initial_guess: Option<Vec<f64>>,
}

impl<'a> DifferentialEvolution<'a> {
    pub fn new(config: &'a OptimizerConfig, bounds: Vec<(f64, f64)>) -> Self {
        Self {
            config,
            bounds,
            initial_guess: None,
        }
    }

    /// Seeds one population member with a known point (clipped into bounds).
    ///
    /// With a positive `initial_spread` the rest of the population is drawn
    /// from a box of that half-width around the point instead of the full
    /// bounds.
    pub fn with_initial_guess(mut self, x0: Vec<f64>) -> Self {
        self.initial_guess = Some(x0);
        self
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn check_bounds(&self, dims: usize) -> Result<(), TuningError> {
        if dims == 0 {
            return Err(TuningError::OptimizationFailed("nothing to optimize".into()));
        }
        if self.bounds.len() != dims {
            return Err(TuningError::OptimizationFailed(format!(
                "{} bounds for {} dimensions",
                self.bounds.len(),
                dims
            )));
        }
        if self.initial_guess.as_ref().is_some_and(|x0| x0.len() != dims) {
            return Err(TuningError::OptimizationFailed(
                "initial guess does not match the number of dimensions".into(),
            ));
        }
        if let Some(i) = self
            .bounds
            .iter()
            .position(|&(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
        {
            return Err(TuningError::OptimizationFailed(format!(
                "invalid bounds for parameter {i}"
            )));
        }
        Ok(())
    }

    /// Runs the evolutionary search.
    ///
    /// Reports progress through `progress` after every generation. Fails if
    /// the bounds are unusable or no member reaches a finite, non-degenerate
    /// cost.
    pub fn minimize<O: Objective>(
        &self,
        objective: &O,
        progress: &mut ProgressSpan<'_, '_>,
    ) -> Result<OptimizationResult, TuningError> {
        let dims = objective.dimensions();
        self.check_bounds(dims)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let pop_size = (self.config.population_factor * dims).max(5);
        let start = self.initial_guess.as_ref().map(|x0| self.clip(x0));
        let init_box = self.initial_box(start.as_deref());
        let mut population = latin_hypercube(&init_box, pop_size, &mut rng);
        if let Some(x0) = start {
            population[0] = x0;
        }
        let mut energies = self.evaluate(objective, &population);
        let mut evaluations = pop_size;

        info!(
            "[OPTIMIZER] Differential evolution: {} parameters, population {}, {} generations max",
            dims,
            pop_size,
            self.config.max_generations
        );

        let mut generations = 0;
        let mut converged = false;
        let (m_lo, m_hi) = self.config.mutation;

        for generation in 0..self.config.max_generations {
            let best = best_index(&energies);
            let scale = if m_hi > m_lo { rng.gen_range(m_lo..m_hi) } else { m_lo };

            let trials: Vec<Vec<f64>> = (0..pop_size)
                .map(|i| self.make_trial(&population, i, best, scale, &mut rng))
                .collect();
            let trial_energies = self.evaluate(objective, &trials);
            evaluations += pop_size;

            for (i, (trial, energy)) in trials.into_iter().zip(trial_energies).enumerate() {
                if energy < energies[i] {
                    population[i] = trial;
                    energies[i] = energy;
                }
            }
            generations = generation + 1;

            let (mean, std) = mean_and_std(&energies);
            let threshold = self.config.absolute_tolerance + self.config.tolerance * mean.abs();
            converged = std.is_finite() && std <= threshold;

            // Fraction of the way to the convergence criterion, like the
            // `convergence` value of common DE implementations.
            let convergence = if std > 0.0 && std.is_finite() {
                (threshold / std).min(1.0)
            } else {
                1.0
            };
            let budget = generations as f64 / self.config.max_generations as f64;
            let fraction = budget.max(convergence);
            progress.report(fraction as f32, "Optimizing tuning curve...");

            debug!(
                "[OPTIMIZER] generation {}: best {:.6}, mean {:.6}, std {:.6}",
                generations,
                energies[best_index(&energies)],
                mean,
                std
            );

            if converged {
                break;
            }
        }

        let best = best_index(&energies);
        let cost = energies[best];
        if !cost.is_finite() || cost >= DEGENERATE_COST {
            return Err(TuningError::OptimizationFailed(format!(
                "no finite-cost solution after {generations} generations (best cost {cost})"
            )));
        }

        info!(
            "[OPTIMIZER] Finished after {} generations, {} evaluations, cost {:.6}{}",
            generations,
            evaluations,
            cost,
            if converged { " (converged)" } else { "" }
        );

        Ok(OptimizationResult {
            x: population.swap_remove(best),
            cost,
            generations,
            evaluations,
            converged,
        })
    }

    /// Refines a result with projected gradient descent and Armijo
    /// backtracking, keeping every parameter inside its bounds.
    ///
    /// The returned result is never worse than the input.
    pub fn polish<O: Objective>(
        &self,
        objective: &O,
        start: OptimizationResult,
    ) -> OptimizationResult {
        const ARMIJO: f64 = 1e-4;
        const MIN_STEP: f64 = 1e-10;
        const MIN_GAIN: f64 = 1e-12;

        let mut x = start.x.clone();
        let mut cost = start.cost;
        let mut evaluations = start.evaluations;
        let mut step = 1.0;

        for _ in 0..self.config.polish_iterations {
            let grad = self.projected_gradient(&x, objective.gradient(&x));
            if grad.iter().all(|g| g.abs() < 1e-12) {
                break;
            }

            let mut accepted = None;
            while step >= MIN_STEP {
                let stepped: Vec<f64> =
                    x.iter().zip(&grad).map(|(xi, gi)| xi - step * gi).collect();
                let candidate = self.clip(&stepped);
                let decrease: f64 = x
                    .iter()
                    .zip(&candidate)
                    .zip(&grad)
                    .map(|((a, b), g)| g * (a - b))
                    .sum();
                let candidate_cost = objective.cost(&candidate);
                evaluations += 1;
                if candidate_cost.is_finite() && candidate_cost <= cost - ARMIJO * decrease {
                    accepted = Some((candidate, candidate_cost));
                    break;
                }
                step *= 0.5;
            }

            match accepted {
                Some((candidate, candidate_cost)) => {
                    let gain = cost - candidate_cost;
                    x = candidate;
                    cost = candidate_cost;
                    step *= 2.0;
                    if gain < MIN_GAIN {
                        break;
                    }
                }
                None => break,
            }
        }

        if cost < start.cost {
            debug!("[OPTIMIZER] Polish lowered cost {:.6} -> {:.6}", start.cost, cost);
            OptimizationResult { x, cost, evaluations, ..start }
        } else {
            OptimizationResult { evaluations, ..start }
        }
    }

    /// Zeroes gradient components of fixed parameters and of parameters
    /// pressed against a bound.
    fn projected_gradient(&self, x: &[f64], mut grad: Vec<f64>) -> Vec<f64> {
        for ((g, &xi), &(lo, hi)) in grad.iter_mut().zip(x).zip(&self.bounds) {
            let pinned = lo == hi || (xi <= lo && *g > 0.0) || (xi >= hi && *g < 0.0);
            if pinned || !g.is_finite() {
                *g = 0.0;
            }
        }
        grad
    }

    fn clip(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.bounds)
            .map(|(&v, &(lo, hi))| if v.is_finite() { v.clamp(lo, hi) } else { lo })
            .collect()
    }

    /// Box the initial population is drawn from: the bounds, narrowed around
    /// the starting point when one is given.
    fn initial_box(&self, start: Option<&[f64]>) -> Vec<(f64, f64)> {
        let spread = self.config.initial_spread;
        match start {
            Some(x0) if spread > 0.0 => x0
                .iter()
                .zip(&self.bounds)
                .map(|(&x, &(lo, hi))| ((x - spread).max(lo), (x + spread).min(hi)))
                .collect(),
            _ => self.bounds.clone(),
        }
    }

    /// `best + F * (r1 - r2)` crossed over binomially with member `i`.
    fn make_trial(
        &self,
        population: &[Vec<f64>],
        i: usize,
        best: usize,
        scale: f64,
        rng: &mut StdRng,
    ) -> Vec<f64> {
        let pop_size = population.len();
        let dims = self.bounds.len();
        let (r1, r2) = loop {
            let r1 = rng.gen_range(0..pop_size);
            let r2 = rng.gen_range(0..pop_size);
            if r1 != i && r2 != i && r1 != r2 {
                break (r1, r2);
            }
        };

        let mut trial = population[i].clone();
        let forced = rng.gen_range(0..dims);
        for j in 0..dims {
            if j == forced || rng.r#gen::<f64>() < self.config.recombination {
                trial[j] = population[best][j] + scale * (population[r1][j] - population[r2][j]);
            }
        }

        // Out-of-bounds values are resampled uniformly inside the box.
        for (v, &(lo, hi)) in trial.iter_mut().zip(&self.bounds) {
            if !(lo..=hi).contains(v) {
                *v = lo + rng.r#gen::<f64>() * (hi - lo);
            }
        }
        trial
    }

    /// Costs of a batch of candidates; non-finite costs become infinity.
    fn evaluate<O: Objective>(&self, objective: &O, candidates: &[Vec<f64>]) -> Vec<f64> {
        let sanitize = |c: f64| if c.is_finite() { c } else { f64::INFINITY };
        let workers = self.config.workers.max(1).min(candidates.len().max(1));
        if workers <= 1 {
            return candidates.iter().map(|x| sanitize(objective.cost(x))).collect();
        }

        let chunk = candidates.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter().map(|x| sanitize(objective.cost(x))).collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(candidates.chunks(chunk))
                .flat_map(|(handle, part)| {
                    handle.join().unwrap_or_else(|_| vec![f64::INFINITY; part.len()])
                })
                .collect()
        })
    }
}

/// One stratified sample per population member in every dimension.
fn latin_hypercube(bounds: &[(f64, f64)], pop_size: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut population = vec![vec![0.0; bounds.len()]; pop_size];
    let mut strata: Vec<usize> = (0..pop_size).collect();
    for (j, &(lo, hi)) in bounds.iter().enumerate() {
        strata.shuffle(rng);
        for (member, &stratum) in population.iter_mut().zip(&strata) {
            let u = (stratum as f64 + rng.r#gen::<f64>()) / pop_size as f64;
            member[j] = lo + u * (hi - lo);
        }
    }
    population
}

fn best_index(energies: &[f64]) -> usize {
    energies
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoProgress, ProgressReporter};

    /// Shifted sphere with its minimum at 3.0 in every coordinate.
    struct Sphere(usize);

    impl Objective for Sphere {
        fn dimensions(&self) -> usize {
            self.0
        }
        fn cost(&self, x: &[f64]) -> f64 {
            x.iter().map(|v| (v - 3.0).powi(2)).sum()
        }
    }

    struct Degenerate;

    impl Objective for Degenerate {
        fn dimensions(&self) -> usize {
            4
        }
        fn cost(&self, _: &[f64]) -> f64 {
            DEGENERATE_COST
        }
    }

    fn config(seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            seed: Some(seed),
            max_generations: 200,
            population_factor: 15,
            ..OptimizerConfig::default()
        }
    }

    fn run<O: Objective>(
        de: &DifferentialEvolution,
        objective: &O,
    ) -> Result<OptimizationResult, TuningError> {
        let mut sink = NoProgress;
        let mut reporter = ProgressReporter::new(&mut sink);
        let mut span = reporter.span(0.0, 100.0);
        de.minimize(objective, &mut span)
    }

    #[test]
    fn test_finds_sphere_minimum() {
        let config = config(1);
        let de = DifferentialEvolution::new(&config, vec![(-10.0, 10.0); 4]);
        let result = run(&de, &Sphere(4)).unwrap();
        assert!(result.cost < 1e-2, "cost {}", result.cost);
        for v in &result.x {
            assert!((v - 3.0).abs() < 0.1);
        }
    }

    #[test]
    fn test_collapsed_bounds_stay_fixed() {
        let config = config(2);
        let mut bounds = vec![(-10.0, 10.0); 3];
        bounds[1] = (0.0, 0.0);
        let de = DifferentialEvolution::new(&config, bounds);
        let result = run(&de, &Sphere(3)).unwrap();
        assert_eq!(result.x[1], 0.0);
    }

    #[test]
    fn test_respects_bounds() {
        let config = config(3);
        let de = DifferentialEvolution::new(&config, vec![(-1.0, 1.0); 3]);
        let result = run(&de, &Sphere(3)).unwrap();
        assert!(result.x.iter().all(|v| (-1.0..=1.0).contains(v)));
        // Minimum sits on the upper bound
        assert!(result.x.iter().all(|v| *v > 0.9));
    }

    #[test]
    fn test_degenerate_objective_fails() {
        let config = config(4);
        let de = DifferentialEvolution::new(&config, vec![(-1.0, 1.0); 4]);
        assert!(matches!(run(&de, &Degenerate), Err(TuningError::OptimizationFailed(_))));
    }

    #[test]
    fn test_invalid_bounds_fail() {
        let config = config(5);
        let de = DifferentialEvolution::new(&config, vec![(1.0, -1.0); 4]);
        assert!(run(&de, &Sphere(4)).is_err());
        let de = DifferentialEvolution::new(&config, vec![(-1.0, 1.0); 2]);
        assert!(run(&de, &Sphere(4)).is_err());
        let de = DifferentialEvolution::new(&config, vec![(-1.0, 1.0); 4])
            .with_initial_guess(vec![0.0; 3]);
        assert!(run(&de, &Sphere(4)).is_err());
    }

    #[test]
    fn test_workers_give_same_result() {
        let sequential = config(6);
        let threaded = OptimizerConfig { workers: 4, ..config(6) };
        let bounds = vec![(-5.0, 5.0); 3];
        let a = run(&DifferentialEvolution::new(&sequential, bounds.clone()), &Sphere(3)).unwrap();
        let b = run(&DifferentialEvolution::new(&threaded, bounds), &Sphere(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_initial_guess_is_never_beaten_by_worse() {
        let config = OptimizerConfig { max_generations: 1, ..config(7) };
        let de = DifferentialEvolution::new(&config, vec![(-10.0, 10.0); 5])
            .with_initial_guess(vec![3.0; 5]);
        let result = run(&de, &Sphere(5)).unwrap();
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_population_starts_near_initial_guess() {
        let config = OptimizerConfig {
            max_generations: 0,
            initial_spread: 0.5,
            ..config(9)
        };
        let de = DifferentialEvolution::new(&config, vec![(-10.0, 10.0); 4])
            .with_initial_guess(vec![0.0; 4]);
        let result = run(&de, &Sphere(4)).unwrap();
        // Some member close to the guess is already closer to the minimum
        assert!(result.cost < Sphere(4).cost(&[0.0; 4]));
        assert!(result.x.iter().all(|v| (-0.5..=0.5).contains(v)), "{:?}", result.x);
    }

    #[test]
    fn test_polish_reaches_minimum() {
        let config = config(8);
        let de = DifferentialEvolution::new(&config, vec![(-10.0, 10.0); 6]);
        let start = OptimizationResult {
            x: vec![-4.0; 6],
            cost: Sphere(6).cost(&[-4.0; 6]),
            generations: 0,
            evaluations: 0,
            converged: false,
        };
        let polished = de.polish(&Sphere(6), start.clone());
        assert!(polished.cost < 1e-6);
        assert!(polished.evaluations > start.evaluations);
    }
}
