//! # Tuning Engine Module
//!
//! Runs a complete entropy tuning calculation:
//!
//! 1. Estimate inharmonicity for every recorded key
//! 2. Route to the fallback curve when too few keys are recorded
//! 3. Minimize the entropy objective with differential evolution
//! 4. Polish, smooth, clip and lock the reference key
//! 5. Fall back to the interpolated curve if the search fails
//!
//! Either way the caller gets a complete 88-key [`TuningCurve`]; its
//! [`TuningMethod`] says which path produced it.

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::TuningConfig;
use crate::constraints::ConstraintEnforcer;
use crate::entropy::EntropyObjective;
use crate::error::TuningError;
use crate::fallback;
use crate::inharmonicity;
use crate::optimizer::{DifferentialEvolution, Objective};
use crate::problem::TuningProblem;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::tuning;

/// Final tuning of a single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTuning {
    pub index: usize,
    pub name: String,
    pub theoretical_frequency: f64,
    /// Offset from equal temperament in cents.
    pub offset_cents: f64,
    /// `theoretical_frequency * 2^(offset / 1200)`
    pub frequency: f64,
    /// How far the recorded fundamental is from the target, in cents.
    pub recorded_deviation_cents: Option<f64>,
    pub inharmonicity: Option<f64>,
}

/// Why the fallback curve was used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    InsufficientData { recorded: usize, required: usize },
    OptimizationFailed { message: String },
}

impl From<TuningError> for FallbackReason {
    fn from(err: TuningError) -> Self {
        match err {
            TuningError::InsufficientData { recorded, required } => {
                FallbackReason::InsufficientData { recorded, required }
            }
            other => FallbackReason::OptimizationFailed { message: other.to_string() },
        }
    }
}

/// Which path produced a curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TuningMethod {
    Optimized,
    Fallback { reason: FallbackReason },
}

impl fmt::Display for TuningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuningMethod::Optimized => write!(f, "optimized"),
            TuningMethod::Fallback { reason } => match reason {
                FallbackReason::InsufficientData { recorded, required } => {
                    write!(f, "fallback: {recorded} of {required} required keys recorded")
                }
                FallbackReason::OptimizationFailed { message } => write!(f, "fallback: {message}"),
            },
        }
    }
}

/// Search statistics of an optimized curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    /// Best objective value before smoothing and locking.
    pub cost: f64,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// The complete result of a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningCurve {
    pub reference_key: usize,
    pub method: TuningMethod,
    pub search: Option<SearchSummary>,
    pub keys: Vec<KeyTuning>,
}

impl TuningCurve {
    /// Pairs final offsets with the problem's keys.
    pub fn from_offsets(problem: &TuningProblem, offsets: &[f64], method: TuningMethod) -> Self {
        let keys = problem
            .keys
            .iter()
            .zip(offsets)
            .map(|(key, &offset)| {
                let frequency = tuning::apply_cents(key.theoretical_frequency, offset);
                KeyTuning {
                    index: key.index,
                    name: key.name.clone(),
                    theoretical_frequency: key.theoretical_frequency,
                    offset_cents: offset,
                    frequency,
                    recorded_deviation_cents: key
                        .recorded_fundamental()
                        .map(|f| tuning::cents_between(f, frequency)),
                    inharmonicity: key.inharmonicity,
                }
            })
            .collect();
        Self {
            reference_key: problem.reference_key,
            method,
            search: None,
            keys,
        }
    }

    pub fn offsets(&self) -> Vec<f64> {
        self.keys.iter().map(|k| k.offset_cents).collect()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.keys.iter().map(|k| k.frequency).collect()
    }

    pub fn is_optimized(&self) -> bool {
        self.method == TuningMethod::Optimized
    }
}

/// A validated problem and configuration, ready to run.
pub struct TuningEngine {
    problem: TuningProblem,
    config: TuningConfig,
}

impl TuningEngine {
    /// Validates the inputs. This is the only fallible step.
    pub fn new(problem: TuningProblem, config: TuningConfig) -> Result<Self, TuningError> {
        problem.validate()?;
        config.validate()?;
        Ok(Self { problem, config })
    }

    pub fn problem(&self) -> &TuningProblem {
        &self.problem
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// Runs the entropy minimization.
    pub fn run(&self, sink: &mut dyn ProgressSink) -> TuningCurve {
        self.run_with_objective(sink, EntropyObjective::new)
    }

    /// Runs the calculation with a custom objective built from the prepared
    /// problem (inharmonicity already estimated).
    pub fn run_with_objective<O, F>(
        &self,
        sink: &mut dyn ProgressSink,
        build_objective: F,
    ) -> TuningCurve
    where
        O: Objective,
        F: FnOnce(&TuningProblem, &TuningConfig) -> O,
    {
        let mut progress = ProgressReporter::new(sink);
        progress.report(0.0, "Initializing entropy calculation...");

        let mut problem = self.problem.clone();
        let estimated = inharmonicity::estimate_all(&mut problem, &self.config.inharmonicity);
        let recorded = problem.recorded_count();
        info!(
            "[ENGINE] {} recorded keys, {} with an inharmonicity coefficient",
            recorded, estimated
        );

        let curve = if recorded < self.config.min_recorded_keys {
            let err = TuningError::InsufficientData {
                recorded,
                required: self.config.min_recorded_keys,
            };
            warn!("[ENGINE] {err}, using fallback curve");
            progress.report(50.0, "Insufficient data - using fallback curve");
            self.fallback_curve(&problem, err)
        } else {
            progress.report(5.0, format!("Found {recorded} recorded keys"));
            progress.report(10.0, "Estimated inharmonicity coefficients");
            self.optimize(&problem, &mut progress, build_objective)
        };

        progress.report(100.0, "Entropy tuning calculation complete");
        progress.finish(curve.clone());
        curve
    }

    fn optimize<O, F>(
        &self,
        problem: &TuningProblem,
        progress: &mut ProgressReporter<'_>,
        build_objective: F,
    ) -> TuningCurve
    where
        O: Objective,
        F: FnOnce(&TuningProblem, &TuningConfig) -> O,
    {
        progress.report(15.0, "Setting up optimization problem...");
        let bound = self.config.max_offset_cents;
        let mut bounds = vec![(-bound, bound); problem.len()];
        if self.config.optimizer.lock_reference_during_search {
            bounds[problem.reference_key] = (0.0, 0.0);
        }
        let objective = build_objective(problem, &self.config);
        let search = DifferentialEvolution::new(&self.config.optimizer, bounds)
            .with_initial_guess(vec![0.0; problem.len()]);

        progress.report(20.0, "Starting optimization...");
        let outcome = {
            let mut span = progress.span(20.0, 80.0);
            search.minimize(&objective, &mut span)
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!("[ENGINE] {err}, using fallback curve");
                progress.report(80.0, format!("{err}, using fallback"));
                return self.fallback_curve(problem, err);
            }
        };
        progress.report(80.0, "Optimization complete");

        let result = if self.config.optimizer.polish {
            progress.report(80.0, "Polishing tuning curve...");
            search.polish(&objective, result)
        } else {
            result
        };

        progress.report(85.0, "Applying tuning curve...");
        let offsets = ConstraintEnforcer::new(&self.config, problem.reference_key).apply(&result.x);
        let mut curve = TuningCurve::from_offsets(problem, &offsets, TuningMethod::Optimized);
        curve.search = Some(SearchSummary {
            cost: result.cost,
            generations: result.generations,
            evaluations: result.evaluations,
            converged: result.converged,
        });
        curve
    }

    fn fallback_curve(&self, problem: &TuningProblem, err: TuningError) -> TuningCurve {
        let offsets = fallback::estimate(problem, &self.config);
        TuningCurve::from_offsets(problem, &offsets, TuningMethod::Fallback { reason: err.into() })
    }
}

/// Convenience wrapper: validate, then run the entropy minimization.
pub fn calculate(
    problem: &TuningProblem,
    config: &TuningConfig,
    sink: &mut dyn ProgressSink,
) -> Result<TuningCurve, TuningError> {
    Ok(TuningEngine::new(problem.clone(), config.clone())?.run(sink))
}
