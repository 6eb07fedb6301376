//! Error types for the tuning engine.

use thiserror::Error;

/// Failures that can occur while preparing or running a tuning calculation.
///
/// Only `InvalidProblem` and `InvalidConfig` ever reach a caller. The other
/// variants are routed internally to the fallback estimator and end up as the
/// `reason` of a fallback curve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TuningError {
    /// Fewer keys carry recorded partials than the configured minimum.
    #[error("only {recorded} keys have recorded partials, at least {required} are needed")]
    InsufficientData { recorded: usize, required: usize },

    /// The global search could not produce a finite-cost solution.
    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    /// The recorded input does not describe a valid 88-key problem.
    #[error("invalid tuning problem: {0}")]
    InvalidProblem(String),

    /// A configuration value is out of its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
