//! # Fallback Module
//!
//! A deterministic tuning curve built from the recorded fundamentals alone:
//! each recorded key keeps its measured deviation from ET, the gaps are
//! filled by linear interpolation, and the result goes through the same
//! constraints as an optimized curve. Used when there is too little data or
//! the optimizer gives up. Never fails.

use log::debug;

use crate::config::TuningConfig;
use crate::constraints::ConstraintEnforcer;
use crate::problem::TuningProblem;

/// `(key index, cents)` for every recorded key, clipped to `±bound`.
pub fn recorded_deviations(problem: &TuningProblem, bound: f64) -> Vec<(usize, f64)> {
    problem
        .recorded_keys()
        .filter_map(|key| {
            let cents = key.recorded_deviation_cents()?;
            cents.is_finite().then(|| (key.index, cents.clamp(-bound, bound)))
        })
        .collect()
}

/// Piecewise-linear interpolation over key indices.
///
/// `points` must be sorted by index. Values before the first and after the
/// last point are held constant. Fewer than two points give all zeros.
pub fn interpolate(points: &[(usize, f64)], len: usize) -> Vec<f64> {
    if points.len() < 2 {
        return vec![0.0; len];
    }
    let (first_index, first_value) = points[0];
    let (last_index, last_value) = points[points.len() - 1];

    (0..len)
        .map(|i| {
            if i <= first_index {
                return first_value;
            }
            if i >= last_index {
                return last_value;
            }
            let upper = points.partition_point(|&(k, _)| k < i);
            let (k1, v1) = points[upper];
            if k1 == i {
                return v1;
            }
            let (k0, v0) = points[upper - 1];
            let t = (i - k0) as f64 / (k1 - k0) as f64;
            v0 + t * (v1 - v0)
        })
        .collect()
}

/// Builds the fallback curve for a problem.
///
/// Uses the inharmonicity coefficients already attached to the problem to
/// recover fundamentals of keys recorded without an n=1 partial.
pub fn estimate(problem: &TuningProblem, config: &TuningConfig) -> Vec<f64> {
    let points = recorded_deviations(problem, config.max_offset_cents);
    debug!("[FALLBACK] Interpolating {} recorded deviations", points.len());
    let raw = interpolate(&points, problem.len());
    ConstraintEnforcer::new(config, problem.reference_key).apply(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Partial;
    use crate::tuning::{apply_cents, theoretical_frequency};

    fn record_deviation(problem: &mut TuningProblem, index: usize, cents: f64) {
        let f = apply_cents(theoretical_frequency(index), cents);
        problem.record(index, vec![Partial::new(1, f, 1.0)]).unwrap();
    }

    #[test]
    fn test_interpolation() {
        let points = [(2, 0.0), (6, 4.0), (8, -2.0)];
        let curve = interpolate(&points, 10);
        assert_eq!(curve, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 1.0, -2.0, -2.0]);
        assert_eq!(interpolate(&[(3, 5.0)], 4), vec![0.0; 4]);
    }

    #[test]
    fn test_no_recordings_is_equal_temperament() {
        let curve = estimate(&TuningProblem::default(), &TuningConfig::default());
        assert_eq!(curve, vec![0.0; 88]);
    }

    #[test]
    fn test_follows_recorded_stretch() {
        let mut problem = TuningProblem::default();
        for (index, cents) in [(12, -6.0), (30, -2.0), (48, 0.0), (66, 3.0), (84, 10.0)] {
            record_deviation(&mut problem, index, cents);
        }
        let curve = estimate(&problem, &TuningConfig::default());
        assert_eq!(curve[48], 0.0);
        assert!(curve[12] < -4.0);
        assert!(curve[84] > 8.0);
        assert!(curve.windows(2).all(|w| w[1] >= w[0] - 1e-9), "curve should stay monotonic");
    }

    #[test]
    fn test_is_deterministic_and_clipped() {
        let mut problem = TuningProblem::default();
        record_deviation(&mut problem, 10, -300.0);
        record_deviation(&mut problem, 70, 20.0);
        let config = TuningConfig::default();
        let a = estimate(&problem, &config);
        let b = estimate(&problem, &config);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 50.0));
        assert_eq!(a[48], 0.0);
    }
}
