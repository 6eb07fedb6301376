//! # Inharmonicity Module
//!
//! Estimates the stiffness coefficient B of each recorded string from the
//! stiff-string model `f_n = n * f0 * sqrt(1 + B * n^2)`.
//!
//! Each partial n >= 2 gives a closed-form estimate
//! `B_n = ((f_n / (n * f0))^2 - 1) / n^2`; the estimates are then combined
//! according to [`InharmonicityMethod`] to suppress measurement noise.

use linreg::linear_regression;
use log::debug;

use crate::config::{InharmonicityConfig, InharmonicityMethod};
use crate::problem::{Key, TuningProblem};

/// Computes B for a single key.
///
/// Returns `None` for fewer than two partials or when no per-partial estimate
/// is physically plausible. Never fails.
pub fn estimate(key: &Key, config: &InharmonicityConfig) -> Option<f64> {
    if key.partials.len() < 2 {
        return None;
    }

    let f0 = key
        .partials
        .iter()
        .find(|p| p.number == 1)
        .map(|p| p.frequency)
        .unwrap_or(key.theoretical_frequency);

    // (B_n, amplitude) for every usable overtone
    let estimates: Vec<(f64, f64)> = key
        .partials
        .iter()
        .filter(|p| p.number >= 2)
        .filter_map(|p| {
            let n = p.number as f64;
            let ratio = p.frequency / (n * f0);
            let b = (ratio * ratio - 1.0) / (n * n);
            (b.is_finite() && b > 0.0 && b <= config.b_max).then_some((b, p.amplitude.max(0.0)))
        })
        .collect();

    if estimates.is_empty() {
        debug!("[INHARMONICITY] {}: no plausible estimate", key.name);
        return None;
    }

    let combined = match config.method {
        InharmonicityMethod::Median => median(estimates.iter().map(|(b, _)| *b).collect()),
        InharmonicityMethod::WeightedMean => weighted_mean(&estimates),
        InharmonicityMethod::Regression => regression(key).unwrap_or_else(|| {
            median(estimates.iter().map(|(b, _)| *b).collect())
        }),
    };

    if !combined.is_finite() {
        return None;
    }
    Some(combined.clamp(config.b_min, config.b_max))
}

/// Writes a coefficient onto every key of the problem.
///
/// Keys with fewer than two partials end up with `None`. Returns how many
/// keys received a coefficient.
pub fn estimate_all(problem: &mut TuningProblem, config: &InharmonicityConfig) -> usize {
    let mut count = 0;
    for key in problem.keys.iter_mut() {
        key.inharmonicity = estimate(key, config);
        if let Some(b) = key.inharmonicity {
            count += 1;
            debug!("[INHARMONICITY] {}: B = {:.6}", key.name, b);
        }
    }
    count
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn weighted_mean(estimates: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = estimates.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return estimates.iter().map(|(b, _)| b).sum::<f64>() / estimates.len() as f64;
    }
    estimates.iter().map(|(b, w)| b * w).sum::<f64>() / total_weight
}

/// Fits `(f_n / n)^2 = f0^2 + f0^2 * B * n^2`, so B = slope / intercept.
fn regression(key: &Key) -> Option<f64> {
    if key.partials.len() < 3 {
        return None; // Need at least 3 points for a meaningful regression
    }

    // x = n^2, y = (f_n / n)^2
    let (xs, ys): (Vec<f64>, Vec<f64>) = key
        .partials
        .iter()
        .map(|p| {
            let n = p.number as f64;
            let f_n = p.frequency;
            (n * n, (f_n / n) * (f_n / n))
        })
        .unzip();

    let (slope, intercept) = linear_regression::<_, _, f64>(&xs, &ys).ok()?;
    if intercept.abs() > 1e-6 {
        let b = slope / intercept;
        (b.is_finite() && b > 0.0).then_some(b)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Partial;

    // The n=1 partial is taken as f0 itself, overtones follow the stiff-string model.
    fn stiff_partials(f0: f64, b: f64, count: u32) -> Vec<Partial> {
        (1..=count)
            .map(|n| {
                let nf = n as f64;
                let frequency = if n == 1 { f0 } else { nf * f0 * (1.0 + b * nf * nf).sqrt() };
                Partial::new(n, frequency, 1.0 / nf)
            })
            .collect()
    }

    fn key_with(index: usize, partials: Vec<Partial>) -> Key {
        let mut problem = TuningProblem::default();
        problem.record(index, partials).unwrap();
        problem.keys[index].clone()
    }

    #[test]
    fn test_recovers_b_with_every_method() {
        let key = key_with(24, stiff_partials(110.0, 0.0008, 6));
        for method in [
            InharmonicityMethod::Median,
            InharmonicityMethod::WeightedMean,
            InharmonicityMethod::Regression,
        ] {
            let config = InharmonicityConfig { method, ..Default::default() };
            let b = estimate(&key, &config).unwrap();
            assert!((b - 0.0008).abs() < 0.0008 * 0.05, "{method:?} gave {b}");
        }
    }

    #[test]
    fn test_single_partial_has_no_coefficient() {
        let key = key_with(30, vec![Partial::new(1, 155.6, 1.0)]);
        assert_eq!(estimate(&key, &InharmonicityConfig::default()), None);
    }

    #[test]
    fn test_uses_theoretical_fundamental_without_first_partial() {
        let f0 = crate::tuning::theoretical_frequency(60);
        let partials = stiff_partials(f0, 0.0002, 4).into_iter().skip(1).collect();
        let key = key_with(60, partials);
        let b = estimate(&key, &InharmonicityConfig::default()).unwrap();
        assert!((b - 0.0002).abs() < 1e-7);
    }

    #[test]
    fn test_discards_implausible_estimates() {
        // A flat overtone and a wildly sharp one: both rejected.
        let key = key_with(
            48,
            vec![
                Partial::new(1, 440.0, 1.0),
                Partial::new(2, 870.0, 0.5),
                Partial::new(3, 1600.0, 0.3),
            ],
        );
        assert_eq!(estimate(&key, &InharmonicityConfig::default()), None);
    }

    #[test]
    fn test_clamps_to_plausible_floor() {
        let key = key_with(70, stiff_partials(crate::tuning::theoretical_frequency(70), 1e-7, 3));
        let b = estimate(&key, &InharmonicityConfig::default()).unwrap();
        assert_eq!(b, 1e-5);
    }

    #[test]
    fn test_estimate_all_writes_onto_keys() {
        let mut problem = TuningProblem::default();
        problem.record(24, stiff_partials(110.0, 0.0008, 5)).unwrap();
        problem.record(30, vec![Partial::new(1, 155.6, 1.0)]).unwrap();
        let count = estimate_all(&mut problem, &InharmonicityConfig::default());
        assert_eq!(count, 1);
        assert!(problem.keys[24].inharmonicity.is_some());
        assert!(problem.keys[30].inharmonicity.is_none());
    }
}
