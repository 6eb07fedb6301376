//! # Constraint Module
//!
//! Turns a raw offset vector into a final tuning curve: smooth along the
//! keyboard, clip to the bound, then shift so the reference key sits at
//! exactly 0 cents.

use log::debug;

use crate::config::TuningConfig;

/// Gaussian smoothing along the key axis with mirrored edges.
///
/// The kernel reaches `int(4 * sigma + 0.5)` keys to either side. Edges use
/// the `d c b a | a b c d | d c b a` reflection. A non-positive sigma
/// returns the input unchanged.
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.len() < 2 {
        return values.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * values[reflect(i + k, n)])
                .sum::<f64>()
                / norm
        })
        .collect()
}

fn reflect(mut i: isize, n: isize) -> usize {
    let period = 2 * n;
    i = i.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Clamps every value into `[-bound, bound]`.
pub fn clip(values: &mut [f64], bound: f64) {
    for v in values.iter_mut() {
        *v = v.clamp(-bound, bound);
    }
}

/// Subtracts the reference value from every entry so the reference is 0.
///
/// Applying it to an already locked vector changes nothing.
pub fn lock_reference(values: &mut [f64], reference: usize) {
    let Some(&shift) = values.get(reference) else {
        return;
    };
    if shift == 0.0 {
        return;
    }
    for v in values.iter_mut() {
        *v -= shift;
    }
    values[reference] = 0.0;
}

/// The post-processing applied to every curve the engine returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEnforcer {
    pub sigma: f64,
    pub bound: f64,
    pub reference: usize,
}

impl ConstraintEnforcer {
    pub fn new(config: &TuningConfig, reference: usize) -> Self {
        Self {
            sigma: config.smoothing_sigma,
            bound: config.max_offset_cents,
            reference,
        }
    }

    /// Smooth, clip, lock; clip once more if the lock pushed values out.
    ///
    /// The result has the reference at exactly 0 and every value within the
    /// bound. The second clip can flatten the extremes of a curve that was
    /// shifted against a bound.
    pub fn apply(&self, raw: &[f64]) -> Vec<f64> {
        let mut curve = gaussian_smooth(raw, self.sigma);
        clip(&mut curve, self.bound);
        lock_reference(&mut curve, self.reference);
        if curve.iter().any(|v| v.abs() > self.bound) {
            debug!(
                "[CONSTRAINTS] Reference shift pushed offsets past ±{} cents, re-clipping",
                self.bound
            );
            clip(&mut curve, self.bound);
        }
        curve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer() -> ConstraintEnforcer {
        ConstraintEnforcer::new(&TuningConfig::default(), 48)
    }

    #[test]
    fn test_smoothing_preserves_constants_and_mass() {
        let flat = vec![3.0; 88];
        for v in gaussian_smooth(&flat, 1.5) {
            assert!((v - 3.0).abs() < 1e-12);
        }

        let mut spike = vec![0.0; 88];
        spike[40] = 10.0;
        let smoothed = gaussian_smooth(&spike, 1.5);
        assert!((smoothed.iter().sum::<f64>() - 10.0).abs() < 1e-9);
        assert!(smoothed[40] < 10.0 && smoothed[39] > 0.0);
    }

    #[test]
    fn test_reflect_mode_edges() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(2, 5), 2);
    }

    #[test]
    fn test_linear_ramp_keeps_interior() {
        let ramp: Vec<f64> = (0..88).map(|i| i as f64 * 0.1).collect();
        let smoothed = gaussian_smooth(&ramp, 1.5);
        assert!((smoothed[44] - ramp[44]).abs() < 1e-9);
    }

    #[test]
    fn test_apply_locks_reference_and_bounds() {
        let raw: Vec<f64> = (0..88).map(|i| (i as f64 - 40.0) * 1.5).collect();
        let curve = enforcer().apply(&raw);
        assert_eq!(curve[48], 0.0);
        assert!(curve.iter().all(|v| v.abs() <= 50.0));
    }

    #[test]
    fn test_lock_is_idempotent() {
        let raw: Vec<f64> = (0..88).map(|i| ((i as f64) * 0.2).sin() * 7.0).collect();
        let mut once = raw.clone();
        lock_reference(&mut once, 48);
        let mut twice = once.clone();
        lock_reference(&mut twice, 48);
        assert_eq!(once, twice);
        assert_eq!(once[48], 0.0);
    }

    #[test]
    fn test_extreme_shift_is_reclipped() {
        let mut raw = vec![50.0; 88];
        raw[48] = -50.0;
        let curve = ConstraintEnforcer { sigma: 0.0, bound: 50.0, reference: 48 }.apply(&raw);
        assert_eq!(curve[48], 0.0);
        assert!(curve.iter().all(|v| v.abs() <= 50.0));
        assert_eq!(curve[0], 50.0);
    }
}
