//! # Entropy Objective Module
//!
//! The scalar cost minimized by the optimizer:
//!
//! `cost = S + w_smooth * Σ (o[i+1] - o[i])^2 + w_et * Σ o[i]^2`
//!
//! where `S = -Σ P(x) ln P(x)` is the Shannon entropy of the synthesized
//! spectrum normalized to a probability distribution. Aligned partials pile
//! up into fewer, taller peaks and lower the entropy.

use crate::config::TuningConfig;
use crate::optimizer::Objective;
use crate::problem::TuningProblem;
use crate::spectrum::{Spectrum, SpectrumModel};

/// Cost returned for a spectrum with nothing to normalize.
pub const DEGENERATE_COST: f64 = 1e10;

/// Offset step (cents) of the finite-difference entropy gradient.
const GRADIENT_STEP: f64 = 0.01;

/// Shannon entropy of a spectrum, `None` when it sums to zero or is not finite.
pub fn spectral_entropy(spectrum: &Spectrum) -> Option<f64> {
    let total = spectrum.total();
    if !total.is_finite() || total <= f64::MIN_POSITIVE {
        return None;
    }
    let entropy = -spectrum
        .power
        .iter()
        .map(|&v| v / total)
        .filter(|&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>();
    entropy.is_finite().then_some(entropy)
}

/// `weight * Σ (o[i+1] - o[i])^2`
pub fn smoothness_penalty(offsets: &[f64], weight: f64) -> f64 {
    weight * offsets.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>()
}

/// `weight * Σ o[i]^2`
pub fn et_penalty(offsets: &[f64], weight: f64) -> f64 {
    weight * offsets.iter().map(|o| o * o).sum::<f64>()
}

/// Entropy plus regularization, as a pure function of the offset vector.
#[derive(Debug, Clone)]
pub struct EntropyObjective {
    model: SpectrumModel,
    dimensions: usize,
    smoothness_weight: f64,
    et_weight: f64,
    contributing: Vec<usize>,
}

impl EntropyObjective {
    pub fn new(problem: &TuningProblem, config: &TuningConfig) -> Self {
        let model = SpectrumModel::new(problem, &config.spectrum);
        let contributing = model.contributing_keys().collect();
        Self {
            model,
            dimensions: problem.len(),
            smoothness_weight: config.smoothness_weight,
            et_weight: config.et_weight,
            contributing,
        }
    }

    pub fn model(&self) -> &SpectrumModel {
        &self.model
    }

    /// Spectral entropy alone, `None` for a degenerate spectrum.
    pub fn entropy(&self, offsets: &[f64]) -> Option<f64> {
        spectral_entropy(&self.model.synthesize(offsets))
    }

    pub fn penalty(&self, offsets: &[f64]) -> f64 {
        smoothness_penalty(offsets, self.smoothness_weight) + et_penalty(offsets, self.et_weight)
    }

    fn penalty_gradient(&self, offsets: &[f64]) -> Vec<f64> {
        let n = offsets.len();
        let mut grad: Vec<f64> = offsets.iter().map(|o| 2.0 * self.et_weight * o).collect();
        for i in 0..n.saturating_sub(1) {
            let d = 2.0 * self.smoothness_weight * (offsets[i + 1] - offsets[i]);
            grad[i] -= d;
            grad[i + 1] += d;
        }
        grad
    }
}

impl Objective for EntropyObjective {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn cost(&self, offsets: &[f64]) -> f64 {
        match self.entropy(offsets) {
            Some(entropy) => entropy + self.penalty(offsets),
            None => DEGENERATE_COST,
        }
    }

    /// Analytic penalty gradient plus a central-difference entropy gradient.
    ///
    /// The entropy only depends on keys that contribute partials, so only
    /// those coordinates are differenced.
    fn gradient(&self, offsets: &[f64]) -> Vec<f64> {
        let mut grad = self.penalty_gradient(offsets);
        if self.entropy(offsets).is_none() {
            return grad;
        }
        let mut probe = offsets.to_vec();
        for &i in &self.contributing {
            let original = probe[i];
            probe[i] = original + GRADIENT_STEP;
            let up = self.entropy(&probe);
            probe[i] = original - GRADIENT_STEP;
            let down = self.entropy(&probe);
            probe[i] = original;
            if let (Some(up), Some(down)) = (up, down) {
                grad[i] += (up - down) / (2.0 * GRADIENT_STEP);
            }
        }
        grad
    }
}
