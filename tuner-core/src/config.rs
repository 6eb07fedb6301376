//! # Configuration Module
//!
//! All tunable constants of the engine, with defaults matching the reference
//! algorithm. Every section is `#[serde(default)]`, so a configuration file
//! only needs to name the values it overrides.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TuningError;

/// Top-level configuration consumed by the tuning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Minimum number of recorded keys needed to run the optimizer.
    pub min_recorded_keys: usize,
    /// Symmetric per-key bound on the offset, in cents.
    pub max_offset_cents: f64,
    /// Sigma of the post-processing smoothing, in keys.
    pub smoothing_sigma: f64,
    /// Weight of the squared neighbour-difference penalty.
    pub smoothness_weight: f64,
    /// Weight of the squared offset (distance from ET) penalty.
    pub et_weight: f64,
    pub inharmonicity: InharmonicityConfig,
    pub spectrum: SpectrumConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            min_recorded_keys: 5,
            max_offset_cents: 50.0,
            smoothing_sigma: 1.5,
            smoothness_weight: 0.01,
            et_weight: 0.001,
            inharmonicity: InharmonicityConfig::default(),
            spectrum: SpectrumConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// How per-partial B estimates are combined into one coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InharmonicityMethod {
    /// Median of the per-partial closed-form estimates.
    Median,
    /// Amplitude-weighted mean of the per-partial estimates.
    WeightedMean,
    /// Least-squares fit of (f_n/n)^2 against n^2.
    Regression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InharmonicityConfig {
    pub method: InharmonicityMethod,
    /// Smallest plausible coefficient; combined estimates are clamped up to it.
    pub b_min: f64,
    /// Largest plausible coefficient. Per-partial estimates above it are
    /// discarded, combined estimates are clamped down to it.
    pub b_max: f64,
}

impl Default for InharmonicityConfig {
    fn default() -> Self {
        Self {
            method: InharmonicityMethod::Median,
            b_min: 1e-5,
            b_max: 1e-2,
        }
    }
}

/// Frequency axis and peak shape of the synthesized spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub min_frequency: f64,
    pub max_frequency: f64,
    /// Bin spacing in Hz.
    pub resolution: f64,
    /// Gaussian sigma in Hz is `peak_width_base + peak_width_per_partial * n`.
    pub peak_width_base: f64,
    pub peak_width_per_partial: f64,
    /// Gaussians are truncated this many sigmas away from their centre.
    pub peak_extent_sigmas: f64,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            min_frequency: 20.0,
            max_frequency: 10_000.0,
            resolution: 0.1,
            peak_width_base: 0.5,
            peak_width_per_partial: 0.1,
            peak_extent_sigmas: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of generations.
    pub max_generations: usize,
    /// Population size is this factor times the number of dimensions.
    pub population_factor: usize,
    /// Relative convergence tolerance on the population's cost spread.
    pub tolerance: f64,
    /// Absolute convergence tolerance on the population's cost spread.
    pub absolute_tolerance: f64,
    /// Differential weight, dithered uniformly in `[min, max)` per generation.
    pub mutation: (f64, f64),
    /// Crossover probability.
    pub recombination: f64,
    /// Half-width (cents) of the box around the starting curve that the
    /// initial population is drawn from. 0 spreads it over the full bounds.
    pub initial_spread: f64,
    /// Seed for the random search. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Threads used to evaluate a generation's candidates.
    pub workers: usize,
    /// Run a bounded gradient refinement on the best member afterwards.
    pub polish: bool,
    pub polish_iterations: usize,
    /// Collapse the reference key's bounds to zero during the search.
    pub lock_reference_during_search: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_generations: 50,
            population_factor: 10,
            tolerance: 0.01,
            absolute_tolerance: 0.0,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            initial_spread: 0.05,
            seed: None,
            workers: 1,
            polish: true,
            polish_iterations: 100,
            lock_reference_during_search: true,
        }
    }
}

impl TuningConfig {
    /// Loads a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Self =
            serde_json::from_str(&contents).context("Failed to parse JSON configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }

    /// Checks every value for range and finiteness.
    pub fn validate(&self) -> Result<(), TuningError> {
        fn check(ok: bool, what: &str) -> Result<(), TuningError> {
            if ok {
                Ok(())
            } else {
                Err(TuningError::InvalidConfig(what.to_string()))
            }
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        check(
            self.max_offset_cents.is_finite() && self.max_offset_cents > 0.0,
            "max_offset_cents must be positive",
        )?;
        check(non_negative(self.smoothing_sigma), "smoothing_sigma must be >= 0")?;
        check(non_negative(self.smoothness_weight), "smoothness_weight must be >= 0")?;
        check(non_negative(self.et_weight), "et_weight must be >= 0")?;

        let inh = &self.inharmonicity;
        check(
            non_negative(inh.b_min) && inh.b_max.is_finite() && inh.b_min <= inh.b_max,
            "inharmonicity bounds must satisfy 0 <= b_min <= b_max",
        )?;

        let sp = &self.spectrum;
        check(
            non_negative(sp.min_frequency)
                && sp.max_frequency.is_finite()
                && sp.min_frequency < sp.max_frequency,
            "spectrum frequency range is empty",
        )?;
        check(
            sp.resolution.is_finite() && sp.resolution > 0.0,
            "spectrum resolution must be positive",
        )?;
        check(
            non_negative(sp.peak_width_base)
                && non_negative(sp.peak_width_per_partial)
                && sp.peak_width_base + sp.peak_width_per_partial > 0.0,
            "peak width must be positive",
        )?;
        check(
            sp.peak_extent_sigmas.is_finite() && sp.peak_extent_sigmas > 0.0,
            "peak_extent_sigmas must be positive",
        )?;

        let opt = &self.optimizer;
        check(opt.population_factor > 0, "population_factor must be at least 1")?;
        check(non_negative(opt.tolerance), "tolerance must be >= 0")?;
        check(non_negative(opt.absolute_tolerance), "absolute_tolerance must be >= 0")?;
        check(non_negative(opt.initial_spread), "initial_spread must be >= 0")?;
        check(
            non_negative(opt.mutation.0)
                && opt.mutation.1.is_finite()
                && opt.mutation.0 <= opt.mutation.1,
            "mutation range must satisfy 0 <= min <= max",
        )?;
        check(
            (0.0..=1.0).contains(&opt.recombination),
            "recombination must lie in [0, 1]",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TuningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_recorded_keys, 5);
        assert_eq!(config.optimizer.max_generations, 50);
        assert_eq!(config.optimizer.population_factor, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "smoothing_sigma": 2.0, "optimizer": { "seed": 7 } }"#;
        let config: TuningConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.smoothing_sigma, 2.0);
        assert_eq!(config.optimizer.seed, Some(7));
        assert_eq!(config.optimizer.tolerance, 0.01);
        assert_eq!(config.spectrum, SpectrumConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TuningConfig::default();
        config.max_offset_cents = 0.0;
        assert!(matches!(config.validate(), Err(TuningError::InvalidConfig(_))));

        let mut config = TuningConfig::default();
        config.spectrum.max_frequency = 10.0;
        assert!(config.validate().is_err());

        let mut config = TuningConfig::default();
        config.optimizer.recombination = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = TuningConfig::default();
        config.inharmonicity.method = InharmonicityMethod::Regression;
        config.save(&path).unwrap();
        assert_eq!(TuningConfig::load(&path).unwrap(), config);
    }
}
