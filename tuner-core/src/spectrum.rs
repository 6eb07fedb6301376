//! # Spectrum Synthesis Module
//!
//! Builds the combined power spectrum the piano would produce if every
//! recorded key were retuned by a candidate offset vector and all of them
//! sounded at once. Each partial becomes a Gaussian bump on a shared, fixed
//! frequency axis; contributions are summed.

use crate::config::SpectrumConfig;
use crate::problem::TuningProblem;
use crate::tuning;

/// A uniformly sampled frequency axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyAxis {
    min: f64,
    max: f64,
    resolution: f64,
    bins: usize,
}

impl FrequencyAxis {
    pub fn new(min: f64, max: f64, resolution: f64) -> Self {
        let bins = ((max - min) / resolution).ceil().max(0.0) as usize;
        Self { min, max, resolution, bins }
    }

    pub fn from_config(config: &SpectrumConfig) -> Self {
        Self::new(config.min_frequency, config.max_frequency, config.resolution)
    }

    pub fn len(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.bins == 0
    }

    /// Centre frequency of bin `i`.
    pub fn frequency(&self, i: usize) -> f64 {
        self.min + i as f64 * self.resolution
    }

    pub fn contains(&self, frequency: f64) -> bool {
        frequency >= self.min && frequency < self.max
    }

    /// Nearest bin of a frequency inside the axis.
    pub fn bin_of(&self, frequency: f64) -> Option<usize> {
        if !self.contains(frequency) {
            return None;
        }
        let i = ((frequency - self.min) / self.resolution).round() as usize;
        Some(i.min(self.bins.saturating_sub(1)))
    }
}

/// Accumulated power over a [`FrequencyAxis`].
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub power: Vec<f64>,
}

impl Spectrum {
    pub fn zeros(len: usize) -> Self {
        Self { power: vec![0.0; len] }
    }

    pub fn total(&self) -> f64 {
        self.power.iter().sum()
    }

    /// Adds a Gaussian of the given height centred on `centre`, truncated at
    /// `extent` sigmas. Centres outside the axis contribute nothing.
    fn add_gaussian(
        &mut self,
        axis: &FrequencyAxis,
        centre: f64,
        sigma: f64,
        height: f64,
        extent: f64,
    ) {
        if !axis.contains(centre) || height <= 0.0 || self.power.is_empty() {
            return;
        }
        let reach = extent * sigma;
        let last = self.power.len() - 1;
        let lo = ((centre - reach - axis.min) / axis.resolution).ceil().max(0.0) as usize;
        let hi = ((centre + reach - axis.min) / axis.resolution).floor().max(0.0) as usize;
        let hi = hi.min(last);
        for i in lo..=hi {
            let z = (axis.frequency(i) - centre) / sigma;
            self.power[i] += height * (-0.5 * z * z).exp();
        }
    }
}

/// One recorded partial, reduced to what synthesis needs.
#[derive(Debug, Clone)]
struct PartialSource {
    /// `n * sqrt(1 + B n^2)`: partial frequency divided by the fundamental.
    ratio: f64,
    amplitude: f64,
    sigma: f64,
}

#[derive(Debug, Clone)]
struct KeySource {
    index: usize,
    theoretical_frequency: f64,
    partials: Vec<PartialSource>,
}

/// Synthesizes spectra for candidate offset vectors.
///
/// Holds only read-only data derived from the problem, so one model can be
/// shared between threads evaluating different candidates.
#[derive(Debug, Clone)]
pub struct SpectrumModel {
    axis: FrequencyAxis,
    extent: f64,
    sources: Vec<KeySource>,
}

impl SpectrumModel {
    /// Precomputes the partial ratios of every recorded key.
    ///
    /// Keys without a coefficient use the harmonic model (B = 0).
    pub fn new(problem: &TuningProblem, config: &SpectrumConfig) -> Self {
        let sources = problem
            .recorded_keys()
            .map(|key| {
                let b = key.effective_inharmonicity();
                let partials = key
                    .partials
                    .iter()
                    .map(|p| {
                        let n = p.number as f64;
                        PartialSource {
                            ratio: n * (1.0 + b * n * n).sqrt(),
                            amplitude: p.amplitude.max(0.0),
                            sigma: config.peak_width_base + config.peak_width_per_partial * n,
                        }
                    })
                    .collect();
                KeySource {
                    index: key.index,
                    theoretical_frequency: key.theoretical_frequency,
                    partials,
                }
            })
            .collect();

        Self {
            axis: FrequencyAxis::from_config(config),
            extent: config.peak_extent_sigmas,
            sources,
        }
    }

    pub fn axis(&self) -> &FrequencyAxis {
        &self.axis
    }

    /// Indices of the keys that add partials to the spectrum.
    pub fn contributing_keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources.iter().map(|s| s.index)
    }

    /// Builds a fresh spectrum for `offsets` (cents per key, indexed by key).
    pub fn synthesize(&self, offsets: &[f64]) -> Spectrum {
        let mut spectrum = Spectrum::zeros(self.axis.len());
        for source in &self.sources {
            let offset = offsets.get(source.index).copied().unwrap_or(0.0);
            let fundamental = tuning::apply_cents(source.theoretical_frequency, offset);
            for p in &source.partials {
                let centre = fundamental * p.ratio;
                spectrum.add_gaussian(&self.axis, centre, p.sigma, p.amplitude, self.extent);
            }
        }
        spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Partial;

    fn small_config() -> SpectrumConfig {
        SpectrumConfig {
            min_frequency: 20.0,
            max_frequency: 2000.0,
            ..SpectrumConfig::default()
        }
    }

    #[test]
    fn test_axis_bins() {
        let axis = FrequencyAxis::new(20.0, 10_000.0, 0.1);
        assert_eq!(axis.len(), 99_800);
        assert_eq!(axis.bin_of(440.0), Some(4200));
        assert_eq!(axis.bin_of(10.0), None);
        assert_eq!(axis.bin_of(10_000.0), None);
    }

    #[test]
    fn test_empty_problem_gives_zero_spectrum() {
        let model = SpectrumModel::new(&TuningProblem::default(), &small_config());
        let spectrum = model.synthesize(&[0.0; 88]);
        assert_eq!(spectrum.total(), 0.0);
        assert_eq!(model.contributing_keys().count(), 0);
    }

    #[test]
    fn test_peak_lands_on_offset_frequency() {
        let mut problem = TuningProblem::default();
        problem.record(48, vec![Partial::new(1, 440.0, 2.0)]).unwrap();
        let model = SpectrumModel::new(&problem, &small_config());

        let mut offsets = vec![0.0; 88];
        offsets[48] = 10.0;
        let spectrum = model.synthesize(&offsets);

        let peak = spectrum
            .power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let expected = tuning::apply_cents(440.0, 10.0);
        assert!((model.axis().frequency(peak) - expected).abs() <= 0.1);
        assert!(spectrum.power.iter().all(|&v| v >= 0.0));
        assert!(spectrum.power[peak] <= 2.0 && spectrum.power[peak] > 1.9);
    }

    #[test]
    fn test_overlapping_keys_accumulate() {
        let mut problem = TuningProblem::default();
        problem.record(36, vec![Partial::new(2, 440.0, 1.0)]).unwrap();
        problem.record(48, vec![Partial::new(1, 440.0, 1.0)]).unwrap();
        let model = SpectrumModel::new(&problem, &small_config());
        let spectrum = model.synthesize(&[0.0; 88]);
        let bin = model.axis().bin_of(440.0).unwrap();
        // Two unit-height peaks at the same place
        assert!(spectrum.power[bin] > 1.9);
    }

    #[test]
    fn test_inharmonic_partials_are_sharp() {
        let mut problem = TuningProblem::default();
        problem
            .record(24, vec![Partial::new(1, 110.0, 1.0), Partial::new(4, 443.0, 1.0)])
            .unwrap();
        problem.keys[24].inharmonicity = Some(0.001);
        let model = SpectrumModel::new(&problem, &small_config());
        let spectrum = model.synthesize(&[0.0; 88]);
        let expected = 4.0 * 110.0 * (1.0 + 0.001 * 16.0_f64).sqrt();
        let bin = model.axis().bin_of(expected).unwrap();
        let harmonic_bin = model.axis().bin_of(440.0).unwrap();
        assert!(spectrum.power[bin] > spectrum.power[harmonic_bin]);
    }

    #[test]
    fn test_partials_beyond_axis_are_skipped() {
        let mut problem = TuningProblem::default();
        problem.record(87, vec![Partial::new(3, 12_600.0, 1.0)]).unwrap();
        let model = SpectrumModel::new(&problem, &SpectrumConfig::default());
        assert_eq!(model.synthesize(&[0.0; 88]).total(), 0.0);
    }
}
