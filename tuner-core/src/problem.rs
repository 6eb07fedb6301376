//! # Tuning Problem Module
//!
//! The data handed to the engine: what was recorded for every key, and which
//! key anchors the curve. Recordings arrive as a [`RecordingProfile`] (the
//! document an upstream peak extractor saves) and are turned into an immutable
//! [`TuningProblem`] covering all 88 keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TuningError;
use crate::tuning::{self, A4_INDEX, NUM_KEYS};

/// Represents a single measured partial of a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub number: u32,    // The partial number (n=1, 2, 3...)
    pub frequency: f64, // The measured frequency in Hz
    #[serde(default = "default_amplitude")]
    pub amplitude: f64, // Linear peak magnitude
}

fn default_amplitude() -> f64 {
    1.0
}

impl Partial {
    pub fn new(number: u32, frequency: f64, amplitude: f64) -> Self {
        Self { number, frequency, amplitude }
    }
}

/// Stores all the measured partials for a single piano key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMeasurement {
    pub partials: Vec<Partial>,
}

/// The recorded state of a piano, as saved by the recording front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingProfile {
    #[serde(default = "default_reference_key")]
    pub reference_key: usize,
    /// Maps a key index to its measurement; sorted by key.
    #[serde(default)]
    pub measurements: BTreeMap<u8, KeyMeasurement>,
}

fn default_reference_key() -> usize {
    A4_INDEX
}

impl Default for RecordingProfile {
    fn default() -> Self {
        Self {
            reference_key: A4_INDEX,
            measurements: BTreeMap::new(),
        }
    }
}

impl RecordingProfile {
    /// Loads a profile from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read profile: {:?}", path.as_ref()))?;
        serde_json::from_str(&contents).context("Failed to parse recording profile")
    }

    /// Saves the profile as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize profile")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write profile: {:?}", path.as_ref()))
    }
}

/// One of the 88 keyboard positions together with what was recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub index: usize,
    pub name: String,
    pub theoretical_frequency: f64,
    /// Recorded partials sorted by partial number; empty if never recorded.
    pub partials: Vec<Partial>,
    /// Stiffness coefficient, only present for keys with at least 2 partials.
    pub inharmonicity: Option<f64>,
}

impl Key {
    fn new(index: usize) -> Self {
        Self {
            index,
            name: tuning::key_name(index).to_string(),
            theoretical_frequency: tuning::theoretical_frequency(index),
            partials: Vec::new(),
            inharmonicity: None,
        }
    }

    pub fn is_recorded(&self) -> bool {
        !self.partials.is_empty()
    }

    /// B used by the spectrum model; the harmonic model when unknown.
    pub fn effective_inharmonicity(&self) -> f64 {
        self.inharmonicity.unwrap_or(0.0)
    }

    /// The measured fundamental.
    ///
    /// Uses the n=1 partial when present. Otherwise the lowest recorded
    /// partial is divided back through the stiff-string model.
    pub fn recorded_fundamental(&self) -> Option<f64> {
        if let Some(p) = self.partials.iter().find(|p| p.number == 1) {
            return Some(p.frequency);
        }
        let lowest = self.partials.iter().min_by_key(|p| p.number)?;
        let n = lowest.number as f64;
        let b = self.effective_inharmonicity();
        Some(lowest.frequency / (n * (1.0 + b * n * n).sqrt()))
    }

    /// Cents between the recorded fundamental and the ET frequency.
    pub fn recorded_deviation_cents(&self) -> Option<f64> {
        self.recorded_fundamental()
            .map(|f| tuning::cents_between(f, self.theoretical_frequency))
    }
}

/// The aggregate passed into every component of the engine.
///
/// Immutable once built; the engine clones it to attach inharmonicity
/// coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningProblem {
    pub keys: Vec<Key>,
    pub reference_key: usize,
}

impl Default for TuningProblem {
    fn default() -> Self {
        Self {
            keys: (0..NUM_KEYS).map(Key::new).collect(),
            reference_key: A4_INDEX,
        }
    }
}

impl TuningProblem {
    /// An 88-key problem with nothing recorded.
    pub fn new(reference_key: usize) -> Result<Self, TuningError> {
        let mut problem = Self::default();
        problem.reference_key = reference_key;
        problem.validate()?;
        Ok(problem)
    }

    /// Builds a problem from a recording profile.
    pub fn from_profile(profile: &RecordingProfile) -> Result<Self, TuningError> {
        let mut problem = Self::new(profile.reference_key)?;
        for (&index, measurement) in &profile.measurements {
            problem.record(index as usize, measurement.partials.clone())?;
        }
        Ok(problem)
    }

    /// Attaches recorded partials to a key, replacing earlier ones.
    pub fn record(
        &mut self,
        key_index: usize,
        mut partials: Vec<Partial>,
    ) -> Result<(), TuningError> {
        let key = self.keys.get_mut(key_index).ok_or_else(|| {
            TuningError::InvalidProblem(format!("key index {key_index} is outside 0..{NUM_KEYS}"))
        })?;
        check_partials(&key.name, &partials)?;
        partials.sort_by_key(|p| p.number);
        key.partials = partials;
        key.inharmonicity = None;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        if self.keys.len() != NUM_KEYS {
            return Err(TuningError::InvalidProblem(format!(
                "expected {NUM_KEYS} keys, got {}",
                self.keys.len()
            )));
        }
        if self.reference_key >= NUM_KEYS {
            return Err(TuningError::InvalidProblem(format!(
                "reference key {} is outside 0..{NUM_KEYS}",
                self.reference_key
            )));
        }
        for (i, key) in self.keys.iter().enumerate() {
            if key.index != i {
                return Err(TuningError::InvalidProblem(format!(
                    "key at position {i} has a mismatched index"
                )));
            }
            check_partials(&key.name, &key.partials)?;
        }
        Ok(())
    }

    pub fn recorded_keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().filter(|k| k.is_recorded())
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded_keys().count()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Partial numbers start at 1; frequencies are finite and positive.
fn check_partials(key_name: &str, partials: &[Partial]) -> Result<(), TuningError> {
    for p in partials {
        if p.number == 0 {
            return Err(TuningError::InvalidProblem(format!(
                "key {key_name}: partial numbers start at 1"
            )));
        }
        if !(p.frequency.is_finite() && p.frequency > 0.0) || !p.amplitude.is_finite() {
            return Err(TuningError::InvalidProblem(format!(
                "key {key_name}: partial {} has a non-finite or non-positive frequency",
                p.number
            )));
        }
    }
    Ok(())
}
