//! Import of key lists exported by the desktop Entropy Piano Tuner.
//!
//! Those files carry one entry per key with MIDI-style ids 21..=108, the
//! measured frequency, a measured flag and the tuner's own inharmonicity
//! estimate. Only the fundamental survives the conversion, so imported keys
//! carry a single n=1 partial. The exported coefficient is parsed but not
//! carried over: a key with one partial has no coefficient, and the engine
//! estimates B from recorded overtones only.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;

use crate::problem::{KeyMeasurement, Partial, RecordingProfile};
use crate::tuning::NUM_KEYS;

/// Id of the lowest key (A0) in the export.
pub const FIRST_KEY_ID: u32 = 21;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EptKey {
    pub id: u32,
    #[serde(rename = "mFreq", default)]
    pub measured_frequency: f64,
    #[serde(rename = "isM", default)]
    pub is_measured: bool,
    #[serde(rename = "inh", default)]
    pub inharmonicity: Option<f64>,
}

/// Converts exported keys into a recording profile anchored at A4.
pub fn to_profile(keys: &[EptKey]) -> RecordingProfile {
    let mut profile = RecordingProfile::default();
    let dropped = keys.iter().filter(|k| k.inharmonicity.is_some_and(|b| b > 0.0)).count();
    if dropped > 0 {
        debug!("[EPT] Ignoring {dropped} exported inharmonicity coefficients");
    }
    for key in keys.iter().filter(|k| k.is_measured && k.measured_frequency > 0.0) {
        let index = key.id.checked_sub(FIRST_KEY_ID).map(|i| i as usize);
        match index {
            Some(index) if index < NUM_KEYS && key.measured_frequency.is_finite() => {
                profile.measurements.insert(
                    index as u8,
                    KeyMeasurement {
                        partials: vec![Partial::new(1, key.measured_frequency, 1.0)],
                    },
                );
            }
            _ => warn!("[EPT] Skipping key id {} outside the keyboard", key.id),
        }
    }
    profile
}

/// Reads an export file and converts it.
pub fn load<P: AsRef<Path>>(path: P) -> Result<RecordingProfile> {
    let contents = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read EPT file: {:?}", path.as_ref()))?;
    let keys: Vec<EptKey> =
        serde_json::from_str(&contents).context("Failed to parse EPT key list")?;
    Ok(to_profile(&keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_measured_keys_only() {
        let json = r#"[
            { "id": 21, "mFreq": 27.4, "isM": true, "inh": 0.0004 },
            { "id": 69, "mFreq": 440.2, "isM": true },
            { "id": 70, "mFreq": 466.0, "isM": false },
            { "id": 72, "mFreq": 0.0, "isM": true },
            { "id": 120, "mFreq": 9000.0, "isM": true }
        ]"#;
        let keys: Vec<EptKey> = serde_json::from_str(json).unwrap();
        assert_eq!(keys[0].inharmonicity, Some(0.0004));
        assert_eq!(keys[1].inharmonicity, None);
        let profile = to_profile(&keys);
        assert_eq!(profile.measurements.len(), 2);
        assert_eq!(profile.measurements[&0].partials[0].frequency, 27.4);
        assert_eq!(profile.measurements[&48].partials[0].number, 1);
        assert_eq!(profile.reference_key, 48);
    }

    #[test]
    fn test_exported_coefficient_is_not_attached() {
        let keys = vec![EptKey {
            id: 45,
            measured_frequency: 110.3,
            is_measured: true,
            inharmonicity: Some(0.0008),
        }];
        let mut problem = crate::problem::TuningProblem::from_profile(&to_profile(&keys)).unwrap();
        let config = crate::config::InharmonicityConfig::default();
        crate::inharmonicity::estimate_all(&mut problem, &config);
        assert_eq!(problem.keys[24].partials.len(), 1);
        assert_eq!(problem.keys[24].inharmonicity, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ept.json");
        fs::write(&path, r#"[{ "id": 60, "mFreq": 261.5, "isM": true }]"#).unwrap();
        let profile = load(&path).unwrap();
        assert!(profile.measurements.contains_key(&39));
    }
}
