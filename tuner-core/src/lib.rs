// tuner-core/src/lib.rs

//! The core logic of the entropy piano tuner.
//! This crate turns the spectral peaks recorded from individual keys into a
//! tuning curve for the whole keyboard by minimizing the entropy of their
//! combined, inharmonicity-corrected spectrum. It is completely headless and
//! performs no audio I/O.

pub mod config;
pub mod constraints;
pub mod engine;
pub mod entropy;
pub mod ept;
pub mod error;
pub mod fallback;
pub mod inharmonicity;
pub mod optimizer;
pub mod problem;
pub mod progress;
pub mod spectrum;
pub mod tuning;

pub use config::TuningConfig;
pub use engine::{FallbackReason, KeyTuning, TuningCurve, TuningEngine, TuningMethod, calculate};
pub use error::TuningError;
pub use problem::{Key, KeyMeasurement, Partial, RecordingProfile, TuningProblem};
pub use progress::{NoProgress, ProgressSink, TuningEvent};
