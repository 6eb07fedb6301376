//! # Equal Temperament Module
//!
//! The 88-key reference every tuning curve is measured against. Offsets
//! produced by the engine are cents away from the frequencies in this table.
//!
//! ## Features
//! - 88-key piano note mapping (A0 to C8)
//! - Equal temperament frequency calculations with A4 = 440 Hz
//! - Cent conversions in both directions
//! - Key index <-> note name lookups

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Number of keys on a standard piano.
pub const NUM_KEYS: usize = 88;

/// Index of A4, the customary reference key.
pub const A4_INDEX: usize = 48;

/// Concert pitch of A4 in Hz.
pub const CONCERT_PITCH: f64 = 440.0;

/// Represents a single piano key with its name and equal-tempered frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f64,
}

/// Statically computed notes for a standard 88-key piano (A0 to C8).
///
/// Each semitone step is a factor of 2^(1/12) away from A4 = 440 Hz.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    const NOTE_NAMES: [&str; 12] = [
        "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
    ];
    let mut notes = Vec::with_capacity(NUM_KEYS);

    for i in 0..NUM_KEYS {
        let semitones = i as f64 - A4_INDEX as f64;
        let frequency = CONCERT_PITCH * 2.0_f64.powf(semitones / 12.0);

        // The name cycles every 12 keys starting at A, but the octave
        // number changes at C.
        let note_index = i % 12;
        let octave = (i + 9) / 12;
        let name = format!("{}{}", NOTE_NAMES[note_index], octave);

        notes.push(Note { name, frequency });
    }
    notes
});

/// Static map for note name to key index lookups.
static NOTE_MAP: Lazy<BTreeMap<String, u8>> = Lazy::new(|| {
    NOTES
        .iter()
        .enumerate()
        .map(|(i, note)| (note.name.clone(), i as u8))
        .collect()
});

/// Returns the note for a key index, or `None` outside 0..88.
pub fn note(key_index: usize) -> Option<&'static Note> {
    NOTES.get(key_index)
}

/// Equal-tempered frequency of a key.
///
/// Indices beyond the keyboard are extrapolated with the same formula.
pub fn theoretical_frequency(key_index: usize) -> f64 {
    match NOTES.get(key_index) {
        Some(note) => note.frequency,
        None => CONCERT_PITCH * 2.0_f64.powf((key_index as f64 - A4_INDEX as f64) / 12.0),
    }
}

/// Name of a key ("A0" .. "C8"). Out-of-range indices yield `"?"`.
pub fn key_name(key_index: usize) -> &'static str {
    NOTES.get(key_index).map(|n| n.name.as_str()).unwrap_or("?")
}

/// Gets the 88-key piano index from a note name such as "A4" or "C#3".
pub fn key_index_from_name(name: &str) -> Option<u8> {
    NOTE_MAP.get(name).copied()
}

/// Calculates the deviation of `freq` from `target_freq` in cents.
///
/// Positive values are sharp, negative values flat.
pub fn cents_between(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// Shifts a frequency by a number of cents.
pub fn apply_cents(freq: f64, cents: f64) -> f64 {
    freq * 2.0_f64.powf(cents / 1200.0)
}
