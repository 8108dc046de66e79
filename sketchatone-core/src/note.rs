// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Note primitives: notation parsing, chord expansion, transposition,
//! MIDI conversion, and spread expansion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::NoteError;

pub const SHARP_NOTATIONS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub const FLAT_NOTATIONS: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// A single note: pitch class spelling, octave, and whether it was added by
/// spread expansion rather than being part of the chord proper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub notation: String,
    pub octave: i32,
    #[serde(default)]
    pub secondary: bool,
}

impl Note {
    pub fn new(notation: impl Into<String>, octave: i32) -> Self {
        Self {
            notation: notation.into(),
            octave,
            secondary: false,
        }
    }

    /// MIDI note number: `12 * octave + pitch_class_index`.
    pub fn to_midi(&self) -> i32 {
        self.octave * 12 + index_of_notation(&self.notation).unwrap_or(0)
    }

    /// Transpose by `semitones`, preserving sharp/flat spelling when the
    /// original notation carried one.
    pub fn transpose(&self, semitones: i32) -> Note {
        if semitones == 0 {
            return self.clone();
        }
        let midi = self.to_midi() + semitones;
        let new_octave = midi.div_euclid(12);
        let new_index = midi.rem_euclid(12) as usize;
        let new_notation = if self.notation.contains('b') {
            FLAT_NOTATIONS[new_index]
        } else {
            SHARP_NOTATIONS[new_index]
        };
        Note {
            notation: new_notation.to_string(),
            octave: new_octave,
            secondary: self.secondary,
        }
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.notation, self.octave)
    }
}

pub fn index_of_notation(notation: &str) -> Option<i32> {
    SHARP_NOTATIONS
        .iter()
        .position(|n| *n == notation)
        .or_else(|| FLAT_NOTATIONS.iter().position(|n| *n == notation))
        .map(|i| i as i32)
}

/// Parse `"C4"`, `"F#3"`, `"Bb"` (defaults to octave 4 when omitted) into a [`Note`].
/// Only single-digit octaves are supported.
pub fn parse_notation(notation: &str) -> Result<Note, NoteError> {
    if notation.is_empty() {
        return Err(NoteError::EmptyNotation);
    }
    let last = notation.chars().last().unwrap();
    if let Some(octave) = last.to_digit(10) {
        let note_part = &notation[..notation.len() - 1];
        Ok(Note::new(note_part, octave as i32))
    } else {
        Ok(Note::new(notation, 4))
    }
}

/// Chord interval tables (semitones above the root).
static CHORD_INTERVALS: LazyLock<HashMap<&'static str, &'static [i32]>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, &'static [i32]> = HashMap::new();
    m.insert("maj", &[0, 4, 7]);
    m.insert("min", &[0, 3, 7]);
    m.insert("m", &[0, 3, 7]);
    m.insert("dim", &[0, 3, 6]);
    m.insert("aug", &[0, 4, 8]);
    m.insert("sus2", &[0, 2, 7]);
    m.insert("sus4", &[0, 5, 7]);
    m.insert("5", &[0, 7]);
    m.insert("7", &[0, 4, 7, 10]);
    m.insert("maj7", &[0, 4, 7, 11]);
    m.insert("min7", &[0, 3, 7, 10]);
    m.insert("m7", &[0, 3, 7, 10]);
    m.insert("dim7", &[0, 3, 6, 9]);
    m.insert("aug7", &[0, 4, 8, 10]);
    m.insert("maj9", &[0, 4, 7, 11, 14]);
    m.insert("min9", &[0, 3, 7, 10, 14]);
    m.insert("m9", &[0, 3, 7, 10, 14]);
    m.insert("9", &[0, 4, 7, 10, 14]);
    m.insert("add9", &[0, 4, 7, 14]);
    m.insert("6", &[0, 4, 7, 9]);
    m.insert("min6", &[0, 3, 7, 9]);
    m.insert("m6", &[0, 3, 7, 9]);
    m
});

/// Parse a chord symbol ("C", "Gm", "Am7", "Fmaj7", "Ddim", "Esus4") into its
/// constituent notes at the given base octave. Unknown chord types fall back
/// to a major triad.
pub fn parse_chord(chord_notation: &str, octave: i32) -> Result<Vec<Note>, NoteError> {
    if chord_notation.is_empty() {
        return Err(NoteError::EmptyNotation);
    }
    let chars: Vec<char> = chord_notation.chars().collect();
    let (root, chord_type) = if chars.len() >= 2 && matches!(chars[1], '#' | 'b') {
        (
            chord_notation[..2].to_string(),
            chord_notation[2..].to_string(),
        )
    } else {
        (
            chord_notation[..1].to_string(),
            chord_notation[1..].to_string(),
        )
    };
    let chord_type = if chord_type.is_empty() {
        "maj".to_string()
    } else {
        chord_type
    };

    let intervals: &[i32] = match CHORD_INTERVALS.get(chord_type.as_str()) {
        Some(i) => i,
        None => {
            let err = NoteError::UnknownChordType(chord_type.clone());
            tracing::warn!(chord = chord_notation, error = %err, "unknown chord type");
            CHORD_INTERVALS.get("maj").unwrap()
        }
    };

    let root_note = parse_notation(&format!("{root}{octave}"))?;
    let root_index = index_of_notation(&root_note.notation).unwrap_or(0);

    Ok(intervals
        .iter()
        .map(|interval| {
            let note_index = (root_index + interval).rem_euclid(12) as usize;
            let note_octave = octave + (root_index + interval).div_euclid(12);
            Note::new(SHARP_NOTATIONS[note_index], note_octave)
        })
        .collect())
}

/// Expand a base chord with `lower_spread` notes below and `upper_spread`
/// notes above, octave-cloning and wrapping through the chord as needed.
/// Added notes are marked `secondary`.
pub fn fill_note_spread(notes: &[Note], lower_spread: usize, upper_spread: usize) -> Vec<Note> {
    if notes.is_empty() {
        return Vec::new();
    }

    let mut upper = Vec::with_capacity(upper_spread);
    for c in 0..upper_spread {
        let note_index = c % notes.len();
        let octave_increase = (c / notes.len()) as i32;
        upper.push(Note {
            notation: notes[note_index].notation.clone(),
            octave: notes[note_index].octave + octave_increase + 1,
            secondary: true,
        });
    }

    let mut lower = Vec::with_capacity(lower_spread);
    for c in 0..lower_spread {
        let note_index = c % notes.len();
        let octave_decrease = (c / notes.len()) as i32;
        let reverse_index = notes.len() - 1 - note_index;
        lower.push(Note {
            notation: notes[reverse_index].notation.clone(),
            octave: notes[reverse_index].octave - octave_decrease - 1,
            secondary: true,
        });
    }

    lower.into_iter().chain(notes.iter().cloned()).chain(upper).collect()
}

/// Canonical chord progression presets.
pub static CHORD_PROGRESSION_PRESETS: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert("c-major-pop", &["C", "G", "Am", "F"]);
        m.insert("c-major-50s", &["C", "Am", "F", "G"]);
        m.insert("c-major-axis", &["Am", "F", "C", "G"]);
        m.insert("c-major-royal", &["F", "C", "G", "Am"]);
        m.insert("a-minor-pop", &["Am", "F", "C", "G"]);
        m.insert("a-minor-andalusian", &["Am", "G", "F", "E"]);
        m.insert("g-major-country", &["G", "C", "D", "G"]);
        m.insert("d-major-folk", &["D", "G", "A", "D"]);
        m.insert("e-minor-rock", &["Em", "C", "G", "D"]);
        m.insert(
            "blues-12bar",
            &[
                "C7", "C7", "C7", "C7", "F7", "F7", "C7", "C7", "G7", "F7", "C7", "G7",
            ],
        );
        m
    });

pub fn chord_progression_preset_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CHORD_PROGRESSION_PRESETS.keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_is_a_ring() {
        let n = Note::new("C", 4);
        for semi in [-17, -12, -1, 0, 1, 7, 12, 25] {
            let round_trip = n.transpose(semi).transpose(-semi);
            assert_eq!(round_trip, n, "semitones={semi}");
        }
    }

    #[test]
    fn midi_conversion() {
        assert_eq!(Note::new("C", 4).to_midi(), 48);
        assert_eq!(Note::new("C#", 4).to_midi(), 49);
        assert_eq!(Note::new("Bb", 4).to_midi(), 58);
    }

    #[test]
    fn parse_notation_defaults_octave_to_4() {
        assert_eq!(parse_notation("C#").unwrap(), Note::new("C#", 4));
        assert_eq!(parse_notation("G3").unwrap(), Note::new("G", 3));
    }

    #[test]
    fn parse_chord_major_triad() {
        let notes = parse_chord("C", 4).unwrap();
        let names: Vec<String> = notes.iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["C4", "E4", "G4"]);
    }

    #[test]
    fn parse_chord_minor_with_octave_wrap() {
        let notes = parse_chord("Am", 4).unwrap();
        let names: Vec<String> = notes.iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["A4", "C5", "E5"]);
    }

    #[test]
    fn unknown_chord_type_falls_back_to_major() {
        let notes = parse_chord("Cxyz", 4).unwrap();
        assert_eq!(notes.len(), 3);
    }

    #[test]
    fn fill_note_spread_size_matches_base_plus_spreads() {
        let base = parse_chord("C", 4).unwrap();
        let spread = fill_note_spread(&base, 3, 2);
        assert_eq!(spread.len(), base.len() + 3 + 2);
        assert!(spread.iter().filter(|n| n.secondary).count() == 5);
    }

    #[test]
    fn fill_note_spread_empty_input() {
        assert!(fill_note_spread(&[], 3, 3).is_empty());
    }

    mod chord_table {
        use super::*;
        use rstest::rstest;

        #[rstest]
        #[case("C", vec!["C4", "E4", "G4"])]
        #[case("Cm", vec!["C4", "D#4", "G4"])]
        #[case("Cdim", vec!["C4", "D#4", "F#4"])]
        #[case("Caug", vec!["C4", "E4", "G#4"])]
        #[case("Csus2", vec!["C4", "D4", "G4"])]
        #[case("Csus4", vec!["C4", "F4", "G4"])]
        #[case("C7", vec!["C4", "E4", "G4", "A#4"])]
        #[case("Cmaj7", vec!["C4", "E4", "G4", "B4"])]
        fn parses_known_chord_types(#[case] symbol: &str, #[case] expected: Vec<&str>) {
            let notes = parse_chord(symbol, 4).unwrap();
            let names: Vec<String> = notes.iter().map(|n| n.to_string()).collect();
            assert_eq!(names, expected);
        }
    }

    #[test]
    fn progression_presets_are_populated() {
        let names = chord_progression_preset_names();
        assert!(names.contains(&"c-major-pop"));
        assert_eq!(
            CHORD_PROGRESSION_PRESETS.get("blues-12bar").unwrap().len(),
            12
        );
    }
}
