// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Strum detector: a pressure-triggered state machine with a short
//! pre-trigger buffer that converts streaming (x, pressure) samples into
//! discrete strum / release events with quantized MIDI velocity.

use std::time::Instant;

use crate::note::Note;

const BUFFER_MAX_SAMPLES: usize = 3;
const VELOCITY_FLOOR: u8 = 20;
const VELOCITY_CEILING: u8 = 127;

#[derive(Debug, Clone, PartialEq)]
pub struct StrumNote {
    pub note: Note,
    pub velocity: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrumEvent {
    Strum { notes: Vec<StrumNote> },
    Release { velocity: u8 },
}

#[derive(Clone, Copy)]
struct PressureSample {
    pressure: f64,
    timestamp: Instant,
}

/// Owned exclusively by the HID thread. `notes` is swapped wholesale
/// when the action dispatcher reseeds the strum sequence.
pub struct StrumDetector {
    notes: Vec<Note>,
    last_strummed_index: i64,
    last_x: f64,
    last_pressure: f64,
    last_timestamp: Option<Instant>,
    pressure_buffer: Vec<PressureSample>,
    pending_tap_index: i64,
    last_strum_velocity: u8,
    pressure_threshold: f64,
    velocity_scale: f64,
}

impl Default for StrumDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StrumDetector {
    pub fn new() -> Self {
        Self {
            notes: Vec::new(),
            last_strummed_index: -1,
            last_x: -1.0,
            last_pressure: 0.0,
            last_timestamp: None,
            pressure_buffer: Vec::with_capacity(BUFFER_MAX_SAMPLES),
            pending_tap_index: -1,
            last_strum_velocity: 0,
            pressure_threshold: 0.1,
            velocity_scale: 4.0,
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Atomically replace the active strum sequence. Does not reset
    /// in-progress tap/strum state; callers that want a clean slate should
    /// call [`StrumDetector::clear`] first.
    pub fn set_notes(&mut self, notes: Vec<Note>) {
        self.notes = notes;
    }

    pub fn configure(&mut self, pluck_velocity_scale: f64, pressure_threshold: f64) {
        self.velocity_scale = pluck_velocity_scale;
        self.pressure_threshold = pressure_threshold;
    }

    pub fn pressure_threshold(&self) -> f64 {
        self.pressure_threshold
    }

    /// Reset all detector state to its initial values (invariant: called
    /// after every emitted release).
    pub fn clear(&mut self) {
        self.last_strummed_index = -1;
        self.last_pressure = 0.0;
        self.last_timestamp = None;
        self.pressure_buffer.clear();
        self.pending_tap_index = -1;
        self.last_strum_velocity = 0;
    }

    /// Process one (x, pressure) sample and return a strum/release event if
    /// one was triggered.
    pub fn strum(&mut self, x: f64, pressure: f64) -> Option<StrumEvent> {
        if self.notes.is_empty() {
            return None;
        }

        let now = Instant::now();
        let index = (x * self.notes.len() as f64).floor() as i64;
        let index = index.clamp(0, self.notes.len() as i64 - 1);

        let has_sufficient_pressure = pressure >= self.pressure_threshold;
        let pressure_down = self.last_pressure < self.pressure_threshold && has_sufficient_pressure;
        let pressure_up = self.last_pressure >= self.pressure_threshold && !has_sufficient_pressure;

        if pressure_up {
            let release_velocity = self.last_strum_velocity;
            let last_pressure = pressure;
            self.clear();
            self.last_pressure = last_pressure;
            self.last_timestamp = Some(now);
            self.last_x = x;
            return if release_velocity > 0 {
                Some(StrumEvent::Release {
                    velocity: release_velocity,
                })
            } else {
                None
            };
        }

        if pressure_down && (self.last_strummed_index == -1 || self.last_strummed_index != index) {
            let prev_sample = PressureSample {
                pressure: self.last_pressure,
                timestamp: self.last_timestamp.unwrap_or(now),
            };
            self.pressure_buffer = vec![prev_sample, PressureSample { pressure, timestamp: now }];
            self.pending_tap_index = index;
            self.last_x = x;
            self.last_pressure = pressure;
            self.last_timestamp = Some(now);
            return None;
        }

        // Cold-start coercion: pressure already above threshold on the very
        // first sample, with no in-progress tap or strum.
        if has_sufficient_pressure && self.last_strummed_index == -1 && self.pending_tap_index == -1 {
            self.pressure_buffer = vec![PressureSample { pressure, timestamp: now }];
            self.pending_tap_index = index;
            self.last_x = x;
            self.last_pressure = pressure;
            self.last_timestamp = Some(now);
            return None;
        }

        if self.pending_tap_index != -1 && self.pressure_buffer.len() < BUFFER_MAX_SAMPLES {
            self.pressure_buffer.push(PressureSample { pressure, timestamp: now });
            self.last_x = x;
            self.last_pressure = pressure;
            self.last_timestamp = Some(now);

            if self.pressure_buffer.len() >= BUFFER_MAX_SAMPLES {
                let normalized = ((pressure - self.pressure_threshold) / (1.0 - self.pressure_threshold))
                    .clamp(0.0, 1.0);
                let midi_velocity = (20.0 + normalized * 107.0).round() as i64;
                let midi_velocity = midi_velocity.clamp(VELOCITY_FLOOR as i64, VELOCITY_CEILING as i64) as u8;

                self.last_strum_velocity = midi_velocity;
                let tapped_index = self.pending_tap_index as usize;
                self.last_strummed_index = self.pending_tap_index;
                self.pending_tap_index = -1;
                self.pressure_buffer.clear();

                return Some(StrumEvent::Strum {
                    notes: vec![StrumNote {
                        note: self.notes[tapped_index].clone(),
                        velocity: midi_velocity,
                    }],
                });
            }
            return None;
        }

        self.last_x = x;
        self.last_pressure = pressure;
        self.last_timestamp = Some(now);

        if has_sufficient_pressure && self.last_strummed_index != -1 && self.last_strummed_index != index {
            let midi_velocity = ((pressure * 127.0).round() as i64).max(VELOCITY_FLOOR as i64) as u8;
            let indices: Vec<i64> = if self.last_strummed_index < index {
                ((self.last_strummed_index + 1)..=index).collect()
            } else {
                ((index..self.last_strummed_index).rev()).collect()
            };

            let notes_to_play: Vec<StrumNote> = indices
                .into_iter()
                .map(|i| StrumNote {
                    note: self.notes[i as usize].clone(),
                    velocity: midi_velocity,
                })
                .collect();

            self.last_strum_velocity = midi_velocity;
            self.last_strummed_index = index;

            if notes_to_play.is_empty() {
                return None;
            }
            return Some(StrumEvent::Strum { notes: notes_to_play });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::parse_chord;

    fn strummer_with(notes: &[&str]) -> StrumDetector {
        let mut s = StrumDetector::new();
        s.set_notes(notes.iter().map(|n| Note::new(*n, 4)).collect());
        s.configure(4.0, 0.1);
        s
    }

    #[test]
    fn tap_on_middle_string_builds_velocity_from_buffered_pressure() {
        let mut s = strummer_with(&["C", "E", "G"]);
        assert_eq!(s.strum(0.5, 0.0), None);
        assert_eq!(s.strum(0.5, 0.3), None);
        assert_eq!(s.strum(0.5, 0.6), None);
        let ev = s.strum(0.5, 0.8).unwrap();
        match ev {
            StrumEvent::Strum { notes } => {
                assert_eq!(notes.len(), 1);
                assert_eq!(notes[0].note.notation, "E");
                assert_eq!(notes[0].velocity, 103);
            }
            _ => panic!("expected strum"),
        }
        let release = s.strum(0.5, 0.0).unwrap();
        assert_eq!(release, StrumEvent::Release { velocity: 103 });
    }

    #[test]
    fn cross_strum_right_excludes_previous_index() {
        let mut s = strummer_with(&["C", "E", "G"]);
        s.strum(0.5, 0.0);
        s.strum(0.5, 0.3);
        s.strum(0.5, 0.6);
        s.strum(0.5, 0.8);
        let ev = s.strum(0.95, 0.5).unwrap();
        match ev {
            StrumEvent::Strum { notes } => {
                assert_eq!(notes.len(), 1);
                assert_eq!(notes[0].note.notation, "G");
                assert_eq!(notes[0].velocity, 64);
            }
            _ => panic!("expected strum"),
        }
    }

    #[test]
    fn pressure_below_threshold_never_emits() {
        let mut s = strummer_with(&["C", "E", "G"]);
        s.configure(4.0, 0.2);
        assert_eq!(s.strum(0.1, 0.0), None);
        assert_eq!(s.strum(0.1, 0.15), None);
        assert_eq!(s.strum(0.1, 0.0), None);
    }

    #[test]
    fn no_notes_returns_none() {
        let mut s = StrumDetector::new();
        assert_eq!(s.strum(0.5, 1.0), None);
    }

    #[test]
    fn velocity_bounds_hold_for_all_emitted_strums() {
        let mut s = strummer_with(&["C", "D", "E", "F", "G", "A", "B"]);
        for i in 0..50 {
            let x = (i % 7) as f64 / 7.0;
            let pressure = if i % 2 == 0 { 0.9 } else { 0.0 };
            if let Some(StrumEvent::Strum { notes }) = s.strum(x, pressure) {
                for n in notes {
                    assert!(n.velocity >= 20 && n.velocity <= 127);
                }
            }
        }
    }

    #[test]
    fn string_crossing_covers_chord_via_progression() {
        let chord = parse_chord("C", 4).unwrap();
        let mut s = StrumDetector::new();
        s.set_notes(chord);
        s.configure(4.0, 0.1);
        s.strum(0.0, 0.0);
        s.strum(0.0, 0.5);
        s.strum(0.0, 0.8);
        let ev = s.strum(0.0, 0.9);
        assert!(ev.is_some());
    }
}
