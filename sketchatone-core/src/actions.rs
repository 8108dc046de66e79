// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Action dispatcher: stylus-button and tablet-button actions parsed
//! from config (bare string, `[name, ...args]` list, or absent) and routed
//! to named handlers.
//!
//! The dispatcher depends on two narrow traits ([`TransposeTarget`],
//! [`StrumNoteTarget`]) instead of owning the config/strum-detector
//! directly, so the orchestrator can wire concrete references in without
//! creating a reference cycle.

use tracing::warn;

use crate::config::{ActionValue, Config};
use crate::note::{self, fill_note_spread, parse_chord, parse_notation, Note};

/// Context passed to a handler: which input triggered the action.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub button: Option<String>,
}

impl ActionContext {
    pub fn for_button(name: impl Into<String>) -> Self {
        Self { button: Some(name.into()) }
    }

    fn button_label(&self) -> &str {
        self.button.as_deref().unwrap_or("Unknown")
    }
}

/// Mutable view onto the strum detector's active note set, so the
/// dispatcher can replace it without owning the detector.
pub trait StrumNoteTarget {
    fn set_notes(&mut self, notes: Vec<Note>);
}

impl StrumNoteTarget for crate::strum::StrumDetector {
    fn set_notes(&mut self, notes: Vec<Note>) {
        crate::strum::StrumDetector::set_notes(self, notes)
    }
}

/// Tracks the active chord-progression index independently of config, since
/// the progression preset itself is process-wide static data.
#[derive(Debug, Clone, Default)]
pub struct ChordProgressionState {
    progression_name: Option<String>,
    chords: Vec<String>,
    current_index: usize,
}

impl ChordProgressionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a progression by name. Returns `false` (and logs) if unknown.
    pub fn load_progression(&mut self, name: &str) -> bool {
        match note::CHORD_PROGRESSION_PRESETS.get(name) {
            Some(chords) => {
                self.progression_name = Some(name.to_string());
                self.chords = chords.iter().map(|s| s.to_string()).collect();
                self.current_index = 0;
                true
            }
            None => {
                let err = crate::error::NoteError::UnknownProgression(name.to_string());
                warn!(progression = name, error = %err, "unknown chord progression");
                false
            }
        }
    }

    pub fn set_index(&mut self, index: i64) -> usize {
        if self.chords.is_empty() {
            return self.current_index;
        }
        self.current_index = index.rem_euclid(self.chords.len() as i64) as usize;
        self.current_index
    }

    pub fn increment_index(&mut self, amount: i64) -> usize {
        let current = self.current_index as i64;
        self.set_index(current + amount)
    }

    pub fn current_chord(&self) -> Option<&str> {
        self.chords.get(self.current_index).map(String::as_str)
    }

    pub fn progression_name(&self) -> Option<&str> {
        self.progression_name.as_deref()
    }
}

/// Parses `serde_json::Value` action parameters into typed arguments,
/// logging and returning `None` on mismatch (warn, then no-op).
fn as_i64(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Executes [`ActionValue`] definitions against a config and a strum-note
/// target. Holds no reference to either — both are passed per call, which
/// keeps the orchestrator the sole owner of config and the strum detector.
#[derive(Debug, Default)]
pub struct Actions {
    progression_state: ChordProgressionState,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progression_state(&self) -> &ChordProgressionState {
        &self.progression_state
    }

    /// Execute an action definition. Returns `true` if a handler ran
    /// (config or strum state may have changed), `false` for a no-op or
    /// unknown action name.
    pub fn execute(
        &mut self,
        action: &ActionValue,
        config: &mut Config,
        strum: &mut dyn StrumNoteTarget,
        context: &ActionContext,
    ) -> bool {
        let (name, params): (&str, &[serde_json::Value]) = match action {
            ActionValue::None => return false,
            ActionValue::Name(n) if n == "none" || n.is_empty() => return false,
            ActionValue::Name(n) => (n.as_str(), &[]),
            ActionValue::Call(items) => match items.first() {
                Some(serde_json::Value::String(n)) if !items.is_empty() => (n.as_str(), &items[1..]),
                _ => {
                    warn!(?items, "invalid action definition");
                    return false;
                }
            },
        };

        match name {
            "toggle-repeater" => self.toggle_repeater(config, context),
            "toggle-transpose" => self.toggle_transpose(config, context),
            "transpose" => self.transpose(params, config, context),
            "set-strum-notes" => self.set_strum_notes(params, config, strum, context),
            "set-strum-chord" => self.set_strum_chord(params, config, strum, context),
            "set-chord-in-progression" => self.set_chord_in_progression(params, config, strum, context),
            "increment-chord-in-progression" => {
                self.increment_chord_in_progression(params, config, strum, context)
            }
            other => {
                warn!(action = other, "unknown action");
                return false;
            }
        }
        true
    }

    fn toggle_repeater(&mut self, config: &mut Config, context: &ActionContext) {
        let repeater = &mut config.strummer.note_repeater;
        repeater.active = !repeater.active;
        tracing::info!(
            button = context.button_label(),
            active = repeater.active,
            "toggled repeater"
        );
    }

    fn toggle_transpose(&mut self, config: &mut Config, context: &ActionContext) {
        let transpose = &mut config.strummer.transpose;
        transpose.active = !transpose.active;
        tracing::info!(
            button = context.button_label(),
            active = transpose.active,
            semitones = transpose.semitones,
            "toggled transpose"
        );
    }

    fn transpose(&mut self, params: &[serde_json::Value], config: &mut Config, context: &ActionContext) {
        let Some(semitones) = params.first().and_then(as_i64) else {
            warn!("transpose action requires a semitones parameter");
            return;
        };
        let semitones = semitones as i32;
        let transpose = &mut config.strummer.transpose;
        if transpose.active && transpose.semitones == semitones {
            transpose.active = false;
            transpose.semitones = 0;
            tracing::info!(button = context.button_label(), "disabled transpose");
        } else {
            transpose.active = true;
            transpose.semitones = semitones;
            tracing::info!(button = context.button_label(), semitones, "enabled transpose");
        }
    }

    fn set_strum_notes(
        &mut self,
        params: &[serde_json::Value],
        config: &Config,
        strum: &mut dyn StrumNoteTarget,
        context: &ActionContext,
    ) {
        let Some(notation_list) = params.first().and_then(|v| v.as_array()) else {
            warn!("set-strum-notes action requires an array of note strings");
            return;
        };
        let mut notes = Vec::with_capacity(notation_list.len());
        for entry in notation_list {
            let Some(s) = entry.as_str() else {
                warn!("set-strum-notes requires all notes to be strings");
                return;
            };
            match parse_notation(s) {
                Ok(note) => notes.push(note),
                Err(err) => {
                    warn!(error = %err, notation = s, "failed to parse note");
                    return;
                }
            }
        }
        if notes.is_empty() {
            warn!("set-strum-notes requires at least one note");
            return;
        }

        let strumming = &config.strummer.strumming;
        let expanded = fill_note_spread(&notes, strumming.lower_note_spread, strumming.upper_note_spread);
        tracing::info!(button = context.button_label(), count = expanded.len(), "set strum notes");
        strum.set_notes(expanded);
    }

    fn set_strum_chord(
        &mut self,
        params: &[serde_json::Value],
        config: &Config,
        strum: &mut dyn StrumNoteTarget,
        context: &ActionContext,
    ) {
        let Some(chord_notation) = params.first().and_then(|v| v.as_str()) else {
            warn!("set-strum-chord action requires a chord notation string");
            return;
        };
        let octave = params.get(1).and_then(as_i64).unwrap_or(4) as i32;

        match parse_chord(chord_notation, octave) {
            Ok(notes) => {
                let strumming = &config.strummer.strumming;
                let expanded = fill_note_spread(&notes, strumming.lower_note_spread, strumming.upper_note_spread);
                tracing::info!(
                    button = context.button_label(),
                    chord = chord_notation,
                    "set strum chord"
                );
                strum.set_notes(expanded);
            }
            Err(err) => warn!(error = %err, chord = chord_notation, "failed to parse chord"),
        }
    }

    fn apply_progression_chord(
        &mut self,
        config: &Config,
        strum: &mut dyn StrumNoteTarget,
        octave: i32,
    ) -> Option<String> {
        let chord_notation = self.progression_state.current_chord()?.to_string();
        match parse_chord(&chord_notation, octave) {
            Ok(notes) => {
                let strumming = &config.strummer.strumming;
                let expanded = fill_note_spread(&notes, strumming.lower_note_spread, strumming.upper_note_spread);
                strum.set_notes(expanded);
                Some(chord_notation)
            }
            Err(err) => {
                warn!(error = %err, chord = chord_notation, "failed to parse progression chord");
                None
            }
        }
    }

    fn set_chord_in_progression(
        &mut self,
        params: &[serde_json::Value],
        config: &Config,
        strum: &mut dyn StrumNoteTarget,
        context: &ActionContext,
    ) {
        let (Some(progression_name), Some(index)) = (
            params.first().and_then(|v| v.as_str()),
            params.get(1).and_then(as_i64),
        ) else {
            warn!("set-chord-in-progression requires progression name and index");
            return;
        };
        let octave = params.get(2).and_then(as_i64).unwrap_or(4) as i32;

        if self.progression_state.progression_name() != Some(progression_name)
            && !self.progression_state.load_progression(progression_name)
        {
            return;
        }

        let actual_index = self.progression_state.set_index(index);
        if let Some(chord) = self.apply_progression_chord(config, strum, octave) {
            tracing::info!(
                button = context.button_label(),
                progression = progression_name,
                index = actual_index,
                chord,
                "set chord in progression"
            );
        }
    }

    fn increment_chord_in_progression(
        &mut self,
        params: &[serde_json::Value],
        config: &Config,
        strum: &mut dyn StrumNoteTarget,
        context: &ActionContext,
    ) {
        let Some(progression_name) = params.first().and_then(|v| v.as_str()) else {
            warn!("increment-chord-in-progression requires a progression name");
            return;
        };
        let amount = params.get(1).and_then(as_i64).unwrap_or(1);
        let octave = params.get(2).and_then(as_i64).unwrap_or(4) as i32;

        if self.progression_state.progression_name() != Some(progression_name)
            && !self.progression_state.load_progression(progression_name)
        {
            return;
        }

        let actual_index = self.progression_state.increment_index(amount);
        if let Some(chord) = self.apply_progression_chord(config, strum, octave) {
            tracing::info!(
                button = context.button_label(),
                progression = progression_name,
                index = actual_index,
                chord,
                "incremented chord in progression"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strum::StrumDetector;

    fn ctx() -> ActionContext {
        ActionContext::for_button("button1")
    }

    #[test]
    fn toggle_repeater_flips_state() {
        let mut actions = Actions::new();
        let mut config = Config::default();
        let mut strum = StrumDetector::new();
        assert!(!config.strummer.note_repeater.active);
        actions.execute(&ActionValue::Name("toggle-repeater".into()), &mut config, &mut strum, &ctx());
        assert!(config.strummer.note_repeater.active);
        actions.execute(&ActionValue::Name("toggle-repeater".into()), &mut config, &mut strum, &ctx());
        assert!(!config.strummer.note_repeater.active);
    }

    #[test]
    fn transpose_toggles_same_value_off() {
        let mut actions = Actions::new();
        let mut config = Config::default();
        let mut strum = StrumDetector::new();
        let action = ActionValue::Call(vec![serde_json::json!("transpose"), serde_json::json!(12)]);
        actions.execute(&action, &mut config, &mut strum, &ctx());
        assert!(config.strummer.transpose.active);
        assert_eq!(config.strummer.transpose.semitones, 12);
        actions.execute(&action, &mut config, &mut strum, &ctx());
        assert!(!config.strummer.transpose.active);
        assert_eq!(config.strummer.transpose.semitones, 0);
    }

    #[test]
    fn set_strum_chord_updates_notes() {
        let mut actions = Actions::new();
        let config = Config::default();
        let mut strum = StrumDetector::new();
        let action = ActionValue::Call(vec![serde_json::json!("set-strum-chord"), serde_json::json!("Am")]);
        actions.execute(&action, &mut config.clone(), &mut strum, &ctx());
        assert!(!strum.notes().is_empty());
    }

    #[test]
    fn progression_wraps_around() {
        let mut state = ChordProgressionState::new();
        assert!(state.load_progression("c-major-pop"));
        let len = state.chords.len();
        let idx = state.set_index(len as i64);
        assert_eq!(idx, 0);
        let idx = state.increment_index(-1);
        assert_eq!(idx, len - 1);
    }

    #[test]
    fn unknown_progression_is_rejected() {
        let mut state = ChordProgressionState::new();
        assert!(!state.load_progression("not-a-real-progression"));
        assert_eq!(state.current_chord(), None);
    }

    #[test]
    fn set_chord_in_progression_advances_index() {
        let mut actions = Actions::new();
        let config = Config::default();
        let mut strum = StrumDetector::new();
        let action = ActionValue::Call(vec![
            serde_json::json!("set-chord-in-progression"),
            serde_json::json!("c-major-pop"),
            serde_json::json!(1),
        ]);
        actions.execute(&action, &mut config.clone(), &mut strum, &ctx());
        assert_eq!(actions.progression_state().current_chord().map(str::to_string).is_some(), true);
    }

    #[test]
    fn unknown_action_name_returns_false() {
        let mut actions = Actions::new();
        let mut config = Config::default();
        let mut strum = StrumDetector::new();
        let executed = actions.execute(&ActionValue::Name("not-a-real-action".into()), &mut config, &mut strum, &ctx());
        assert!(!executed);
    }

    #[test]
    fn none_action_is_noop() {
        let mut actions = Actions::new();
        let mut config = Config::default();
        let mut strum = StrumDetector::new();
        assert!(!actions.execute(&ActionValue::None, &mut config, &mut strum, &ctx()));
    }
}
