// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Configuration data model: hierarchical, typed, camelCase-canonical
//! on the wire, accepting snake_case aliases for every multi-word field so a
//! hand-edited config in either style loads cleanly.

use serde::{Deserialize, Serialize};

use crate::mapping::ParameterMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub strummer: StrummerConfig,
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strummer: StrummerConfig::default(),
            midi: MidiConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrummerConfig {
    #[serde(default)]
    pub strumming: StrummingConfig,
    #[serde(default = "ParameterMapping::default_note_duration")]
    pub note_duration: ParameterMapping,
    #[serde(default = "ParameterMapping::default_pitch_bend")]
    pub pitch_bend: ParameterMapping,
    #[serde(default = "ParameterMapping::default_note_velocity")]
    pub note_velocity: ParameterMapping,
    #[serde(default, alias = "note_repeater")]
    pub note_repeater: NoteRepeaterConfig,
    #[serde(default)]
    pub transpose: TransposeConfig,
    #[serde(default, alias = "stylus_buttons")]
    pub stylus_buttons: StylusButtonsConfig,
    #[serde(default, alias = "tablet_buttons")]
    pub tablet_buttons: TabletButtonsConfig,
    #[serde(default, alias = "strum_release")]
    pub strum_release: StrumReleaseConfig,
}

impl Default for StrummerConfig {
    fn default() -> Self {
        Self {
            strumming: StrummingConfig::default(),
            note_duration: ParameterMapping::default_note_duration(),
            pitch_bend: ParameterMapping::default_pitch_bend(),
            note_velocity: ParameterMapping::default_note_velocity(),
            note_repeater: NoteRepeaterConfig::default(),
            transpose: TransposeConfig::default(),
            stylus_buttons: StylusButtonsConfig::default(),
            tablet_buttons: TabletButtonsConfig::default(),
            strum_release: StrumReleaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrummingConfig {
    #[serde(default = "default_pressure_threshold", alias = "pressure_threshold")]
    pub pressure_threshold: f64,
    #[serde(
        default = "default_pluck_velocity_scale",
        alias = "pluck_velocity_scale"
    )]
    pub pluck_velocity_scale: f64,
    #[serde(default = "default_initial_notes", alias = "initial_notes")]
    pub initial_notes: Vec<String>,
    #[serde(default)]
    pub chord: Option<String>,
    #[serde(default = "default_spread", alias = "upper_note_spread")]
    pub upper_note_spread: usize,
    #[serde(default = "default_spread", alias = "lower_note_spread")]
    pub lower_note_spread: usize,
    #[serde(default, alias = "midi_channel")]
    pub midi_channel: Option<u8>,
}

fn default_pressure_threshold() -> f64 {
    0.1
}
fn default_pluck_velocity_scale() -> f64 {
    4.0
}
fn default_initial_notes() -> Vec<String> {
    vec!["C4".into(), "E4".into(), "G4".into()]
}
fn default_spread() -> usize {
    3
}

impl Default for StrummingConfig {
    fn default() -> Self {
        Self {
            pressure_threshold: default_pressure_threshold(),
            pluck_velocity_scale: default_pluck_velocity_scale(),
            initial_notes: default_initial_notes(),
            chord: None,
            upper_note_spread: default_spread(),
            lower_note_spread: default_spread(),
            midi_channel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRepeaterConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(
        default = "default_unit_multiplier",
        alias = "pressure_multiplier"
    )]
    pub pressure_multiplier: f64,
    #[serde(
        default = "default_unit_multiplier",
        alias = "frequency_multiplier"
    )]
    pub frequency_multiplier: f64,
}

fn default_unit_multiplier() -> f64 {
    1.0
}

impl Default for NoteRepeaterConfig {
    fn default() -> Self {
        Self {
            active: false,
            pressure_multiplier: 1.0,
            frequency_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransposeConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_transpose_semitones")]
    pub semitones: i32,
}

fn default_transpose_semitones() -> i32 {
    12
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            active: false,
            semitones: default_transpose_semitones(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylusButtonsConfig {
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_primary_button_action", alias = "primary_button_action")]
    pub primary_button_action: ActionValue,
    #[serde(default = "default_secondary_button_action", alias = "secondary_button_action")]
    pub secondary_button_action: ActionValue,
}

fn default_true() -> bool {
    true
}

fn default_primary_button_action() -> ActionValue {
    ActionValue::Name("toggle-transpose".to_string())
}

fn default_secondary_button_action() -> ActionValue {
    ActionValue::Name("toggle-repeater".to_string())
}

impl Default for StylusButtonsConfig {
    fn default() -> Self {
        Self {
            active: true,
            primary_button_action: default_primary_button_action(),
            secondary_button_action: default_secondary_button_action(),
        }
    }
}

/// An [`Action`](crate::actions::Action) definition as it appears in config:
/// a bare string, a `[name, ...args]` list, or absent (`null`/`"none"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    None,
    Name(String),
    Call(Vec<serde_json::Value>),
}

impl Default for ActionValue {
    fn default() -> Self {
        ActionValue::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletButtonsConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_progression_chords")]
    pub chords: Vec<String>,
    #[serde(default, alias = "current_index")]
    pub current_index: usize,
    #[serde(default = "default_octave")]
    pub octave: i32,
    #[serde(default, alias = "button_actions")]
    pub button_actions: std::collections::BTreeMap<String, ActionValue>,
}

fn default_mode() -> String {
    "progression".to_string()
}
fn default_preset() -> String {
    "c-major-pop".to_string()
}
fn default_progression_chords() -> Vec<String> {
    vec!["C".into(), "G".into(), "Am".into(), "F".into()]
}
fn default_octave() -> i32 {
    4
}

impl Default for TabletButtonsConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            preset: default_preset(),
            chords: default_progression_chords(),
            current_index: 0,
            octave: default_octave(),
            button_actions: Default::default(),
        }
    }
}

impl TabletButtonsConfig {
    /// Resolve the action bound to hardware button `button_number` (1-8).
    /// In `"individual"` mode this is whatever the config maps to that
    /// button; in `"progression"` mode (the default) it's always a
    /// `set-strum-chord` for the chord at `(button_number - 1) % chords.len()`.
    pub fn button_action(&self, button_number: u8) -> ActionValue {
        if !(1..=8).contains(&button_number) {
            return ActionValue::None;
        }
        if self.mode == "individual" {
            return self
                .button_actions
                .get(&button_number.to_string())
                .cloned()
                .unwrap_or(ActionValue::None);
        }
        if self.chords.is_empty() {
            return ActionValue::None;
        }
        let chord_index = (button_number as usize - 1) % self.chords.len();
        ActionValue::Call(vec![
            serde_json::json!("set-strum-chord"),
            serde_json::json!(self.chords[chord_index]),
            serde_json::json!(self.octave),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrumReleaseConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_release_note", alias = "midi_note")]
    pub midi_note: u8,
    #[serde(default, alias = "midi_channel")]
    pub midi_channel: Option<u8>,
    #[serde(default = "default_release_duration", alias = "max_duration")]
    pub max_duration: f64,
    #[serde(
        default = "default_unit_multiplier",
        alias = "velocity_multiplier"
    )]
    pub velocity_multiplier: f64,
}

fn default_release_note() -> u8 {
    38
}
fn default_release_duration() -> f64 {
    0.25
}

impl Default for StrumReleaseConfig {
    fn default() -> Self {
        Self {
            active: false,
            midi_note: default_release_note(),
            midi_channel: None,
            max_duration: default_release_duration(),
            velocity_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiOutputBackend {
    Rtmidi,
    Jack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JackAutoConnect {
    None,
    Chain0,
    AllChains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiConfig {
    #[serde(default, alias = "midi_output_backend")]
    pub midi_output_backend: MidiOutputBackend,
    #[serde(default, alias = "midi_output_id")]
    pub midi_output_id: Option<String>,
    #[serde(default, alias = "midi_input_id")]
    pub midi_input_id: Option<String>,
    #[serde(default = "default_midi_input_exclude", alias = "midi_input_exclude")]
    pub midi_input_exclude: Vec<String>,
    #[serde(default = "default_jack_client_name", alias = "jack_client_name")]
    pub jack_client_name: String,
    #[serde(default, alias = "jack_auto_connect")]
    pub jack_auto_connect: JackAutoConnect,
    #[serde(default = "default_midi_note_duration", alias = "note_duration")]
    pub note_duration: f64,
}

fn default_midi_input_exclude() -> Vec<String> {
    vec![
        "Sketchatone".to_string(),
        "IAC".to_string(),
        "Midi Through".to_string(),
        "through".to_string(),
    ]
}
fn default_jack_client_name() -> String {
    "sketchatone".to_string()
}
fn default_midi_note_duration() -> f64 {
    1.5
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            midi_output_backend: MidiOutputBackend::Rtmidi,
            midi_output_id: None,
            midi_input_id: None,
            midi_input_exclude: default_midi_input_exclude(),
            jack_client_name: default_jack_client_name(),
            jack_auto_connect: JackAutoConnect::None,
            note_duration: default_midi_note_duration(),
        }
    }
}

impl Default for MidiOutputBackend {
    fn default() -> Self {
        MidiOutputBackend::Rtmidi
    }
}

impl Default for JackAutoConnect {
    fn default() -> Self {
        JackAutoConnect::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_http_port", alias = "http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port", alias = "ws_port")]
    pub ws_port: u16,
    #[serde(
        default = "default_ws_throttle",
        alias = "ws_message_throttle"
    )]
    pub ws_message_throttle: u64,
    #[serde(default, alias = "device_finding_poll_interval")]
    pub device_finding_poll_interval: Option<u64>,
}

fn default_http_port() -> u16 {
    8080
}
fn default_ws_port() -> u16 {
    8081
}
fn default_ws_throttle() -> u64 {
    150
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device: None,
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            ws_message_throttle: default_ws_throttle(),
            device_finding_poll_interval: None,
        }
    }
}
