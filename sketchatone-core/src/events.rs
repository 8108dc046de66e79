// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Shared data model: the normalized HID input frame and the combined
//! event broadcast over the event bus / WebSocket.

use serde::{Deserialize, Serialize};

use crate::note::Note;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabletState {
    Hover,
    Contact,
    OutOfRange,
    Unknown,
}

impl Default for TabletState {
    fn default() -> Self {
        TabletState::Unknown
    }
}

/// One normalized HID sample, already decoded from whatever device-specific
/// byte layout produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletFrame {
    pub x: f64,
    pub y: f64,
    pub pressure: f64,
    pub state: TabletState,
    pub tilt_x: f64,
    pub tilt_y: f64,
    pub tilt_xy: f64,
    pub primary_button: bool,
    pub secondary_button: bool,
    pub button1: bool,
    pub button2: bool,
    pub button3: bool,
    pub button4: bool,
    pub button5: bool,
    pub button6: bool,
    pub button7: bool,
    pub button8: bool,
}

impl Default for TabletFrame {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            pressure: 0.0,
            state: TabletState::Unknown,
            tilt_x: 0.0,
            tilt_y: 0.0,
            tilt_xy: 0.0,
            primary_button: false,
            secondary_button: false,
            button1: false,
            button2: false,
            button3: false,
            button4: false,
            button5: false,
            button6: false,
            button7: false,
            button8: false,
        }
    }
}

impl TabletFrame {
    /// Tablet buttons indexed 1..=8, in order, for rising-edge scanning.
    pub fn numbered_buttons(&self) -> [bool; 8] {
        [
            self.button1,
            self.button2,
            self.button3,
            self.button4,
            self.button5,
            self.button6,
            self.button7,
            self.button8,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrumPayloadType {
    Strum,
    Release,
    /// Reserved in the wire protocol but never generated.
    Mute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrumPayloadNote {
    pub midi: i32,
    pub velocity: u8,
    pub notation: String,
    pub octave: i32,
    pub duration: f64,
}

impl StrumPayloadNote {
    pub fn from_note(note: &Note, velocity: u8, duration: f64) -> Self {
        Self {
            midi: note.to_midi(),
            velocity,
            notation: note.notation.clone(),
            octave: note.octave,
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrumPayload {
    #[serde(rename = "type")]
    pub kind: StrumPayloadType,
    pub notes: Vec<StrumPayloadNote>,
    pub velocity: u8,
    pub x: f64,
    pub pressure: f64,
    pub timestamp: u64,
}

/// The unit of broadcast: a latest-wins tablet snapshot optionally bundled
/// with a strum payload emitted on this flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedEvent {
    pub tablet: Option<TabletFrame>,
    pub strum: Option<StrumPayload>,
}
