// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Sketchatone Core
//!
//! Pure Rust engine that turns a pressure-sensitive drawing tablet into a
//! polyphonic MIDI "strummer": note primitives and parameter mapping, the
//! pressure/position strum detector, the button-action dispatcher, MIDI
//! output and input backends, the note-off scheduler shared by both, the
//! per-frame pipeline orchestrator, the latest-wins event bus that feeds a
//! WebSocket server, and the hierarchical configuration model. Zero UI,
//! zero HID-transport dependencies — those are supplied by the embedding
//! application (see `sketchatone-server`).
//!
//! # Architecture
//!
//! Each HID frame flows through [`pipeline::Pipeline::process_frame`]:
//! tablet frame -> event bus, button edge detection -> [`actions::Actions`],
//! pitch-bend/note-duration/note-velocity via [`mapping::ParameterMapping`],
//! strum detection via [`strum::StrumDetector`], MIDI dispatch via
//! [`midi::MidiBackend`], strum payload -> event bus.

#![allow(missing_docs)]

pub mod actions;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod mapping;
pub mod midi;
pub mod midi_input;
pub mod note;
pub mod pipeline;
pub mod scheduler;
pub mod strum;

pub use actions::{ActionContext, Actions};
pub use bus::EventBus;
pub use config::Config;
pub use error::{ConfigError, MidiError, NoteError};
pub use events::{CombinedEvent, StrumPayload, StrumPayloadNote, StrumPayloadType, TabletFrame, TabletState};
pub use mapping::{ControlSource, ParameterMapping, Spread};
pub use midi::{build_backend, Channel, MidiBackend};
pub use midi_input::{MidiInputBridge, MidiInputEvent};
pub use note::Note;
pub use pipeline::Pipeline;
pub use scheduler::Scheduler;
pub use strum::{StrumDetector, StrumEvent, StrumNote};
