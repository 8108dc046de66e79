// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Configuration model: typed hierarchical config with JSON
//! (de)serialization, dotted-path get/set, and defaults for every knob.

pub mod loader;
pub mod types;

pub use loader::default_config_path;
pub use types::{
    ActionValue, Config, JackAutoConnect, MidiConfig, MidiOutputBackend, NoteRepeaterConfig,
    ServerConfig, StrumReleaseConfig, StrummerConfig, StrummingConfig, StylusButtonsConfig,
    TabletButtonsConfig, TransposeConfig,
};
