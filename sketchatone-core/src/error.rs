// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Errors surfaced while loading, parsing, or mutating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown configuration path: {0}")]
    UnknownPath(String),

    #[error("value for '{path}' is the wrong type: {reason}")]
    WrongType { path: String, reason: String },
}

/// Errors surfaced by the MIDI output backends.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI init failed: {0}")]
    Init(String),

    #[error("no MIDI output ports available")]
    NoPortsAvailable,

    #[error("failed to connect to MIDI port: {0}")]
    ConnectFailed(String),

    #[error("MIDI send failed: {0}")]
    SendFailed(String),
}

/// Errors surfaced by note parsing / chord lookups.
#[derive(Debug, Error)]
pub enum NoteError {
    #[error("empty notation")]
    EmptyNotation,

    #[error("unknown chord type '{0}', falling back to major triad")]
    UnknownChordType(String),

    #[error("unknown chord progression '{0}'")]
    UnknownProgression(String),
}
