// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Error types for the WebSocket/HTTP transport layer.
//!
//! Mirrors the core crate's per-component `thiserror` split (`ConfigError`,
//! `MidiError`, `NoteError`): the scheduler and MIDI backend have no
//! fallible entry points worth a dedicated enum (every operation there
//! already degrades to log-and-continue), so this crate adds exactly
//! one new error type for the one genuinely fallible surface it owns.

use thiserror::Error;

/// Errors surfaced while standing up or running the WebSocket/HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}
