// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Sketchatone server: wires the pure `sketchatone-core` pipeline to a
//! running process.
//!
//! # Architecture
//!
//! ```text
//! HID frames --> engine thread (owns Pipeline, MIDI input bridge)
//!                     |
//!                     +--> EventBus (latest-wins, throttled)
//!                     |         |
//!                     |         v
//!                     |   WebSocket flush loop --> browser clients
//!                     |
//!                     +--> ServerNotification broadcast (config/MIDI-input
//!                               deltas outside the throttled stream)
//!
//! EngineHandle (async) <--> engine thread: update-config / save-config /
//!                                           snapshot, via crossbeam +
//!                                           oneshot reply channels
//! ```
//!
//! HID decoding itself is out of scope ([`hid`] is the seam a real driver
//! feeds); the HTTP static file server in [`http`] serves the browser UI
//! alongside the WebSocket endpoint.

pub mod engine;
pub mod error;
pub mod hid;
pub mod http;
pub mod websocket;

pub use engine::{EngineHandle, ServerNotification};
pub use error::ServerError;
pub use hid::{frame_channel, FrameSender, FrameSource};
pub use websocket::WsServer;
