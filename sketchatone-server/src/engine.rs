// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Engine thread: the single OS thread that owns the
//! [`Pipeline`] for the lifetime of the process — nothing else ever
//! touches the strum detector or action-dispatcher state directly. The
//! async side (WebSocket handler, MIDI-input status reporting) talks to it
//! through [`EngineHandle`], which posts commands and awaits a
//! `oneshot` reply; the MIDI input bridge's own crossbeam channel is read
//! on this same thread so held notes never cross a lock.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::{broadcast, oneshot};
use tracing::warn;

use sketchatone_core::{
    build_backend, Config, ConfigError, EventBus, MidiBackend, MidiInputBridge, MidiInputEvent,
    Note, Pipeline, Scheduler,
};

use crate::hid::FrameSource;

/// Notifications the throttled event bus can't carry: config mutations
/// (including ones driven by a stylus/tablet button action, not just an
/// explicit `update-config` message) and MIDI-input deltas.
#[derive(Debug, Clone)]
pub enum ServerNotification {
    ConfigChanged,
    MidiInput {
        event: MidiInputEvent,
        available_ports: Vec<String>,
        connected_port: Option<String>,
    },
    MidiInputStatus {
        connected: bool,
        available_ports: Vec<String>,
        connected_port: Option<String>,
        current_notes: Vec<Note>,
    },
}

enum EngineCommand {
    UpdateConfig {
        path: String,
        value: serde_json::Value,
        reply: oneshot::Sender<Result<Config, ConfigError>>,
    },
    SaveConfig {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Snapshot {
        reply: oneshot::Sender<(Config, Vec<Note>)>,
    },
    MidiInputSnapshot {
        reply: oneshot::Sender<MidiInputStatus>,
    },
}

/// A point-in-time read of the MIDI input bridge, for a newly connected
/// client's `midi-input-status` message.
#[derive(Debug, Clone)]
pub struct MidiInputStatus {
    pub connected: bool,
    pub available_ports: Vec<String>,
    pub connected_port: Option<String>,
    pub current_notes: Vec<Note>,
}

/// Cheap to clone; every clone posts to the same engine thread's command
/// queue. This is the only way the async side reaches the pipeline.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    shutdown: Sender<()>,
}

const CHANNEL_CLOSED: &str = "engine thread is not running";

impl EngineHandle {
    pub async fn update_config(
        &self,
        path: String,
        value: serde_json::Value,
    ) -> Result<Config, ConfigError> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::UpdateConfig { path, value, reply })
            .is_err()
        {
            return Err(ConfigError::UnknownPath(CHANNEL_CLOSED.into()));
        }
        rx.await.unwrap_or_else(|_| Err(ConfigError::UnknownPath(CHANNEL_CLOSED.into())))
    }

    pub async fn save_config(&self, path: PathBuf) -> Result<(), ConfigError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(EngineCommand::SaveConfig { path, reply }).is_err() {
            return Err(ConfigError::UnknownPath(CHANNEL_CLOSED.into()));
        }
        rx.await.unwrap_or_else(|_| Err(ConfigError::UnknownPath(CHANNEL_CLOSED.into())))
    }

    pub async fn snapshot(&self) -> Option<(Config, Vec<Note>)> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(EngineCommand::Snapshot { reply }).ok()?;
        rx.await.ok()
    }

    pub async fn midi_input_snapshot(&self) -> Option<MidiInputStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(EngineCommand::MidiInputSnapshot { reply }).ok()?;
        rx.await.ok()
    }

    /// Ask the engine thread to disconnect MIDI and stop, then block until
    /// it does. Safe to call more than once; later calls just fail to send
    /// on an already-closed channel and return immediately.
    pub fn shutdown_and_join(&self, handle: std::thread::JoinHandle<()>) {
        let _ = self.shutdown.send(());
        if handle.join().is_err() {
            warn!("engine thread panicked during shutdown");
        }
    }
}

/// Dotted paths that, once written, require re-deriving the strum
/// detector's active notes (a new chord, a different spread width, a
/// different initial-notes list) rather than just a field write.
fn touches_notes(path: &str) -> bool {
    let p = path.to_ascii_lowercase();
    p.contains("chord") || p.contains("notespread") || p.contains("initialnotes")
}

fn touches_midi_channel(path: &str) -> bool {
    let p = path.to_ascii_lowercase();
    p.ends_with("midichannel")
}

/// Spawn the engine thread and the MIDI input bridge it owns; returns a
/// handle for the async side plus the thread's `JoinHandle` for shutdown.
pub fn spawn(
    config: Config,
    scheduler: Scheduler,
    bus: std::sync::Arc<EventBus>,
    frame_source: FrameSource,
    notifications: broadcast::Sender<ServerNotification>,
) -> (EngineHandle, std::thread::JoinHandle<()>) {
    let backend = match build_backend(&config.midi, scheduler.clone()) {
        Ok(backend) => backend,
        Err(err) => {
            warn!(error = %err, "MIDI backend unavailable, continuing without MIDI output");
            Box::new(sketchatone_core::midi::RtMidiBackend::new(scheduler)) as Box<dyn MidiBackend>
        }
    };

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

    let join_handle = std::thread::Builder::new()
        .name("sketchatone-engine".into())
        .spawn(move || run(config, backend, bus, frame_source, cmd_rx, shutdown_rx, notifications))
        .expect("failed to spawn engine thread");

    (
        EngineHandle { commands: cmd_tx, shutdown: shutdown_tx },
        join_handle,
    )
}

fn run(
    config: Config,
    mut backend: Box<dyn MidiBackend>,
    bus: std::sync::Arc<EventBus>,
    frame_source: FrameSource,
    commands: Receiver<EngineCommand>,
    shutdown: Receiver<()>,
    notifications: broadcast::Sender<ServerNotification>,
) {
    if !backend.connect(config.midi.midi_output_id.as_deref()) {
        warn!("failed to connect MIDI output backend; running without MIDI output");
    }

    let midi_input_id = config.midi.midi_input_id.clone();
    let midi_input_exclude = config.midi.midi_input_exclude.clone();

    let mut pipeline = Pipeline::new(config, backend, bus);

    let (midi_tx, midi_rx) = crossbeam_channel::unbounded();
    let mut midi_input = MidiInputBridge::new(midi_tx);
    let connected = match &midi_input_id {
        Some(id) => midi_input.connect(id),
        None => midi_input.connect_all(&midi_input_exclude),
    };
    let _ = notifications.send(ServerNotification::MidiInputStatus {
        connected,
        available_ports: MidiInputBridge::available_ports(),
        connected_port: midi_input.connected_port_names().into_iter().next(),
        current_notes: midi_input.held_notes(),
    });

    loop {
        crossbeam_channel::select! {
            recv(frame_source.receiver()) -> frame => match frame {
                Ok(frame) => process_frame(&mut pipeline, frame),
                Err(_) => break,
            },
            recv(midi_rx) -> event => {
                if let Ok(event) = event {
                    pipeline.apply_external_notes(event.notes.clone());
                    let _ = notifications.send(ServerNotification::MidiInput {
                        available_ports: MidiInputBridge::available_ports(),
                        connected_port: midi_input.connected_port_names().into_iter().next(),
                        event,
                    });
                }
            },
            recv(commands) -> cmd => match cmd {
                Ok(cmd) => handle_command(&mut pipeline, &midi_input, cmd, &notifications),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }

    pipeline.backend().disconnect();
    midi_input.disconnect();
}

/// Wraps frame processing in `catch_unwind` so one malformed frame can't
/// take the whole engine thread (and every client connected to it) down
/// with it.
fn process_frame(pipeline: &mut Pipeline, frame: sketchatone_core::TabletFrame) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pipeline.process_frame(frame);
    }));
    if result.is_err() {
        warn!("HID frame processing panicked; frame dropped, pipeline continues");
    }
}

fn handle_command(
    pipeline: &mut Pipeline,
    midi_input: &MidiInputBridge,
    cmd: EngineCommand,
    notifications: &broadcast::Sender<ServerNotification>,
) {
    match cmd {
        EngineCommand::UpdateConfig { path, value, reply } => {
            let mut config = pipeline.config().clone();
            let outcome = match config.set_path(&path, value) {
                Ok(()) => {
                    *pipeline.config_mut() = config.clone();
                    if touches_notes(&path) {
                        pipeline.reseed_detector();
                    }
                    if touches_midi_channel(&path) {
                        pipeline.set_midi_channel(config.strummer.strumming.midi_channel);
                    }
                    let _ = notifications.send(ServerNotification::ConfigChanged);
                    Ok(config)
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "rejected update-config path");
                    Err(err)
                }
            };
            let _ = reply.send(outcome);
        }
        EngineCommand::SaveConfig { path, reply } => {
            let _ = reply.send(pipeline.config().save(&path));
        }
        EngineCommand::Snapshot { reply } => {
            let _ = reply.send((pipeline.config().clone(), pipeline.current_notes()));
        }
        EngineCommand::MidiInputSnapshot { reply } => {
            let _ = reply.send(MidiInputStatus {
                connected: midi_input.is_connected(),
                available_ports: MidiInputBridge::available_ports(),
                connected_port: midi_input.connected_port_names().into_iter().next(),
                current_notes: midi_input.held_notes(),
            });
        }
    }
}
