// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! WebSocket server: the browser-facing transport for the event bus,
//! live config mutation, and MIDI-input status.
//!
//! Broadcasts are await-per-client with a 1 s per-send timeout; a client
//! that times out or whose socket has closed is evicted rather than
//! letting one slow reader stall every other subscriber. Broadcasting is
//! serialized — one client at a time — so a single send never races
//! another.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use sketchatone_core::{CombinedEvent, Config, EventBus, MidiInputEvent, Note};

use crate::engine::{EngineHandle, ServerNotification};
use crate::error::ServerError;

const SEND_TIMEOUT: Duration = Duration::from_secs(1);
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

struct Session {
    id: u64,
    sink: Mutex<WsSink>,
}

/// Owns every connected client and the two background tasks that feed them:
/// the throttled event-bus flush and the side-channel notification relay.
pub struct WsServer {
    engine: EngineHandle,
    bus: Arc<EventBus>,
    config_path: PathBuf,
    notifications: broadcast::Sender<ServerNotification>,
    sessions: Mutex<Vec<Arc<Session>>>,
    next_session_id: AtomicU64,
}

impl WsServer {
    pub fn new(
        engine: EngineHandle,
        bus: Arc<EventBus>,
        config_path: PathBuf,
        notifications: broadcast::Sender<ServerNotification>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            bus,
            config_path,
            notifications,
            sessions: Mutex::new(Vec::new()),
            next_session_id: AtomicU64::new(1),
        })
    }

    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!(%addr, "WebSocket server listening");

        tokio::spawn(self.clone().flush_loop());
        tokio::spawn(self.clone().notification_loop());

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "WebSocket accept failed");
                    continue;
                }
            };
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream, peer).await {
                    warn!(%peer, error = %err, "WebSocket session failed");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (write, mut read) = ws.split();

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session { id: session_id, sink: Mutex::new(write) });

        self.send_initial_state(&session).await;

        self.sessions.lock().await.push(session.clone());
        self.bus.add_subscriber();
        info!(%peer, session_id, "WebSocket client connected");

        while let Some(message) = read.next().await {
            let message = match message {
                Ok(m) => m,
                Err(_) => break,
            };
            match message {
                Message::Text(text) => self.handle_client_message(&text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.remove_session(session_id).await;
        self.bus.remove_subscriber();
        info!(%peer, session_id, "WebSocket client disconnected");
        Ok(())
    }

    async fn remove_session(&self, id: u64) {
        self.sessions.lock().await.retain(|s| s.id != id);
    }

    async fn send_initial_state(&self, session: &Arc<Session>) {
        if let Some((config, notes)) = self.engine.snapshot().await {
            send_to(session, config_message(&config, &notes, self.bus.throttle_ms())).await;
        }
        send_to(
            session,
            Message::Text(
                json!({
                    "type": "status",
                    "status": "connected",
                    "deviceConnected": true,
                    "timestamp": now_millis(),
                })
                .to_string(),
            ),
        )
        .await;
        if let Some(status) = self.engine.midi_input_snapshot().await {
            send_to(
                session,
                midi_input_status_message(
                    status.connected,
                    status.available_ports,
                    status.connected_port,
                    &status.current_notes,
                ),
            )
            .await;
        }
    }

    async fn handle_client_message(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "malformed client message, ignoring");
                return;
            }
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            warn!(?value, "client message missing type, ignoring");
            return;
        };

        match kind {
            "set-throttle" => {
                let ms = value
                    .get("throttleMs")
                    .or_else(|| value.get("throttle"))
                    .and_then(Value::as_u64);
                if let Some(ms) = ms {
                    self.bus.set_throttle_ms(ms);
                }
            }
            "update-config" => {
                let path = value.get("path").and_then(Value::as_str);
                let new_value = value.get("value");
                let (Some(path), Some(new_value)) = (path, new_value) else {
                    warn!(?value, "update-config missing path/value, ignoring");
                    return;
                };
                match self.engine.update_config(path.to_string(), new_value.clone()).await {
                    Ok(config) => {
                        let notes = self
                            .engine
                            .snapshot()
                            .await
                            .map(|(_, notes)| notes)
                            .unwrap_or_default();
                        self.broadcast(config_message(&config, &notes, self.bus.throttle_ms())).await;
                    }
                    Err(err) => warn!(path, error = %err, "update-config rejected"),
                }
            }
            "save-config" => {
                if let Err(err) = self.engine.save_config(self.config_path.clone()).await {
                    warn!(error = %err, "save-config failed");
                }
            }
            other => warn!(kind = other, "unknown client message type, ignoring"),
        }
    }

    /// Send `message` to every connected client, one at a time, evicting
    /// anyone whose send doesn't complete within [`SEND_TIMEOUT`].
    async fn broadcast(&self, message: Message) {
        let sessions = self.sessions.lock().await.clone();
        let mut dead = Vec::new();
        for session in &sessions {
            if !send_to(session, message.clone()).await {
                dead.push(session.id);
            }
        }
        if !dead.is_empty() {
            self.sessions.lock().await.retain(|s| !dead.contains(&s.id));
        }
    }

    /// Flushes the latest-wins event bus on the configured cadence,
    /// re-reading the throttle each cycle so a client's `set-throttle`
    /// takes effect without restarting anything.
    async fn flush_loop(self: Arc<Self>) {
        loop {
            let throttle = self.bus.throttle_ms().max(1);
            tokio::time::sleep(Duration::from_millis(throttle)).await;
            if let Some(event) = self.bus.flush() {
                self.broadcast(tablet_data_message(&event)).await;
            }
        }
    }

    /// Relays engine-thread notifications that fall outside the throttled
    /// tablet/strum stream: config mutations triggered by an action (not
    /// just an explicit `update-config` message) and MIDI-input deltas.
    async fn notification_loop(self: Arc<Self>) {
        let mut rx = self.notifications.subscribe();
        loop {
            match rx.recv().await {
                Ok(ServerNotification::ConfigChanged) => {
                    if let Some((config, notes)) = self.engine.snapshot().await {
                        self.broadcast(config_message(&config, &notes, self.bus.throttle_ms())).await;
                    }
                }
                Ok(ServerNotification::MidiInput { event, available_ports, connected_port }) => {
                    self.broadcast(midi_input_message(&event, available_ports, connected_port)).await;
                }
                Ok(ServerNotification::MidiInputStatus { connected, available_ports, connected_port, current_notes }) => {
                    self.broadcast(midi_input_status_message(connected, available_ports, connected_port, &current_notes))
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification relay lagged, some updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Send one message to one client, bounded by [`SEND_TIMEOUT`]. Returns
/// `false` if the client should be evicted.
async fn send_to(session: &Arc<Session>, message: Message) -> bool {
    let mut sink = session.sink.lock().await;
    matches!(tokio::time::timeout(SEND_TIMEOUT, sink.send(message)).await, Ok(Ok(())))
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn config_message(config: &Config, notes: &[Note], throttle_ms: u64) -> Message {
    Message::Text(
        json!({
            "type": "config",
            "data": {
                "throttleMs": throttle_ms,
                "notes": notes,
                "config": config.to_canonical_json(),
                "serverVersion": SERVER_VERSION,
            }
        })
        .to_string(),
    )
}

/// Flattens `tablet` fields directly onto the message (matching the
/// client's expectation of a single `tablet-data` object) and nests `strum`
/// when a strum/release fired on the same frame.
fn tablet_data_message(event: &CombinedEvent) -> Message {
    let mut payload = json!({ "type": "tablet-data", "timestamp": now_millis() });
    let obj = payload.as_object_mut().expect("object literal");

    if let Some(tablet) = &event.tablet {
        if let Ok(Value::Object(tablet_obj)) = serde_json::to_value(tablet) {
            obj.extend(tablet_obj);
        }
    }
    if let Some(strum) = &event.strum {
        obj.insert("strum".to_string(), serde_json::to_value(strum).unwrap_or(Value::Null));
    }

    Message::Text(payload.to_string())
}

fn midi_input_message(event: &MidiInputEvent, available_ports: Vec<String>, connected_port: Option<String>) -> Message {
    Message::Text(
        json!({
            "type": "midi-input",
            "notes": event.notes,
            "added": event.added,
            "removed": event.removed,
            "portName": event.port_name,
            "availablePorts": available_ports,
            "connectedPort": connected_port,
        })
        .to_string(),
    )
}

fn midi_input_status_message(
    connected: bool,
    available_ports: Vec<String>,
    connected_port: Option<String>,
    current_notes: &[Note],
) -> Message {
    Message::Text(
        json!({
            "type": "midi-input-status",
            "connected": connected,
            "availablePorts": available_ports,
            "connectedPort": connected_port,
            "currentNotes": current_notes,
        })
        .to_string(),
    )
}
