// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! MIDI input bridge: aggregates note-on/off across one or many input
//! ports into a sorted set of currently-held notes, with debounced release
//! so a quick re-press during a chord change doesn't collapse to silence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection};
use tracing::{info, warn};

use crate::note::{index_of_notation, Note, SHARP_NOTATIONS};

const RELEASE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Emitted on every held-note change. `added`/`removed` describe what
/// triggered this emission; `notes` is always the full current chord.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiInputEvent {
    pub notes: Vec<Note>,
    pub added: Option<Note>,
    pub removed: Option<Note>,
    pub port_name: String,
}

fn midi_to_note(midi_note: u8) -> Note {
    let notation = SHARP_NOTATIONS[(midi_note % 12) as usize];
    let octave = (midi_note as i32 / 12) - 1;
    Note::new(notation, octave)
}

fn sort_notes(notes: &mut Vec<Note>) {
    notes.sort_by_key(|n| n.to_midi());
}

struct Shared {
    held: Mutex<Vec<Note>>,
    generation: Mutex<u64>,
    sender: Sender<MidiInputEvent>,
}

/// Aggregates note state from all connected input ports. Each port gets its
/// own `midir` connection; held-note state is shared across all of them so
/// e.g. releasing the last key on one keyboard while another is held still
/// reports a non-empty chord.
pub struct MidiInputBridge {
    shared: Arc<Shared>,
    connections: Vec<(String, MidiInputConnection<()>)>,
}

impl MidiInputBridge {
    /// `sender` receives one [`MidiInputEvent`] per held-note change (after
    /// debounce resolves, for releases).
    pub fn new(sender: Sender<MidiInputEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                held: Mutex::new(Vec::new()),
                generation: Mutex::new(0),
                sender,
            }),
            connections: Vec::new(),
        }
    }

    pub fn held_notes(&self) -> Vec<Note> {
        self.shared.held.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Names of the ports currently connected, for the WebSocket server's
    /// `midi-input-status` message.
    pub fn connected_port_names(&self) -> Vec<String> {
        self.connections.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Every MIDI input port currently visible to the system, for the
    /// WebSocket server's `midi-input`/`midi-input-status` messages.
    pub fn available_ports() -> Vec<String> {
        match MidiInput::new("Sketchatone Input Scan") {
            Ok(scan) => scan
                .ports()
                .iter()
                .filter_map(|port| scan.port_name(port).ok())
                .collect(),
            Err(err) => {
                warn!(error = %err, "failed to enumerate MIDI input ports");
                Vec::new()
            }
        }
    }

    /// Connect to every available input port whose name does not
    /// substring-match any of `exclude_patterns` (case-insensitive),
    /// preventing loopback onto our own virtual output, the router, or
    /// through-ports.
    pub fn connect_all(&mut self, exclude_patterns: &[String]) -> bool {
        self.disconnect();

        let scan = match MidiInput::new("Sketchatone Input Scan") {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "failed to enumerate MIDI input ports");
                return false;
            }
        };
        let ports = scan.ports();
        if ports.is_empty() {
            warn!("no MIDI input ports available");
            return false;
        }

        let mut connected = 0;
        for port in &ports {
            let Ok(name) = scan.port_name(port) else {
                continue;
            };
            if exclude_patterns
                .iter()
                .any(|pattern| name.to_lowercase().contains(&pattern.to_lowercase()))
            {
                continue;
            }

            match self.connect_port(&name) {
                Some(connection) => {
                    self.connections.push((name, connection));
                    connected += 1;
                }
                None => continue,
            }
        }

        if connected > 0 {
            info!(count = connected, "connected to MIDI input ports");
            true
        } else {
            warn!("no eligible MIDI input ports after exclusions");
            false
        }
    }

    /// Connect to a single port by name substring or numeric index.
    pub fn connect(&mut self, port_id: &str) -> bool {
        self.disconnect();
        let scan = match MidiInput::new("Sketchatone Input Scan") {
            Ok(m) => m,
            Err(_) => return false,
        };
        let ports = scan.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| scan.port_name(p).unwrap_or_default())
            .collect();
        let index = crate::midi::resolve_port(port_id, &names);
        let Some(name) = names.get(index) else {
            return false;
        };

        match self.connect_port(name) {
            Some(connection) => {
                self.connections.push((name.clone(), connection));
                true
            }
            None => false,
        }
    }

    fn connect_port(&self, port_name: &str) -> Option<MidiInputConnection<()>> {
        let mut input = MidiInput::new("Sketchatone Input").ok()?;
        input.ignore(midir::Ignore::All);
        let ports = input.ports();
        let port = ports
            .iter()
            .find(|p| input.port_name(p).as_deref() == Ok(port_name))?;

        let shared = Arc::clone(&self.shared);
        let name = port_name.to_string();
        input
            .connect(
                port,
                "sketchatone-input",
                move |_stamp, message, _| {
                    handle_message(&shared, message, &name);
                },
                (),
            )
            .ok()
    }

    pub fn disconnect(&mut self) {
        self.connections.clear();
        *self.shared.held.lock().unwrap() = Vec::new();
    }
}

fn handle_message(shared: &Arc<Shared>, message: &[u8], port_name: &str) {
    if message.len() < 3 {
        return;
    }
    let status = message[0];
    let note_number = message[1];
    let velocity = message[2];
    let note = midi_to_note(note_number);

    if (0x90..=0x9F).contains(&status) && velocity > 0 {
        on_note_down(shared, note, port_name);
    } else if (0x80..=0x8F).contains(&status) || ((0x90..=0x9F).contains(&status) && velocity == 0) {
        on_note_up(shared, note, port_name);
    }
}

fn on_note_down(shared: &Arc<Shared>, note: Note, port_name: &str) {
    let notes_copy = {
        let mut held = shared.held.lock().unwrap();
        if held.contains(&note) {
            return;
        }
        held.push(note.clone());
        sort_notes(&mut held);
        held.clone()
    };
    let _ = shared.sender.send(MidiInputEvent {
        notes: notes_copy,
        added: Some(note),
        removed: None,
        port_name: port_name.to_string(),
    });
}

fn on_note_up(shared: &Arc<Shared>, note: Note, port_name: &str) {
    let removed = {
        let mut held = shared.held.lock().unwrap();
        let Some(pos) = held.iter().position(|n| *n == note) else {
            return;
        };
        held.remove(pos);
        true
    };
    if !removed {
        return;
    }

    let my_generation = {
        let mut generation = shared.generation.lock().unwrap();
        *generation += 1;
        *generation
    };

    let shared = Arc::clone(shared);
    let port_name = port_name.to_string();
    std::thread::spawn(move || {
        std::thread::sleep(RELEASE_DEBOUNCE);
        let still_current = *shared.generation.lock().unwrap() == my_generation;
        if !still_current {
            return;
        }
        let held = shared.held.lock().unwrap().clone();
        if held.is_empty() {
            // All notes released: the previously applied chord stays in
            // place, so nothing is emitted.
            return;
        }
        let _ = shared.sender.send(MidiInputEvent {
            notes: held,
            added: None,
            removed: Some(note),
            port_name,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn note_down_emits_immediately() {
        let (tx, rx) = unbounded();
        let bridge = MidiInputBridge::new(tx);
        handle_message(&bridge.shared, &[0x90, 60, 100], "Test Port");
        let event = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event.added, Some(Note::new("C", 4)));
        assert_eq!(event.notes, vec![Note::new("C", 4)]);
    }

    #[test]
    fn note_up_debounces_and_preserves_chord_when_nonempty() {
        let (tx, rx) = unbounded();
        let bridge = MidiInputBridge::new(tx);
        handle_message(&bridge.shared, &[0x90, 60, 100], "Test");
        rx.recv_timeout(Duration::from_millis(100)).unwrap();
        handle_message(&bridge.shared, &[0x90, 64, 100], "Test");
        rx.recv_timeout(Duration::from_millis(100)).unwrap();

        handle_message(&bridge.shared, &[0x80, 60, 0], "Test");
        let event = rx.recv_timeout(Duration::from_millis(300)).unwrap();
        assert_eq!(event.notes, vec![Note::new("E", 4)]);
    }

    #[test]
    fn releasing_last_note_emits_nothing() {
        let (tx, rx) = unbounded();
        let bridge = MidiInputBridge::new(tx);
        handle_message(&bridge.shared, &[0x90, 60, 100], "Test");
        rx.recv_timeout(Duration::from_millis(100)).unwrap();

        handle_message(&bridge.shared, &[0x80, 60, 0], "Test");
        assert!(rx.recv_timeout(Duration::from_millis(250)).is_err());
        assert!(bridge.held_notes().is_empty());
    }

    #[test]
    fn note_on_with_zero_velocity_is_a_release() {
        let (tx, rx) = unbounded();
        let bridge = MidiInputBridge::new(tx);
        handle_message(&bridge.shared, &[0x90, 60, 100], "Test");
        rx.recv_timeout(Duration::from_millis(100)).unwrap();
        handle_message(&bridge.shared, &[0x90, 60, 0], "Test");
        assert!(rx.recv_timeout(Duration::from_millis(250)).is_err());
        assert!(bridge.held_notes().is_empty());
    }
}
