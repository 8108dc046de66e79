// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! rtmidi-backed [`MidiBackend`] implementation, built on `midir`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use midir::{MidiOutput, MidiOutputConnection};
use tracing::{info, warn};

#[cfg(not(target_os = "windows"))]
use midir::os::unix::VirtualOutput;

use super::{quantize_pitch_bend, resolve_port, Channel, MidiBackend};
use crate::note::Note;
use crate::scheduler::{NoteKey, Scheduler};

fn channel_mask(channels: &[u8]) -> u16 {
    channels.iter().fold(0u16, |mask, ch| mask | (1 << ch))
}

pub struct RtMidiBackend {
    connection: Arc<Mutex<Option<MidiOutputConnection>>>,
    default_channel: Option<u8>,
    scheduler: Scheduler,
}

impl RtMidiBackend {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            default_channel: None,
            scheduler,
        }
    }

    /// 0-based channel indices a send with an explicit `channel` override,
    /// the backend's configured default, or omni (0..16) should use.
    fn channels_for(&self, channel: Channel) -> Vec<u8> {
        if let Some(ch) = channel {
            vec![ch]
        } else if let Some(ch) = self.default_channel {
            vec![ch]
        } else {
            (0..16).collect()
        }
    }

    fn send_raw(&self, channels: &[u8], status_nibble: u8, data1: u8, data2: u8) {
        let mut guard = self.connection.lock().unwrap();
        let Some(connection) = guard.as_mut() else {
            return;
        };
        for &ch in channels {
            let _ = connection.send(&[status_nibble + ch, data1, data2]);
        }
    }
}

impl MidiBackend for RtMidiBackend {
    fn is_connected(&self) -> bool {
        self.connection.lock().unwrap().is_some()
    }

    fn connect(&mut self, output_port: Option<&str>) -> bool {
        let midi_out = match MidiOutput::new("Sketchatone") {
            Ok(out) => out,
            Err(err) => {
                warn!(error = %err, "failed to initialize MIDI output");
                return false;
            }
        };

        let ports = midi_out.ports();
        if ports.is_empty() {
            warn!("no MIDI output ports available, creating virtual port");
            #[cfg(not(target_os = "windows"))]
            {
                return match midi_out.create_virtual("Sketchatone") {
                    Ok(connection) => {
                        *self.connection.lock().unwrap() = Some(connection);
                        info!("created virtual MIDI port: Sketchatone");
                        true
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to create virtual MIDI port");
                        false
                    }
                };
            }
            #[cfg(target_os = "windows")]
            {
                warn!("virtual MIDI ports are unavailable on Windows");
                return false;
            }
        }

        let names: Vec<String> = ports
            .iter()
            .enumerate()
            .map(|(i, p)| midi_out.port_name(p).unwrap_or_else(|_| format!("Port {i}")))
            .collect();
        let index = output_port.map(|id| resolve_port(id, &names)).unwrap_or(0);

        match midi_out.connect(&ports[index], &names[index]) {
            Ok(connection) => {
                info!(port = %names[index], "connected to MIDI output");
                *self.connection.lock().unwrap() = Some(connection);
                true
            }
            Err(err) => {
                warn!(error = %err, port = %names[index], "failed to connect to MIDI output");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.scheduler.cancel_all();
        for ch in 0u8..16 {
            self.send_raw(&[ch], 0xB0, 123, 0);
            self.send_raw(&[ch], 0xB0, 121, 0);
            let (lsb, msb) = quantize_pitch_bend(0.0);
            self.send_raw(&[ch], 0xE0, lsb, msb);
        }
        *self.connection.lock().unwrap() = None;
        info!("MIDI output disconnected");
    }

    fn set_channel(&mut self, channel: Channel) {
        self.default_channel = channel;
    }

    fn send_note_on(&mut self, note: &Note, velocity: u8, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let channels = self.channels_for(channel);
        self.send_raw(&channels, 0x90, note.to_midi() as u8, velocity);
    }

    fn send_note_off(&mut self, note: &Note, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let channels = self.channels_for(channel);
        self.send_raw(&channels, 0x80, note.to_midi() as u8, 0x40);
    }

    fn send_note(&mut self, note: &Note, velocity: u8, duration_secs: f64, channel: Channel) {
        self.send_raw_note(note.to_midi() as u8, velocity, duration_secs, channel);
    }

    fn send_raw_note(&mut self, midi_note: u8, velocity: u8, duration_secs: f64, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let channels = self.channels_for(channel);
        self.send_raw(&channels, 0x90, midi_note, velocity);

        let key: NoteKey = (midi_note, channel_mask(&channels));
        let connection = Arc::clone(&self.connection);
        self.scheduler
            .schedule(key, Duration::from_secs_f64(duration_secs.max(0.0)), move || {
                let mut guard = connection.lock().unwrap();
                if let Some(connection) = guard.as_mut() {
                    for &ch in &channels {
                        let _ = connection.send(&[0x80 + ch, midi_note, 0x40]);
                    }
                }
            });
    }

    fn release_notes(&mut self, notes: &[Note]) {
        if !self.is_connected() || notes.is_empty() {
            return;
        }
        let channels = self.channels_for(None);
        let mask = channel_mask(&channels);
        for note in notes {
            let midi_note = note.to_midi() as u8;
            self.scheduler.cancel((midi_note, mask));
            self.send_raw(&channels, 0x80, midi_note, 0x40);
        }
    }

    fn send_pitch_bend(&mut self, value: f64) {
        if !self.is_connected() {
            return;
        }
        let (lsb, msb) = quantize_pitch_bend(value);
        let channels = self.channels_for(None);
        self.send_raw(&channels, 0xE0, lsb, msb);
    }

    fn get_available_ports(&self) -> Vec<String> {
        let Ok(midi_out) = MidiOutput::new("Sketchatone Port List") else {
            return Vec::new();
        };
        midi_out
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| midi_out.port_name(p).unwrap_or_else(|_| format!("Port {i}")))
            .collect()
    }
}

impl Drop for RtMidiBackend {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_for_defaults_to_omni() {
        let backend = RtMidiBackend::new(Scheduler::start());
        assert_eq!(backend.channels_for(None).len(), 16);
        assert_eq!(backend.channels_for(Some(3)), vec![3]);
    }

    #[test]
    fn sends_are_no_ops_when_disconnected() {
        let mut backend = RtMidiBackend::new(Scheduler::start());
        assert!(!backend.is_connected());
        backend.send_note_on(&Note::new("C", 4), 100, None);
        backend.send_pitch_bend(0.5);
    }

    #[test]
    fn channel_mask_builds_bitset() {
        assert_eq!(channel_mask(&[0, 1, 15]), 0b1000_0000_0000_0011);
    }
}
