// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! JACK-backed [`MidiBackend`] implementation for Linux/Zynthian setups.
//! MIDI bytes are produced from ordinary threads into a bounded
//! `crossbeam-channel` queue; the JACK process callback (real-time thread)
//! drains it and writes events into the output port's buffer for the
//! current cycle. Queue-full is logged, never blocking the producer.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use jack::{AsyncClient, Client, ClientOptions, Control, MidiOut, Port, PortFlags, ProcessScope};
use tracing::{info, warn};

use super::{quantize_pitch_bend, Channel, MidiBackend};
use crate::config::JackAutoConnect;
use crate::error::MidiError;
use crate::note::Note;
use crate::scheduler::{NoteKey, Scheduler};

const QUEUE_CAPACITY: usize = 1000;

struct OutputHandler {
    port: Port<MidiOut>,
    receiver: Receiver<Vec<u8>>,
}

impl jack::ProcessHandler for OutputHandler {
    fn process(&mut self, _client: &Client, scope: &ProcessScope) -> Control {
        let mut writer = self.port.writer(scope);
        while let Ok(message) = self.receiver.try_recv() {
            let _ = writer.write(&jack::RawMidi { time: 0, bytes: &message });
        }
        Control::Continue
    }
}

pub struct JackBackend {
    client_name: String,
    auto_connect: JackAutoConnect,
    default_channel: Option<u8>,
    async_client: Option<AsyncClient<(), OutputHandler>>,
    sender: Option<Sender<Vec<u8>>>,
    scheduler: Scheduler,
}

impl JackBackend {
    pub fn new(scheduler: Scheduler) -> Result<Self, MidiError> {
        Ok(Self {
            client_name: "sketchatone".to_string(),
            auto_connect: JackAutoConnect::None,
            default_channel: None,
            async_client: None,
            sender: None,
            scheduler,
        })
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_auto_connect(mut self, mode: JackAutoConnect) -> Self {
        self.auto_connect = mode;
        self
    }

    fn channels_for(&self, channel: Channel) -> Vec<u8> {
        if let Some(ch) = channel {
            vec![ch]
        } else if let Some(ch) = self.default_channel {
            vec![ch]
        } else {
            (0..16).collect()
        }
    }

    fn queue(&self, message: Vec<u8>) {
        let Some(sender) = &self.sender else { return };
        if sender.try_send(message).is_err() {
            warn!("JACK MIDI queue full, dropping event");
        }
    }

    fn auto_connect_to_synths(&self, client: &Client, out_port_name: &str) {
        if self.auto_connect == JackAutoConnect::None {
            info!("JACK auto-connect disabled");
            return;
        }

        let midi_inputs = client.ports(None, Some("8 bit raw midi"), PortFlags::IS_INPUT);

        if self.auto_connect == JackAutoConnect::AllChains {
            let zyn: Vec<&String> = midi_inputs
                .iter()
                .filter(|p| p.contains("ZynMidiRouter") && p.contains("dev") && p.contains("_in"))
                .collect();
            let mut connected = 0;
            for port in &zyn {
                if client.connect_ports_by_name(out_port_name, port).is_ok() {
                    connected += 1;
                }
            }
            if connected > 0 {
                info!(count = connected, "connected to Zynthian chains");
                return;
            }
        }

        if let Some(chain0) = midi_inputs
            .iter()
            .find(|p| p.contains("ZynMidiRouter") && p.contains("dev0_in"))
        {
            if client.connect_ports_by_name(out_port_name, chain0).is_ok() {
                info!("connected to Zynthian chain 0");
                return;
            }
        }

        for synth in ["ZynAddSubFX", "setBfree", "FluidSynth", "LinuxSampler"] {
            if let Some(port) = midi_inputs
                .iter()
                .find(|p| p.contains(synth) && p.to_lowercase().contains("midi_in"))
            {
                if client.connect_ports_by_name(out_port_name, port).is_ok() {
                    info!(synth, "connected to synth engine");
                    return;
                }
            }
        }

        info!("no synths found for auto-connect");
    }
}

impl MidiBackend for JackBackend {
    fn is_connected(&self) -> bool {
        self.async_client.is_some()
    }

    fn connect(&mut self, _output_port: Option<&str>) -> bool {
        let (client, _status) = match Client::new(&self.client_name, ClientOptions::NO_START_SERVER) {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "failed to create JACK client");
                return false;
            }
        };

        let port = match client.register_port("midi_out", MidiOut::default()) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "failed to register JACK MIDI output port");
                return false;
            }
        };
        let out_port_name = match port.name() {
            Ok(n) => n,
            Err(_) => format!("{}:midi_out", self.client_name),
        };

        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        let handler = OutputHandler { port, receiver };

        match client.activate_async((), handler) {
            Ok(async_client) => {
                info!(port = %out_port_name, "JACK client activated");
                self.auto_connect_to_synths(async_client.as_client(), &out_port_name);
                self.async_client = Some(async_client);
                self.sender = Some(sender);
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to activate JACK client");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        self.scheduler.cancel_all();
        for ch in 0u8..16 {
            self.queue(vec![0xB0 + ch, 123, 0]);
            self.queue(vec![0xB0 + ch, 121, 0]);
            let (lsb, msb) = quantize_pitch_bend(0.0);
            self.queue(vec![0xE0 + ch, lsb, msb]);
        }
        std::thread::sleep(Duration::from_millis(20));
        if let Some(async_client) = self.async_client.take() {
            let _ = async_client.deactivate();
        }
        self.sender = None;
        info!("JACK client closed");
    }

    fn set_channel(&mut self, channel: Channel) {
        self.default_channel = channel;
    }

    fn send_note_on(&mut self, note: &Note, velocity: u8, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let midi_note = note.to_midi() as u8;
        for ch in self.channels_for(channel) {
            self.queue(vec![0x90 + ch, midi_note, velocity]);
        }
    }

    fn send_note_off(&mut self, note: &Note, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let midi_note = note.to_midi() as u8;
        for ch in self.channels_for(channel) {
            self.queue(vec![0x80 + ch, midi_note, 0x40]);
        }
    }

    fn send_note(&mut self, note: &Note, velocity: u8, duration_secs: f64, channel: Channel) {
        self.send_raw_note(note.to_midi() as u8, velocity, duration_secs, channel);
    }

    fn send_raw_note(&mut self, midi_note: u8, velocity: u8, duration_secs: f64, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let channels = self.channels_for(channel);
        for &ch in &channels {
            self.queue(vec![0x90 + ch, midi_note, velocity]);
        }

        let mask = channels.iter().fold(0u16, |m, &ch| m | (1 << ch));
        let key: NoteKey = (midi_note, mask);
        let sender = self.sender.clone();
        self.scheduler
            .schedule(key, Duration::from_secs_f64(duration_secs.max(0.0)), move || {
                if let Some(sender) = sender {
                    for &ch in &channels {
                        let _ = sender.try_send(vec![0x80 + ch, midi_note, 0x40]);
                    }
                }
            });
    }

    fn release_notes(&mut self, notes: &[Note]) {
        if !self.is_connected() || notes.is_empty() {
            return;
        }
        let channels = self.channels_for(None);
        let mask = channels.iter().fold(0u16, |m, &ch| m | (1 << ch));
        for note in notes {
            let midi_note = note.to_midi() as u8;
            self.scheduler.cancel((midi_note, mask));
            for &ch in &channels {
                self.queue(vec![0x80 + ch, midi_note, 0x40]);
            }
        }
    }

    fn send_pitch_bend(&mut self, value: f64) {
        if !self.is_connected() {
            return;
        }
        let (lsb, msb) = quantize_pitch_bend(value);
        for ch in self.channels_for(None) {
            self.queue(vec![0xE0 + ch, lsb, msb]);
        }
    }

    fn get_available_ports(&self) -> Vec<String> {
        match &self.async_client {
            Some(async_client) => async_client
                .as_client()
                .ports(None, Some("8 bit raw midi"), PortFlags::IS_INPUT),
            None => Vec::new(),
        }
    }
}

impl Drop for JackBackend {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}
