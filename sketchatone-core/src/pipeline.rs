// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Pipeline orchestrator: the per-HID-frame pipeline tying the strum
//! detector, action dispatcher, parameter mappings, and MIDI backend
//! together, with a copy of every frame and strum handed to the event bus
//! for the WebSocket clients.
//!
//! Runs entirely on the HID reader thread — the strum detector is owned
//! exclusively here, never shared.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::actions::{ActionContext, Actions};
use crate::bus::EventBus;
use crate::config::{ActionValue, Config, StrummingConfig};
use crate::events::{StrumPayload, StrumPayloadNote, StrumPayloadType, TabletFrame};
use crate::mapping::{ControlSource, ParameterMapping};
use crate::midi::{Channel, MidiBackend};
use crate::note::{fill_note_spread, parse_chord, parse_notation, Note};
use crate::strum::{StrumDetector, StrumEvent, StrumNote};

const PITCH_BEND_THROTTLE: Duration = Duration::from_millis(20);
const PITCH_BEND_FAST_PATH: Duration = Duration::from_millis(5);
const PITCH_BEND_FAST_PATH_DELTA: f64 = 0.01;

/// Drum channel (MIDI channel 10 in 1-based nomenclature) the strum-release
/// feature falls back to when no explicit channel is configured.
const STRUM_RELEASE_DEFAULT_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Default)]
struct RepeaterState {
    notes: Vec<StrumNote>,
    holding: bool,
    last_repeat: Option<Instant>,
}

/// Builds the initial strum-note sequence from `strumming`'s chord or
/// explicit note list, expanded by the configured spread. Malformed entries
/// are dropped rather than failing the whole seed.
fn seed_notes(strumming: &StrummingConfig) -> Vec<Note> {
    let base = if let Some(chord) = &strumming.chord {
        parse_chord(chord, 4).unwrap_or_default()
    } else {
        strumming
            .initial_notes
            .iter()
            .filter_map(|n| parse_notation(n).ok())
            .collect()
    };
    fill_note_spread(&base, strumming.lower_note_spread, strumming.upper_note_spread)
}

/// The control-value lookup that feeds pitch-bend/duration/velocity
/// mappings. `tiltX`/`tiltY`/`tiltXY`
/// arrive pre-normalized to `[-1, 1]` on the frame and are renormalized to
/// `[0, 1]` here; `xaxis`/`yaxis` are read straight off the frame; `velocity`
/// falls back to `pressure` (this crate has no separate derived
/// pressure-velocity signal); `none` yields no value.
fn control_value(source: ControlSource, frame: &TabletFrame) -> Option<f64> {
    match source {
        ControlSource::None => None,
        ControlSource::Pressure | ControlSource::Velocity => Some(frame.pressure),
        ControlSource::TiltX => Some((frame.tilt_x + 1.0) / 2.0),
        ControlSource::TiltY => Some((frame.tilt_y + 1.0) / 2.0),
        ControlSource::TiltXY => Some((frame.tilt_xy + 1.0) / 2.0),
        ControlSource::Xaxis => Some(frame.x),
        ControlSource::Yaxis => Some(frame.y),
    }
}

fn apply_mapping(mapping: &ParameterMapping, frame: &TabletFrame) -> f64 {
    let input = control_value(mapping.control, frame).unwrap_or(0.0);
    mapping.map_value(input)
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns every piece of per-connection mutable state that lives on the
/// HID thread: the strum detector, the action dispatcher's
/// progression state, pitch-bend throttling, and the note repeater.
pub struct Pipeline {
    config: Config,
    strum: StrumDetector,
    actions: Actions,
    backend: Box<dyn MidiBackend>,
    bus: Arc<EventBus>,

    prev_stylus_primary: bool,
    prev_stylus_secondary: bool,
    prev_tablet_buttons: [bool; 8],

    last_pitch_bend_value: f64,
    last_pitch_bend_sent: Option<Instant>,

    strum_start: Option<Instant>,
    repeater: RepeaterState,
}

impl Pipeline {
    pub fn new(config: Config, mut backend: Box<dyn MidiBackend>, bus: Arc<EventBus>) -> Self {
        let mut strum = StrumDetector::new();
        strum.configure(
            config.strummer.strumming.pluck_velocity_scale,
            config.strummer.strumming.pressure_threshold,
        );
        strum.set_notes(seed_notes(&config.strummer.strumming));
        backend.set_channel(config.strummer.strumming.midi_channel);

        Self {
            config,
            strum,
            actions: Actions::new(),
            backend,
            bus,
            prev_stylus_primary: false,
            prev_stylus_secondary: false,
            prev_tablet_buttons: [false; 8],
            last_pitch_bend_value: 0.0,
            last_pitch_bend_sent: None,
            strum_start: None,
            repeater: RepeaterState::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Re-derive the strum detector's active notes and thresholds from the
    /// current config. Called by the WebSocket handler after an
    /// `update-config` mutation touches anything note-affecting.
    pub fn reseed_detector(&mut self) {
        let strumming = &self.config.strummer.strumming;
        self.strum.configure(strumming.pluck_velocity_scale, strumming.pressure_threshold);
        self.strum.set_notes(seed_notes(strumming));
    }

    /// Update the backend's default output channel. Called by the WebSocket
    /// handler after an `update-config` mutation touches the MIDI channel.
    pub fn set_midi_channel(&mut self, channel: Option<u8>) {
        self.backend.set_channel(channel);
    }

    pub fn backend(&mut self) -> &mut dyn MidiBackend {
        self.backend.as_mut()
    }

    /// Replace the strum sequence with an externally-supplied chord (the
    /// MIDI input bridge's currently-held notes), expanded by the
    /// configured spread the same way a `set-strum-notes` action would.
    pub fn apply_external_notes(&mut self, notes: Vec<Note>) {
        let strumming = &self.config.strummer.strumming;
        let expanded = fill_note_spread(&notes, strumming.lower_note_spread, strumming.upper_note_spread);
        self.strum.set_notes(expanded);
    }

    /// The strum detector's currently active notes, for the WebSocket
    /// server's initial `config` message.
    pub fn current_notes(&self) -> Vec<Note> {
        self.strum.notes().to_vec()
    }

    /// Run one HID frame through the full pipeline.
    pub fn process_frame(&mut self, frame: TabletFrame) {
        let now = Instant::now();

        self.bus.emit_tablet_event(frame);

        self.dispatch_stylus_buttons(&frame);
        self.dispatch_tablet_buttons(&frame);
        self.update_pitch_bend(&frame, now);

        let note_duration = apply_mapping(&self.config.strummer.note_duration, &frame);
        let channel: Channel = self.config.strummer.strumming.midi_channel;

        let strum_payload = match self.strum.strum(frame.x, frame.pressure) {
            Some(StrumEvent::Strum { notes }) => {
                Some(self.handle_strum(notes, note_duration, channel, now, &frame))
            }
            Some(StrumEvent::Release { velocity }) => {
                Some(self.handle_release(velocity, now, &frame))
            }
            None => None,
        };

        self.run_repeater(note_duration, channel, now);

        if let Some(payload) = strum_payload {
            self.bus.emit_strum_event(payload);
        }
    }

    fn dispatch_stylus_buttons(&mut self, frame: &TabletFrame) {
        let stylus = self.config.strummer.stylus_buttons.clone();
        if stylus.active {
            if frame.primary_button && !self.prev_stylus_primary {
                self.actions.execute(
                    &stylus.primary_button_action,
                    &mut self.config,
                    &mut self.strum,
                    &ActionContext::for_button("Primary"),
                );
            }
            if frame.secondary_button && !self.prev_stylus_secondary {
                self.actions.execute(
                    &stylus.secondary_button_action,
                    &mut self.config,
                    &mut self.strum,
                    &ActionContext::for_button("Secondary"),
                );
            }
        }
        self.prev_stylus_primary = frame.primary_button;
        self.prev_stylus_secondary = frame.secondary_button;
    }

    fn dispatch_tablet_buttons(&mut self, frame: &TabletFrame) {
        let buttons = frame.numbered_buttons();
        for (i, &pressed) in buttons.iter().enumerate() {
            if pressed && !self.prev_tablet_buttons[i] {
                let button_number = (i + 1) as u8;
                let action = self.config.strummer.tablet_buttons.button_action(button_number);
                if !matches!(action, ActionValue::None) {
                    self.actions.execute(
                        &action,
                        &mut self.config,
                        &mut self.strum,
                        &ActionContext::for_button(format!("Tablet{button_number}")),
                    );
                }
            }
        }
        self.prev_tablet_buttons = buttons;
    }

    fn update_pitch_bend(&mut self, frame: &TabletFrame, now: Instant) {
        let value = apply_mapping(&self.config.strummer.pitch_bend, frame);
        let delta = (value - self.last_pitch_bend_value).abs();

        let should_send = match self.last_pitch_bend_sent {
            None => true,
            Some(last) if now.duration_since(last) >= PITCH_BEND_THROTTLE => true,
            Some(last) => {
                now.duration_since(last) >= PITCH_BEND_FAST_PATH && delta > PITCH_BEND_FAST_PATH_DELTA
            }
        };

        if should_send {
            self.backend.send_pitch_bend(value);
            self.last_pitch_bend_value = value;
            self.last_pitch_bend_sent = Some(now);
        }
    }

    /// `vel = clamp(round(map(raw / 127.0)), 1, 127)`.
    fn apply_velocity_curve(&self, raw_velocity: u8) -> u8 {
        let normalized = raw_velocity as f64 / 127.0;
        let mapped = self.config.strummer.note_velocity.map_value(normalized);
        mapped.round().clamp(1.0, 127.0) as u8
    }

    fn maybe_transpose(&self, note: &Note) -> Note {
        let transpose = self.config.strummer.transpose;
        if transpose.active {
            note.transpose(transpose.semitones)
        } else {
            note.clone()
        }
    }

    fn handle_strum(
        &mut self,
        notes: Vec<StrumNote>,
        note_duration: f64,
        channel: Channel,
        now: Instant,
        frame: &TabletFrame,
    ) -> StrumPayload {
        if self.strum_start.is_none() {
            self.strum_start = Some(now);
        }

        let mut payload_notes = Vec::with_capacity(notes.len());
        for strum_note in &notes {
            let velocity = self.apply_velocity_curve(strum_note.velocity);
            if velocity == 0 {
                continue;
            }
            let note_to_play = self.maybe_transpose(&strum_note.note);
            self.backend.send_note(&note_to_play, velocity, note_duration, channel);
            payload_notes.push(StrumPayloadNote::from_note(&strum_note.note, velocity, note_duration));
        }

        self.repeater.notes = notes;
        self.repeater.holding = true;
        self.repeater.last_repeat = Some(now);

        StrumPayload {
            kind: StrumPayloadType::Strum,
            velocity: payload_notes.first().map(|n| n.velocity).unwrap_or(0),
            notes: payload_notes,
            x: frame.x,
            pressure: frame.pressure,
            timestamp: timestamp_millis(),
        }
    }

    fn handle_release(&mut self, velocity: u8, now: Instant, frame: &TabletFrame) -> StrumPayload {
        let strum_release = self.config.strummer.strum_release;
        if strum_release.active {
            if let Some(start) = self.strum_start {
                let duration = now.duration_since(start).as_secs_f64();
                if duration <= strum_release.max_duration {
                    let release_velocity = ((velocity as f64) * strum_release.velocity_multiplier)
                        .round()
                        .clamp(1.0, 127.0) as u8;
                    let release_channel = strum_release
                        .midi_channel
                        .or(Some(STRUM_RELEASE_DEFAULT_CHANNEL));
                    self.backend
                        .send_raw_note(strum_release.midi_note, release_velocity, duration, release_channel);
                }
            }
        }

        self.strum_start = None;
        self.repeater.holding = false;
        self.repeater.notes.clear();

        StrumPayload {
            kind: StrumPayloadType::Release,
            notes: Vec::new(),
            velocity,
            x: frame.x,
            pressure: frame.pressure,
            timestamp: timestamp_millis(),
        }
    }

    fn run_repeater(&mut self, note_duration: f64, channel: Channel, now: Instant) {
        let repeater_cfg = self.config.strummer.note_repeater;
        if !repeater_cfg.active || !self.repeater.holding || self.repeater.notes.is_empty() {
            return;
        }

        let frequency_multiplier = if repeater_cfg.frequency_multiplier > 0.0 {
            repeater_cfg.frequency_multiplier
        } else {
            1.0
        };
        let interval = Duration::from_secs_f64((note_duration / frequency_multiplier).max(0.0));

        let Some(last_repeat) = self.repeater.last_repeat else {
            self.repeater.last_repeat = Some(now);
            return;
        };
        if now.duration_since(last_repeat) < interval {
            return;
        }

        let notes = self.repeater.notes.clone();
        for strum_note in notes {
            let scaled = (strum_note.velocity as f64 * repeater_cfg.pressure_multiplier)
                .round()
                .clamp(1.0, 127.0) as u8;
            let velocity = self.apply_velocity_curve(scaled);
            if velocity == 0 {
                continue;
            }
            let note_to_play = self.maybe_transpose(&strum_note.note);
            self.backend.send_note(&note_to_play, velocity, note_duration, channel);
        }
        self.repeater.last_repeat = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordedCalls {
        notes: Vec<(i32, u8, f64, Channel)>,
        raw_notes: Vec<(u8, u8, f64, Channel)>,
        pitch_bends: Vec<f64>,
    }

    struct TestBackend {
        calls: Arc<Mutex<RecordedCalls>>,
    }

    impl MidiBackend for TestBackend {
        fn is_connected(&self) -> bool {
            true
        }
        fn connect(&mut self, _output_port: Option<&str>) -> bool {
            true
        }
        fn disconnect(&mut self) {}
        fn set_channel(&mut self, _channel: Channel) {}
        fn send_note_on(&mut self, _note: &Note, _velocity: u8, _channel: Channel) {}
        fn send_note_off(&mut self, _note: &Note, _channel: Channel) {}
        fn send_note(&mut self, note: &Note, velocity: u8, duration_secs: f64, channel: Channel) {
            self.calls.lock().unwrap().notes.push((note.to_midi(), velocity, duration_secs, channel));
        }
        fn send_raw_note(&mut self, midi_note: u8, velocity: u8, duration_secs: f64, channel: Channel) {
            self.calls
                .lock()
                .unwrap()
                .raw_notes
                .push((midi_note, velocity, duration_secs, channel));
        }
        fn release_notes(&mut self, _notes: &[Note]) {}
        fn send_pitch_bend(&mut self, value: f64) {
            self.calls.lock().unwrap().pitch_bends.push(value);
        }
        fn get_available_ports(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn frame(x: f64, pressure: f64) -> TabletFrame {
        TabletFrame {
            x,
            pressure,
            ..TabletFrame::default()
        }
    }

    fn pipeline_with(config: Config) -> (Pipeline, Arc<Mutex<RecordedCalls>>, Arc<EventBus>) {
        let calls = Arc::new(Mutex::new(RecordedCalls::default()));
        let backend = Box::new(TestBackend { calls: calls.clone() });
        let bus = Arc::new(EventBus::new());
        bus.add_subscriber();
        (Pipeline::new(config, backend, bus.clone()), calls, bus)
    }

    #[test]
    fn strum_sends_note_and_emits_payload() {
        let (mut pipeline, calls, bus) = pipeline_with(Config::default());

        pipeline.process_frame(frame(0.5, 0.0));
        pipeline.process_frame(frame(0.5, 0.3));
        pipeline.process_frame(frame(0.5, 0.6));
        pipeline.process_frame(frame(0.5, 0.8));

        assert!(!calls.lock().unwrap().notes.is_empty());
        let flushed = bus.flush().unwrap();
        assert!(matches!(flushed.strum.unwrap().kind, StrumPayloadType::Strum));
    }

    #[test]
    fn release_within_window_triggers_strum_release_note() {
        let mut config = Config::default();
        config.strummer.strum_release.active = true;
        config.strummer.strum_release.max_duration = 5.0;
        let (mut pipeline, calls, _bus) = pipeline_with(config);

        pipeline.process_frame(frame(0.5, 0.0));
        pipeline.process_frame(frame(0.5, 0.3));
        pipeline.process_frame(frame(0.5, 0.6));
        pipeline.process_frame(frame(0.5, 0.8));
        pipeline.process_frame(frame(0.5, 0.0));

        let raw = calls.lock().unwrap().raw_notes.clone();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].0, 38);
        assert_eq!(raw[0].3, Some(9));
    }

    #[test]
    fn stylus_primary_button_executes_action() {
        let mut config = Config::default();
        config.strummer.stylus_buttons.active = true;
        config.strummer.stylus_buttons.primary_button_action =
            ActionValue::Name("toggle-repeater".to_string());
        let (mut pipeline, _calls, _bus) = pipeline_with(config);

        let mut f = frame(0.5, 0.0);
        f.primary_button = true;
        pipeline.process_frame(f);

        assert!(pipeline.config().strummer.note_repeater.active);

        // Holding the button does not re-trigger (edge-detected, not level).
        pipeline.process_frame(f);
        assert!(pipeline.config().strummer.note_repeater.active);
    }

    #[test]
    fn tablet_button_progression_mode_sets_chord() {
        let (mut pipeline, _calls, _bus) = pipeline_with(Config::default());

        let mut f = frame(0.5, 0.0);
        f.button2 = true;
        pipeline.process_frame(f);

        assert!(pipeline.strum.notes().iter().any(|n| n.notation == "G"));
    }

    #[test]
    fn pitch_bend_throttles_rapid_frames() {
        let (mut pipeline, calls, _bus) = pipeline_with(Config::default());

        let mut f = frame(0.5, 0.0);
        f.y = 0.9;
        pipeline.process_frame(f);
        pipeline.process_frame(f);

        assert_eq!(calls.lock().unwrap().pitch_bends.len(), 1);
    }

    #[test]
    fn note_repeater_reemits_while_holding() {
        let mut config = Config::default();
        config.strummer.note_repeater.active = true;
        config.strummer.note_repeater.frequency_multiplier = 1000.0;
        let (mut pipeline, calls, _bus) = pipeline_with(config);

        pipeline.process_frame(frame(0.5, 0.0));
        pipeline.process_frame(frame(0.5, 0.3));
        pipeline.process_frame(frame(0.5, 0.6));
        pipeline.process_frame(frame(0.5, 0.8));
        let after_strum = calls.lock().unwrap().notes.len();

        std::thread::sleep(Duration::from_millis(5));
        pipeline.process_frame(frame(0.5, 0.8));
        let after_repeat = calls.lock().unwrap().notes.len();

        assert!(after_repeat > after_strum);
    }

    #[test]
    fn current_notes_reflects_seeded_config() {
        let (pipeline, _calls, _bus) = pipeline_with(Config::default());
        let notes = pipeline.current_notes();
        assert!(notes.iter().any(|n| n.notation == "C" && n.octave == 4));
    }
}
