// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! MIDI output backend: a common contract over the two concrete
//! backends (rtmidi in [`rtmidi_backend`], JACK behind the `jack-backend`
//! feature in [`jack_backend`]), plus the note-off scheduling they share.

pub mod rtmidi_backend;

#[cfg(feature = "jack-backend")]
pub mod jack_backend;

pub use rtmidi_backend::RtMidiBackend;

#[cfg(feature = "jack-backend")]
pub use jack_backend::JackBackend;

use crate::error::MidiError;
use crate::note::Note;

/// 0-based MIDI channel, or `None` for omni (send on every channel).
pub type Channel = Option<u8>;

/// Contract every MIDI output backend satisfies. Connection failures
/// return `false`/no-op rather than propagating — a disconnected backend is
/// a degraded-but-running state, not a fatal error.
pub trait MidiBackend: Send {
    fn is_connected(&self) -> bool;

    /// Bind to an output port. `output_port` may be a numeric index, a
    /// substring of a port name, or `None` for the first available port.
    fn connect(&mut self, output_port: Option<&str>) -> bool;

    /// Cancel every pending note-off, broadcast all-notes-off/reset-all-
    /// controllers/pitch-bend-center on every channel, then close the port.
    fn disconnect(&mut self);

    fn set_channel(&mut self, channel: Channel);

    fn send_note_on(&mut self, note: &Note, velocity: u8, channel: Channel);
    fn send_note_off(&mut self, note: &Note, channel: Channel);

    /// Send note-on immediately and schedule a matching note-off after
    /// `duration_secs`. Re-sending for the same `(note, channel)` cancels
    /// the previously scheduled note-off rather than racing it.
    fn send_note(&mut self, note: &Note, velocity: u8, duration_secs: f64, channel: Channel);

    /// Same as [`send_note`](MidiBackend::send_note) but takes a raw MIDI
    /// note number instead of a parsed [`Note`].
    fn send_raw_note(&mut self, midi_note: u8, velocity: u8, duration_secs: f64, channel: Channel);

    /// Cancel pending note-offs for `notes` and emit note-offs immediately.
    fn release_notes(&mut self, notes: &[Note]);

    /// `value` in `[-1.0, 1.0]`; quantized to 14-bit and sent on every
    /// active channel.
    fn send_pitch_bend(&mut self, value: f64);

    fn get_available_ports(&self) -> Vec<String>;
}

/// Quantize a pitch-bend value in `[-1.0, 1.0]` to the 14-bit MIDI range,
/// returning `(lsb, msb)`.
pub fn quantize_pitch_bend(value: f64) -> (u8, u8) {
    let clamped = value.clamp(-1.0, 1.0);
    let midi_bend = ((clamped + 1.0) * 8192.0).round().clamp(0.0, 16383.0) as u16;
    let lsb = (midi_bend & 0x7F) as u8;
    let msb = ((midi_bend >> 7) & 0x7F) as u8;
    (lsb, msb)
}

/// Resolve a port identifier (numeric index, exact name, or substring
/// match) against the list of available port names. Falls back to index 0
/// and logs when nothing matches.
pub fn resolve_port(port_id: &str, available: &[String]) -> usize {
    if let Ok(index) = port_id.parse::<usize>() {
        if index < available.len() {
            return index;
        }
    }
    for (idx, name) in available.iter().enumerate() {
        if port_id == name || name.contains(port_id) {
            return idx;
        }
    }
    tracing::warn!(port = port_id, "MIDI port not found, using port 0");
    0
}

/// Construct the configured backend, honoring the `jack-backend` feature
/// and carrying the JACK-specific client name / auto-connect policy from
/// config through to the backend's builder methods.
pub fn build_backend(
    midi: &crate::config::MidiConfig,
    scheduler: crate::scheduler::Scheduler,
) -> Result<Box<dyn MidiBackend>, MidiError> {
    match midi.midi_output_backend {
        crate::config::MidiOutputBackend::Rtmidi => {
            Ok(Box::new(RtMidiBackend::new(scheduler)))
        }
        crate::config::MidiOutputBackend::Jack => {
            #[cfg(feature = "jack-backend")]
            {
                let backend = JackBackend::new(scheduler)?
                    .with_client_name(midi.jack_client_name.clone())
                    .with_auto_connect(midi.jack_auto_connect);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "jack-backend"))]
            {
                Err(MidiError::Init(
                    "JACK backend requested but crate was built without the `jack-backend` feature".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_bend_quantizes_to_14_bit_range() {
        assert_eq!(quantize_pitch_bend(-1.0), (0, 0));
        assert_eq!(quantize_pitch_bend(0.0), (0, 64));
        assert_eq!(quantize_pitch_bend(1.0), (127, 127));
    }

    #[test]
    fn resolve_port_matches_substring() {
        let ports = vec!["IAC Driver Bus 1".to_string(), "Sketchatone".to_string()];
        assert_eq!(resolve_port("Sketch", &ports), 1);
        assert_eq!(resolve_port("1", &ports), 1);
        assert_eq!(resolve_port("nonexistent", &ports), 0);
    }
}
