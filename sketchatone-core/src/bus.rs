// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Event bus: a latest-wins coalescing buffer between producer threads
//! (HID reader, MIDI input) and the async WebSocket flusher.

use std::sync::Mutex;

use crate::events::{CombinedEvent, StrumPayload, TabletFrame};

const DEFAULT_THROTTLE_MS: u64 = 150;

struct BusState {
    buffer: CombinedEvent,
    has_new_data: bool,
    subscriber_count: usize,
    paused: bool,
}

/// Shared between producer threads and the async flusher. Producers call
/// [`EventBus::emit_tablet_event`]/[`EventBus::emit_strum_event`] under a
/// short-held mutex; the flusher calls [`EventBus::flush`] on its own
/// schedule (see the server's periodic task).
pub struct EventBus {
    state: Mutex<BusState>,
    throttle_ms: std::sync::atomic::AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                buffer: CombinedEvent::default(),
                has_new_data: false,
                subscriber_count: 0,
                paused: true,
            }),
            throttle_ms: std::sync::atomic::AtomicU64::new(DEFAULT_THROTTLE_MS),
        }
    }

    pub fn throttle_ms(&self) -> u64 {
        self.throttle_ms.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Takes effect on the next flush cycle; never drops pending data.
    pub fn set_throttle_ms(&self, ms: u64) {
        self.throttle_ms.store(ms, std::sync::atomic::Ordering::Relaxed);
    }

    /// Overwrites the tablet slot; the latest frame always wins.
    pub fn emit_tablet_event(&self, frame: TabletFrame) {
        let mut state = self.state.lock().unwrap();
        state.buffer.tablet = Some(frame);
        state.has_new_data = true;
    }

    /// Overwrites the strum slot. Strums emitted between flushes collapse —
    /// only the most recent is delivered; unbounded queuing is not worth
    /// the complexity at human-playable strum rates.
    pub fn emit_strum_event(&self, payload: StrumPayload) {
        let mut state = self.state.lock().unwrap();
        state.buffer.strum = Some(payload);
        state.has_new_data = true;
    }

    /// Pause when the subscriber count reaches zero; resume on first
    /// connect, driven entirely by [`EventBus::add_subscriber`]/
    /// [`EventBus::remove_subscriber`].
    pub fn add_subscriber(&self) {
        let mut state = self.state.lock().unwrap();
        state.subscriber_count += 1;
        state.paused = false;
    }

    pub fn remove_subscriber(&self) {
        let mut state = self.state.lock().unwrap();
        state.subscriber_count = state.subscriber_count.saturating_sub(1);
        if state.subscriber_count == 0 {
            state.paused = true;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    /// No-op if paused or there's nothing new. Otherwise returns a copy of
    /// the buffer, clears the strum slot (it was a one-shot event), and
    /// clears the dirty flag. The tablet slot survives so late subscribers
    /// see the last known pose.
    pub fn flush(&self) -> Option<CombinedEvent> {
        let mut state = self.state.lock().unwrap();
        if state.paused || !state.has_new_data {
            return None;
        }
        let snapshot = state.buffer.clone();
        state.buffer.strum = None;
        state.has_new_data = false;
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_is_noop_while_paused() {
        let bus = EventBus::new();
        bus.emit_tablet_event(TabletFrame::default());
        assert!(bus.flush().is_none());
    }

    #[test]
    fn flush_is_noop_with_no_new_data() {
        let bus = EventBus::new();
        bus.add_subscriber();
        assert!(bus.flush().is_none());
    }

    #[test]
    fn strum_slot_clears_but_tablet_persists() {
        let bus = EventBus::new();
        bus.add_subscriber();
        bus.emit_tablet_event(TabletFrame::default());
        bus.emit_strum_event(StrumPayload {
            kind: crate::events::StrumPayloadType::Strum,
            notes: vec![],
            velocity: 100,
            x: 0.5,
            pressure: 0.5,
            timestamp: 0,
        });

        let first = bus.flush().unwrap();
        assert!(first.tablet.is_some());
        assert!(first.strum.is_some());

        bus.emit_tablet_event(TabletFrame::default());
        let second = bus.flush().unwrap();
        assert!(second.tablet.is_some());
        assert!(second.strum.is_none());
    }

    #[test]
    fn pause_and_resume_track_subscriber_count() {
        let bus = EventBus::new();
        assert!(bus.is_paused());
        bus.add_subscriber();
        assert!(!bus.is_paused());
        bus.add_subscriber();
        bus.remove_subscriber();
        assert!(!bus.is_paused());
        bus.remove_subscriber();
        assert!(bus.is_paused());
    }

    #[test]
    fn set_throttle_takes_effect_without_dropping_data() {
        let bus = EventBus::new();
        bus.add_subscriber();
        bus.emit_tablet_event(TabletFrame::default());
        bus.set_throttle_ms(50);
        assert_eq!(bus.throttle_ms(), 50);
        assert!(bus.flush().is_some());
    }
}
