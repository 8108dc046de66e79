// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! HID frame ingestion seam.
//!
//! Decoding device-specific tablet packets into [`TabletFrame`]s is
//! handled by an external tablet driver — the core pipeline only ever
//! consumes already-normalized frames. This module is the one place that
//! boundary is drawn: a bounded channel a real tablet driver would feed,
//! paired with the status transitions the WebSocket
//! `status`/`midi-input-status` messages report.
//!
//! No concrete HID backend lives here; `FrameSource::channel` is the whole
//! contract.

use crossbeam_channel::{Receiver, Sender};
use sketchatone_core::events::TabletFrame;

/// The producing half of the seam. Whatever decodes real HID reports (or,
/// in tests, a scripted sequence) pushes normalized frames here.
#[derive(Clone)]
pub struct FrameSender(Sender<TabletFrame>);

impl FrameSender {
    /// Non-blocking; a full channel drops the frame rather than stalling
    /// whatever thread is decoding HID packets — frame processing must
    /// never stall the pipeline, and the same policy applies to a full
    /// queue upstream of it.
    pub fn push(&self, frame: TabletFrame) {
        if self.0.try_send(frame).is_err() {
            tracing::warn!("frame source queue full, dropping frame");
        }
    }
}

/// The consuming half, read by the orchestrator's frame loop.
pub struct FrameSource(Receiver<TabletFrame>);

impl FrameSource {
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<TabletFrame> {
        self.0.recv_timeout(timeout).ok()
    }

    /// The raw receiver, for a `crossbeam_channel::select!` loop that also
    /// waits on a command channel (the engine thread).
    pub fn receiver(&self) -> &Receiver<TabletFrame> {
        &self.0
    }
}

/// Bounded at a few frames' worth of backlog: this is a live control
/// surface, not a data pipe that should ever need to buffer deeply.
const CHANNEL_CAPACITY: usize = 16;

pub fn frame_channel() -> (FrameSender, FrameSource) {
    let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
    (FrameSender(tx), FrameSource(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_frame_is_received() {
        let (tx, rx) = frame_channel();
        tx.push(TabletFrame { x: 0.25, ..TabletFrame::default() });
        let frame = rx.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        assert_eq!(frame.x, 0.25);
    }

    #[test]
    fn empty_channel_times_out() {
        let (_tx, rx) = frame_channel();
        assert!(rx.recv_timeout(std::time::Duration::from_millis(10)).is_none());
    }

    #[test]
    fn full_channel_drops_rather_than_blocks() {
        let (tx, _rx) = frame_channel();
        for _ in 0..(CHANNEL_CAPACITY + 4) {
            tx.push(TabletFrame::default());
        }
    }
}
