// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::time::{Duration, Instant};

/// Largest message the panel is expected to produce.
pub const MAX_MESSAGE_SIZE: usize = 100;

/// How long a partial message may sit in the buffer before being flushed
/// as incomplete.
const MESSAGE_STALE_AFTER: Duration = Duration::from_millis(100);

/// How a message left the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Terminated by CR or LF, the normal case.
    Line,
    /// A new `"` message started before this one was terminated.
    Preempted,
    /// The buffer hit [`MAX_MESSAGE_SIZE`].
    Overflow,
    /// No terminator arrived within the staleness window.
    Stale,
}

impl FrameKind {
    /// Whether the message should be treated as complete by the classifier.
    pub fn is_complete(self) -> bool {
        !matches!(self, FrameKind::Stale)
    }
}

/// A framed message from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub kind: FrameKind,
}

impl Frame {
    pub fn is_complete(&self) -> bool {
        self.kind.is_complete()
    }
}

/// Splits the raw serial byte stream into messages.
///
/// The panel terminates messages with CR/LF, but partial lines are common:
/// the keypad channel interleaves with whatever else the com port carries,
/// and screen dumps can arrive headless. Three recovery rules apply on top
/// of plain line splitting: a `"` byte mid-message starts a fresh message,
/// a buffer at capacity is flushed as-is, and a partial message older than
/// 100 ms is flushed as incomplete.
#[derive(Debug, Default)]
pub struct LinkFramer {
    buffer: Vec<u8>,
    started: Option<Instant>,
}

impl LinkFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a frame when a boundary rule fires.
    pub fn push(&mut self, byte: u8, now: Instant) -> Option<Frame> {
        if byte == b'"' && !self.buffer.is_empty() {
            let data = std::mem::take(&mut self.buffer);
            self.buffer.push(byte);
            self.started = Some(now);
            return Some(Frame {
                data,
                kind: FrameKind::Preempted,
            });
        }
        if byte == b'\r' || byte == b'\n' {
            if self.buffer.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.buffer);
            self.started = None;
            return Some(Frame {
                data,
                kind: FrameKind::Line,
            });
        }
        if self.buffer.is_empty() {
            self.started = Some(now);
        }
        self.buffer.push(byte);
        if self.buffer.len() >= MAX_MESSAGE_SIZE {
            let data = std::mem::take(&mut self.buffer);
            self.started = None;
            return Some(Frame {
                data,
                kind: FrameKind::Overflow,
            });
        }
        None
    }

    /// Flush a partial message that has outlived the staleness window.
    /// Called once per poll cycle after the input has been drained.
    pub fn poll_stale(&mut self, now: Instant) -> Option<Frame> {
        let started = self.started?;
        if now.duration_since(started) > MESSAGE_STALE_AFTER {
            let data = std::mem::take(&mut self.buffer);
            self.started = None;
            return Some(Frame {
                data,
                kind: FrameKind::Stale,
            });
        }
        None
    }

    /// True while a partial message is sitting in the buffer.
    pub fn is_buffering(&self) -> bool {
        !self.buffer.is_empty()
    }
}
