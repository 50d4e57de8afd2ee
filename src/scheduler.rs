// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::time::{Duration, Instant};

use crate::protocol::Command;

/// How long to wait for a reply before retrying a screen request.
pub(crate) const COMMAND_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Retry budget shared by the stalled-command and incomplete-message paths.
pub(crate) const MAX_RETRIES: u8 = 3;

/// Absolute deadline with a strict "due" comparison. Unset never fires.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub fn set(&mut self, at: Instant) {
        self.0 = Some(at);
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn due(&self, now: Instant) -> bool {
        self.0.is_some_and(|at| now > at)
    }
}

/// Single delayed-command slot plus retry bookkeeping for the active task.
///
/// The slot holds at most one command; scheduling another replaces it.
#[derive(Debug, Default)]
pub(crate) struct CommandScheduler {
    delayed: Option<Command>,
    delayed_at: Deadline,
    last_command: Option<Instant>,
    stall_attempts: u8,
    incomplete_retries: u8,
}

impl CommandScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `command` to go out `after` from `now`.
    pub fn delay(&mut self, command: Command, after: Duration, now: Instant) {
        self.delayed = Some(command);
        self.delayed_at.set(now + after);
    }

    pub fn delayed_pending(&self) -> bool {
        self.delayed.is_some()
    }

    /// Take the delayed command once its due time has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<Command> {
        if self.delayed.is_some() && self.delayed_at.due(now) {
            self.delayed_at.clear();
            return self.delayed.take();
        }
        None
    }

    pub fn clear_delayed(&mut self) {
        self.delayed = None;
        self.delayed_at.clear();
    }

    /// Stamp the time a command went out, for the stall check.
    pub fn note_command_sent(&mut self, now: Instant) {
        self.last_command = Some(now);
    }

    pub fn clear_last_command(&mut self) {
        self.last_command = None;
    }

    /// True when the last command has gone unanswered beyond the wait
    /// timeout and the retry budget is not yet spent.
    pub fn stall_due(&self, now: Instant) -> bool {
        self.stall_attempts < MAX_RETRIES
            && self
                .last_command
                .is_some_and(|at| now > at + COMMAND_WAIT_TIMEOUT)
    }

    pub fn note_stall_attempt(&mut self) {
        self.stall_attempts = self.stall_attempts.saturating_add(1);
    }

    pub fn reset_attempts(&mut self) {
        self.stall_attempts = 0;
    }

    /// Consume one incomplete-message retry; false once the budget is spent.
    pub fn next_incomplete_retry(&mut self) -> bool {
        let used = self.incomplete_retries;
        self.incomplete_retries = used.saturating_add(1);
        used < MAX_RETRIES
    }

    /// A terminated line arrived; the link is healthy again.
    pub fn reset_incomplete_retries(&mut self) {
        self.incomplete_retries = 0;
    }
}
