// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::time::{Duration, Instant};

use tracing::info;

use crate::scheduler::Deadline;

/// Inactivity window before an automatic logout.
const SIMPLE_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Resend cadence for the login frame.
const LOGIN_RESEND_INTERVAL: Duration = Duration::from_millis(500);

/// Which protocol currently owns the com port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveProtocol {
    /// Keypad emulation; the default.
    Crestron,
    /// Simple protocol, entered after a successful login.
    Simple,
}

/// Simple protocol session activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleTask {
    Idle,
    LoggingIn,
    LoggingOut,
}

/// Login/logout state machine for the Simple protocol. Runs independently
/// of the keypad task sequencer; only the com port is shared.
#[derive(Debug)]
pub(crate) struct SimpleSession {
    task: SimpleTask,
    active: ActiveProtocol,
    last_sent: Option<Instant>,
    inactivity: Deadline,
}

impl SimpleSession {
    pub fn new() -> Self {
        SimpleSession {
            task: SimpleTask::Idle,
            active: ActiveProtocol::Crestron,
            last_sent: None,
            inactivity: Deadline::default(),
        }
    }

    pub fn task(&self) -> SimpleTask {
        self.task
    }

    pub fn active(&self) -> ActiveProtocol {
        self.active
    }

    /// Start logging in; the login frame goes out on the next poll.
    pub fn begin_login(&mut self) {
        self.task = SimpleTask::LoggingIn;
        self.last_sent = None;
    }

    /// Start logging out. The caller sends the logout frame itself; it is
    /// not repeated.
    pub fn begin_logout(&mut self) {
        self.task = SimpleTask::LoggingOut;
    }

    /// True when the login frame should go out, first send or repeat.
    pub fn login_frame_due(&self, now: Instant) -> bool {
        self.task == SimpleTask::LoggingIn
            && self
                .last_sent
                .map_or(true, |at| now > at + LOGIN_RESEND_INTERVAL)
    }

    pub fn note_login_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Apply an `OK` reply. Always refreshes the inactivity deadline, even
    /// for acknowledgements of unrelated Simple commands.
    pub fn handle_ok(&mut self, now: Instant) {
        self.inactivity.set(now + SIMPLE_PROTOCOL_TIMEOUT);
        match self.task {
            SimpleTask::LoggingIn => {
                info!("Simple protocol login confirmed");
                self.task = SimpleTask::Idle;
                self.active = ActiveProtocol::Simple;
            }
            SimpleTask::LoggingOut => {
                info!("Simple protocol logout confirmed");
                self.task = SimpleTask::Idle;
                self.active = ActiveProtocol::Crestron;
            }
            SimpleTask::Idle => {}
        }
    }

    /// Apply an `ERROR` reply; a failing login is abandoned.
    pub fn handle_error(&mut self) {
        if self.task == SimpleTask::LoggingIn {
            info!("Simple protocol login rejected");
            self.task = SimpleTask::Idle;
        }
    }

    /// True once the inactivity deadline has passed with the Simple
    /// protocol still holding the port and nothing else in flight.
    pub fn auto_logout_due(&self, now: Instant) -> bool {
        self.task == SimpleTask::Idle
            && self.active == ActiveProtocol::Simple
            && self.inactivity.due(now)
    }

    /// The automatic logout frame has been sent.
    pub fn note_auto_logout(&mut self) {
        self.task = SimpleTask::LoggingOut;
    }
}
