// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::event::{EventSink, PanelEvent};
use crate::protocol::Command;
use crate::scheduler::CommandScheduler;

/// Overall alarm state as reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Disarmed,
    /// Part armed (night/home set).
    ArmedHome,
    /// Full armed.
    ArmedAway,
    /// Entry or exit timer running; will trigger unless disarmed.
    Pending,
    /// Arm sequence accepted by the panel, exit timer counting down.
    Arming,
    Triggered,
    /// Armed, but the panel has not yet said in which mode.
    Armed,
    Unknown,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Disarmed => "DISARMED",
            AlarmState::ArmedHome => "ARMED_HOME",
            AlarmState::ArmedAway => "ARMED_AWAY",
            AlarmState::Pending => "PENDING",
            AlarmState::Arming => "ARMING",
            AlarmState::Triggered => "TRIGGERED",
            AlarmState::Armed => "ARMED",
            AlarmState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single zone, decoded from the trailing digit of a zone update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStatus {
    Secure,
    Active,
    Tamper,
    /// Digit outside the documented range, passed through untouched.
    Other(u8),
}

impl ZoneStatus {
    pub fn from_digit(digit: u8) -> Self {
        match digit {
            0 => ZoneStatus::Secure,
            1 => ZoneStatus::Active,
            2 => ZoneStatus::Tamper,
            other => ZoneStatus::Other(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneStatus::Secure => "SECURE",
            ZoneStatus::Active => "ACTIVE",
            ZoneStatus::Tamper => "TAMPER",
            ZoneStatus::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the panel-wide alarm state and the zone that first tripped it.
///
/// State changes arrive from two directions: the wired status outputs
/// (ground truth) and zone update messages on the serial link. The first
/// zone seen while the state is Pending or Triggered is remembered as the
/// triggered zone until the system disarms.
#[derive(Debug)]
pub struct AlarmTracker {
    state: AlarmState,
    triggered_zone: Option<u16>,
    last_change: Option<Instant>,
}

impl AlarmTracker {
    pub fn new() -> Self {
        AlarmTracker {
            state: AlarmState::Unknown,
            triggered_zone: None,
            last_change: None,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn triggered_zone(&self) -> Option<u16> {
        self.triggered_zone
    }

    /// True if the current state was entered longer than `window` ago.
    pub(crate) fn unchanged_for(&self, window: Duration, now: Instant) -> bool {
        self.last_change.is_some_and(|at| now > at + window)
    }

    /// Restart the stale-state clock without changing state.
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_change = Some(now);
    }

    /// Apply a new alarm state, publishing events for every accepted change.
    pub(crate) fn update_state<E: EventSink>(
        &mut self,
        state: AlarmState,
        now: Instant,
        scheduler: &mut CommandScheduler,
        events: &mut E,
    ) {
        if self.state == state {
            return;
        }
        // A generic "armed" report while the mode is already known adds nothing.
        if state == AlarmState::Armed
            && matches!(self.state, AlarmState::ArmedHome | AlarmState::ArmedAway)
        {
            return;
        }
        if state == AlarmState::Armed {
            // The panel knows the mode; ask the screen which one it is.
            scheduler.delay(Command::ScreenState, Duration::from_millis(1000), now);
        }
        if state == AlarmState::Disarmed {
            self.triggered_zone = None;
        }
        if state == AlarmState::Triggered {
            if let Some(zone) = self.triggered_zone {
                events.handle(PanelEvent::AlarmTriggered { zone });
            }
        }
        info!("Alarm state changed: {} -> {}", self.state, state);
        self.last_change = Some(now);
        self.state = state;
        events.handle(PanelEvent::AlarmStateChanged { state });
    }

    /// Apply a zone update message, latching the triggered zone if relevant.
    pub(crate) fn update_zone<E: EventSink>(&mut self, zone: u16, digit: u8, events: &mut E) {
        if matches!(self.state, AlarmState::Pending | AlarmState::Triggered)
            && self.triggered_zone.is_none()
        {
            self.triggered_zone = Some(zone);
            if self.state == AlarmState::Triggered {
                events.handle(PanelEvent::AlarmTriggered { zone });
            }
        }
        let status = ZoneStatus::from_digit(digit);
        debug!("Zone {} status: {}", zone, status);
        events.handle(PanelEvent::ZoneStateChanged { zone, status });
    }
}

impl Default for AlarmTracker {
    fn default() -> Self {
        Self::new()
    }
}
