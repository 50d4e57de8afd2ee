// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use tokio::sync::broadcast;

use crate::alarm::{AlarmState, ZoneStatus};

/// Notifications delivered to the host as the driver observes the panel.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// The overall alarm state changed.
    AlarmStateChanged { state: AlarmState },
    /// A zone changed status.
    ZoneStateChanged { zone: u16, status: ZoneStatus },
    /// The alarm fired; `zone` is the first zone observed tripping.
    AlarmTriggered { zone: u16 },
    /// The wired ready output changed (true = all zones clear, ready to arm).
    ReadyChanged { ready: bool },
    /// Free-text notification worth forwarding to a person.
    Message { text: String },
}

/// Capability invoked synchronously from the poll loop for every event.
///
/// Handlers must return quickly; the serial link is not serviced while
/// one runs.
pub trait EventSink {
    fn handle(&mut self, event: PanelEvent);
}

/// Collecting sink, mainly useful in tests and batch processing.
impl EventSink for Vec<PanelEvent> {
    fn handle(&mut self, event: PanelEvent) {
        self.push(event);
    }
}

/// Fan-out to subscribers; send errors (no live receivers) are ignored.
impl EventSink for EventSender {
    fn handle(&mut self, event: PanelEvent) {
        let _ = self.send(event);
    }
}

/// Type alias for the broadcast sender.
pub type EventSender = broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = broadcast::Receiver<PanelEvent>;

/// Create a broadcast channel sized for `capacity` in-flight events.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
