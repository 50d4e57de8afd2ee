// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use bitflags::bitflags;

bitflags! {
    /// Asserted wired status outputs from the panel.
    ///
    /// The outputs are electrically active-low; a set bit here means the
    /// output is asserted (pulled low). Bit order matches the scan order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusSignals: u8 {
        const FULL_ARMED    = 0b0000_0001;
        const PART_ARMED    = 0b0000_0010;
        const ENTRY         = 0b0000_0100;
        const EXITING       = 0b0000_1000;
        const TRIGGERED     = 0b0001_0000;
        const AREA_READY    = 0b0010_0000;
        const FAULT_PRESENT = 0b0100_0000;
        const ARM_FAILED    = 0b1000_0000;
    }
}

/// Capability that reads the panel's wired status outputs.
///
/// Implementations return the currently asserted set; the driver computes
/// edges itself. Reads happen once per poll cycle and must not block.
pub trait SignalSource {
    fn read(&mut self) -> StatusSignals;
}

/// Source for installs without wired status outputs.
#[derive(Debug, Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn read(&mut self) -> StatusSignals {
        StatusSignals::empty()
    }
}

/// Edge detector over successive signal scans.
///
/// Starts from the empty set, so outputs already asserted at startup are
/// reported as edges on the first scan.
#[derive(Debug, Default)]
pub(crate) struct SignalWatcher {
    last: StatusSignals,
}

impl SignalWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scan, returning the signals that changed since the last one.
    pub fn scan(&mut self, levels: StatusSignals) -> StatusSignals {
        let changed = self.last ^ levels;
        self.last = levels;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_startup_has_no_edges() {
        let mut watcher = SignalWatcher::new();
        assert!(watcher.scan(StatusSignals::empty()).is_empty());
        assert!(watcher.scan(StatusSignals::empty()).is_empty());
    }

    #[test]
    fn test_asserted_at_startup_is_an_edge() {
        let mut watcher = SignalWatcher::new();
        let changed = watcher.scan(StatusSignals::FULL_ARMED);
        assert_eq!(changed, StatusSignals::FULL_ARMED);
        // Steady state afterwards.
        assert!(watcher.scan(StatusSignals::FULL_ARMED).is_empty());
    }

    #[test]
    fn test_deassert_is_an_edge_too() {
        let mut watcher = SignalWatcher::new();
        watcher.scan(StatusSignals::TRIGGERED);
        let changed = watcher.scan(StatusSignals::empty());
        assert_eq!(changed, StatusSignals::TRIGGERED);
    }

    #[test]
    fn test_simultaneous_edges() {
        let mut watcher = SignalWatcher::new();
        watcher.scan(StatusSignals::AREA_READY);
        let changed = watcher.scan(StatusSignals::ENTRY | StatusSignals::FAULT_PRESENT);
        assert!(changed.contains(StatusSignals::AREA_READY));
        assert!(changed.contains(StatusSignals::ENTRY));
        assert!(changed.contains(StatusSignals::FAULT_PRESENT));
        assert!(!changed.contains(StatusSignals::FULL_ARMED));
    }
}
