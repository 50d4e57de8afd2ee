// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation of TexecomApplication
//
//! # texecom-serial-bridge
//!
//! Serial driver for Texecom Premier alarm panels, speaking the com-port
//! Crestron keypad protocol with the panel's "Simple" text protocol as a
//! side channel.
//!
//! Premier panels publish keypad traffic but accept no commands, so the
//! driver automates the panel UI instead: it types keystrokes, reads the
//! LCD text back, and cross-checks what it believes against the panel's
//! wired status outputs. The screen scraping is heuristic by nature; the
//! wired outputs are the ground truth.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use texecom_serial_bridge::{ArmMode, PanelOptions, SerialLink, Texecom};
//!
//! fn main() -> anyhow::Result<()> {
//!     let port = SerialLink::open("/dev/ttyUSB0")?;
//!     let options = PanelOptions::builder()
//!         .idle_text("The Cooper's")
//!         .users(["system", "Kevin", "Nicki"])
//!         .build();
//!     let mut panel = Texecom::new(port, options, Vec::new());
//!
//!     panel.arm("1234", ArmMode::Night, Instant::now())?;
//!     loop {
//!         panel.poll(Instant::now())?;
//!         for event in panel.drain_events() {
//!             println!("{:?}", event);
//!         }
//!         std::thread::sleep(Duration::from_millis(10));
//!     }
//! }
//! ```

pub mod alarm;
pub mod config;
pub mod error;
pub mod event;
pub mod framer;
pub mod panel;
pub mod protocol;
mod scheduler;
pub mod sequencer;
pub mod signals;
pub mod simple;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use alarm::{AlarmState, AlarmTracker, ZoneStatus};
pub use config::{ArmMode, PanelOptions, PanelOptionsBuilder};
pub use error::{Result, TexecomError};
pub use event::{event_channel, EventReceiver, EventSender, EventSink, PanelEvent};
pub use framer::{Frame, FrameKind, LinkFramer, MAX_MESSAGE_SIZE};
pub use panel::Texecom;
pub use sequencer::{ActiveTask, ArmStage, DisarmStage, TaskResult};
pub use signals::{NoSignals, SignalSource, StatusSignals};
pub use simple::{ActiveProtocol, SimpleTask};
pub use store::{CodeStore, FileCodeStore, MemoryCodeStore};
pub use transport::{PanelPort, SerialLink};
