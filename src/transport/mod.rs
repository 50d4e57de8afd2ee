// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

pub mod serial;

pub use serial::SerialLink;

use crate::error::Result;

/// Byte link to the panel's com port.
///
/// The driver polls; reads must not block beyond a negligible window, and
/// writes are fire-and-forget. Implemented by [`SerialLink`] for real
/// hardware and by in-memory doubles in tests.
pub trait PanelPort {
    /// Read one byte if immediately available.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Write a whole frame to the link.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}
