// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::io;
use std::path::Path;
use std::time::Duration;

use serial2::{SerialPort, Settings};
use tracing::info;

use super::PanelPort;
use crate::error::Result;

/// Line speed of the panel's com port.
pub const BAUD_RATE: u32 = 19_200;

/// Serial link to the panel's com port, 19200 8N1.
pub struct SerialLink {
    port: SerialPort,
}

impl SerialLink {
    /// Open and configure the port at `path` (for example `/dev/ttyUSB0`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut port = SerialPort::open(path, |mut settings: Settings| {
            settings.set_raw();
            settings.set_baud_rate(BAUD_RATE)?;
            Ok(settings)
        })?;
        // Short timeout so an idle link never stalls the poll loop.
        port.set_read_timeout(Duration::from_millis(1))?;
        port.discard_buffers()?;
        info!("Serial port {} open at {} baud", path.display(), BAUD_RATE);
        Ok(SerialLink { port })
    }
}

impl PanelPort for SerialLink {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        Ok(())
    }
}
