//! Port abstraction over the serial control channel.
//!
//! The update logic never touches `serialport` directly; it talks to a
//! `Port` trait so the handshake, monitor and transfer layers can be
//! exercised against a scripted in-memory port in tests.
//!
//! ```text
//! +---------------------------+
//! | monitor/handshake/xmodem  |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |         Port trait        |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial channel configuration.
///
/// The control channel is always 8N1 without flow control; only the path,
/// baud rate and read timeout vary.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate. The Cypress console runs at 115200.
    pub baud_rate: u32,
    /// Read timeout granularity.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

/// Baud rate of the device console.
pub const DEFAULT_BAUD: u32 = 115200;

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-stream interface to the device console.
///
/// Reads that hit the configured timeout surface as
/// `io::ErrorKind::TimedOut`; consumers treat that as "no data yet",
/// never as a channel failure.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Number of bytes already buffered by the driver and readable without
    /// blocking.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close and reopen the channel with its original configuration.
    ///
    /// Some update stages leave the console in a state where the host-side
    /// file descriptor must be recycled before the next stage.
    fn reconnect(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;
