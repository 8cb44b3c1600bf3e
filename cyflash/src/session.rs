//! Device session: exclusive ownership of the control channel for one run.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::Result;
use crate::handshake::SendMode;
use crate::port::Port;
use crate::text::drain_utf8_lossy;

/// Cap on the cumulative echo buffer. Boot logs are a few KiB; anything
/// beyond this is stale operator noise and gets trimmed from the front.
const ECHO_CAP: usize = 64 * 1024;

/// Read chunk size for buffer sweeps.
const READ_CHUNK: usize = 1024;

/// Owns the serial channel for the duration of an update run.
///
/// Holds the cumulative received-text buffer (reset between stages) and the
/// carry buffer for UTF-8 sequences split across reads. Exclusive access is
/// enforced by `&mut` threading: whichever component is currently reading
/// holds the only mutable borrow.
pub struct DeviceSession<P: Port> {
    port: P,
    carry: Vec<u8>,
    echo: String,
    boot_marker_at: Option<Instant>,
}

impl<P: Port> DeviceSession<P> {
    /// Create a session around an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            carry: Vec::new(),
            echo: String::new(),
            boot_marker_at: None,
        }
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Port name for operator messages.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Cumulative decoded text received since the last [`reset_echo`].
    ///
    /// [`reset_echo`]: DeviceSession::reset_echo
    pub fn echo(&self) -> &str {
        &self.echo
    }

    /// Reset the cumulative echo buffer (called between stages).
    pub fn reset_echo(&mut self) {
        self.echo.clear();
    }

    /// Record that the boot readiness marker was just observed.
    pub fn note_boot_marker(&mut self) {
        self.boot_marker_at = Some(Instant::now());
    }

    /// Instant of the last observed boot readiness marker, if any.
    pub fn last_boot_marker(&self) -> Option<Instant> {
        self.boot_marker_at
    }

    /// Sweep all currently buffered bytes off the channel and decode them.
    ///
    /// Single non-blocking pass: reads only what the driver already holds,
    /// so an idle channel returns an empty string immediately.
    pub fn drain_available(&mut self) -> Result<String> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.port.bytes_to_read()? > 0 {
            let n = self.read_some(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.carry.extend_from_slice(&chunk[..n]);
        }
        Ok(self.decode_carry())
    }

    /// One bounded read of up to `n` bytes, decoded permissively.
    ///
    /// Returns whatever arrived within the port's read timeout, possibly
    /// nothing.
    pub fn read_bounded(&mut self, n: usize) -> Result<String> {
        let mut buf = vec![0u8; n];
        let got = self.read_some(&mut buf)?;
        self.carry.extend_from_slice(&buf[..got]);
        Ok(self.decode_carry())
    }

    /// Send a command string followed by CRLF, using the given send mode.
    pub fn send_command(&mut self, command: &str, mode: &SendMode) -> Result<()> {
        trace!("Sending command {command:?} ({mode:?})");
        match mode {
            SendMode::Line => {
                self.port.write_all_bytes(command.as_bytes())?;
            },
            SendMode::PerChar { delay } => {
                for ch in command.as_bytes() {
                    self.port.write_all_bytes(std::slice::from_ref(ch))?;
                    std::thread::sleep(*delay);
                }
            },
            SendMode::Chunked { size, delay } => {
                for chunk in command.as_bytes().chunks((*size).max(1)) {
                    self.port.write_all_bytes(chunk)?;
                    std::thread::sleep(*delay);
                }
            },
        }
        self.port.write_all_bytes(b"\r\n")?;
        Ok(())
    }

    /// Write raw bytes to the channel.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all_bytes(data)
    }

    /// Set the channel read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)
    }

    /// Close and reopen the channel, clearing session decode state.
    pub fn reconnect(&mut self) -> Result<()> {
        self.port.reconnect()?;
        self.carry.clear();
        Ok(())
    }

    /// Close the channel.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    /// Read into `buf`, mapping a read timeout to "no data".
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Decode the carry buffer, append to the echo buffer, return the new
    /// text.
    fn decode_carry(&mut self) -> String {
        let text = drain_utf8_lossy(&mut self.carry);
        if !text.is_empty() {
            self.echo.push_str(&text);
            if self.echo.len() > ECHO_CAP {
                let cut = self.echo.len() - ECHO_CAP;
                // Trim on a char boundary
                let cut = (cut..self.echo.len())
                    .find(|i| self.echo.is_char_boundary(*i))
                    .unwrap_or(self.echo.len());
                self.echo.drain(..cut);
            }
        }
        text
    }
}
