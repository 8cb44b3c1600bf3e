//! XMODEM-128 file transfer protocol implementation.
//!
//! The Cypress boot console pulls firmware and configuration images with
//! classic XMODEM: 128-byte blocks, per-block acknowledgment, CRC16 when the
//! receiver opens with 'C' and arithmetic checksum when it opens with NAK.
//!
//! ```text
//! Block format (CRC mode):
//! +-----+-----+------+--------------+--------+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | CRC16  |
//! +-----+-----+------+--------------+--------+
//! | 1   | 1   | 1    |     128      | 2      |
//! +-----+-----+------+--------------+--------+
//! ```

use crate::error::{Error, Result};
use crate::protocol::crc::{checksum8, crc16_xmodem};
use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, trace};
use std::io::{Read, Write};
use std::time::Duration;

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge (also the checksum-mode start request).
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Data block size.
pub const BLOCK_SIZE: usize = 128;

/// Pad byte for short final blocks.
pub const PAD: u8 = 0x1A;

/// Error-detection mode chosen by the receiver's start byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Receiver sent 'C': 16-bit CRC trailer.
    Crc,
    /// Receiver sent NAK: 8-bit arithmetic checksum trailer.
    Checksum,
}

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Timeout for waiting for a single response character.
    pub char_timeout: Duration,
    /// Timeout for waiting for the receiver's start byte.
    pub start_timeout: Duration,
    /// Maximum retries for sending a block.
    pub max_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            char_timeout: Duration::from_millis(1000),
            start_timeout: Duration::from_secs(60),
            max_retries: 16,
        }
    }
}

/// XMODEM transfer handler.
pub struct XmodemTransfer<'a, P: Read + Write> {
    port: &'a mut P,
    config: XmodemConfig,
}

impl<'a, P: Read + Write> XmodemTransfer<'a, P> {
    /// Create a new XMODEM transfer handler.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: XmodemConfig::default(),
        }
    }

    /// Create a new XMODEM transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self { port, config }
    }

    /// Read a single byte with timeout.
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        // Timeout handling is delegated to the port; serial ports surface
        // it as ErrorKind::TimedOut.
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read_byte: no data".into())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::Timeout("read_byte: timeout".into()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Wait for the receiver to request the transfer start.
    pub fn wait_for_start(&mut self) -> Result<StartMode> {
        debug!("Waiting for XMODEM start byte from receiver...");
        let start = std::time::Instant::now();

        while start.elapsed() < self.config.start_timeout {
            match self.read_byte() {
                Ok(control::C) => {
                    debug!("Received 'C', CRC mode");
                    return Ok(StartMode::Crc);
                },
                Ok(control::NAK) => {
                    debug!("Received NAK, checksum mode");
                    return Ok(StartMode::Checksum);
                },
                Ok(control::CAN) => {
                    return Err(Error::TransferAborted(
                        "Receiver cancelled before start".into(),
                    ));
                },
                Ok(c) => {
                    trace!("Received unexpected char: 0x{c:02X}");
                },
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout("Timeout waiting for XMODEM start byte".into()))
    }

    /// Build an XMODEM block.
    fn build_block(seq: u8, data: &[u8], mode: StartMode) -> Vec<u8> {
        let mut block = Vec::with_capacity(3 + BLOCK_SIZE + 2);

        // Header
        block.push(control::SOH);
        block.push(seq);
        block.push(!seq);

        // Data (padded with 0x1A if short)
        if data.len() >= BLOCK_SIZE {
            block.extend_from_slice(&data[..BLOCK_SIZE]);
        } else {
            block.extend_from_slice(data);
            block.resize(3 + BLOCK_SIZE, PAD);
        }

        // Trailer
        match mode {
            StartMode::Crc => {
                let crc = crc16_xmodem(&block[3..3 + BLOCK_SIZE]);
                // Infallible: writing to a Vec
                let _ = block.write_u16::<BigEndian>(crc);
            },
            StartMode::Checksum => {
                block.push(checksum8(&block[3..3 + BLOCK_SIZE]));
            },
        }

        block
    }

    /// Send a block and wait for ACK.
    fn send_block(&mut self, block: &[u8]) -> Result<()> {
        for retry in 0..self.config.max_retries {
            trace!("Sending block (attempt {})", retry + 1);

            self.port.write_all(block)?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    trace!("Block ACKed");
                    return Ok(());
                },
                Ok(control::NAK) => {
                    debug!("Block NAKed, retrying...");
                },
                Ok(control::CAN) => {
                    return Err(Error::TransferAborted(
                        "Transfer cancelled by receiver".into(),
                    ));
                },
                Ok(c) => {
                    debug!("Unexpected response: 0x{c:02X}, retrying...");
                },
                Err(Error::Timeout(_)) => {
                    debug!("Timeout waiting for ACK, retrying...");
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::TransferAborted(format!(
            "Block transfer failed after {} retries",
            self.config.max_retries
        )))
    }

    /// Send EOT and wait for the final ACK.
    fn send_eot(&mut self) -> Result<()> {
        debug!("Sending EOT");

        for _retry in 0..self.config.max_retries {
            self.port.write_all(&[control::EOT])?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                // NAK, timeout, or unexpected response - retry
                Ok(_) | Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        // Consider EOT sent even without ACK
        Ok(())
    }

    /// Notify the receiver that the sender is giving up.
    fn send_cancel(&mut self) {
        let _ = self.port.write_all(&[control::CAN, control::CAN]);
        let _ = self.port.flush();
    }

    /// Transfer `data`, invoking `on_chunk` once per consumed protocol
    /// chunk: once when the receiver's start byte arrives, once per
    /// acknowledged data block, once when EOT completes.
    pub fn transfer<F>(&mut self, data: &[u8], mut on_chunk: F) -> Result<()>
    where
        F: FnMut(),
    {
        debug!("Starting XMODEM transfer ({} bytes)", data.len());

        let mode = self.wait_for_start()?;
        on_chunk();

        let mut seq: u8 = 1;
        for chunk in data.chunks(BLOCK_SIZE) {
            if crate::is_interrupt_requested() {
                self.send_cancel();
                return Err(Error::Cancelled);
            }

            let block = Self::build_block(seq, chunk, mode);
            self.send_block(&block)?;
            seq = seq.wrapping_add(1);
            on_chunk();
        }

        self.send_eot()?;
        on_chunk();

        debug!("XMODEM transfer complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn fast_config() -> XmodemConfig {
        XmodemConfig {
            char_timeout: Duration::from_millis(50),
            start_timeout: Duration::from_millis(200),
            max_retries: 2,
        }
    }

    #[test]
    fn test_build_block_crc_layout() {
        let data = [0x01, 0x02, 0x03];
        let block = XmodemTransfer::<MockPort>::build_block(1, &data, StartMode::Crc);

        assert_eq!(block[0], control::SOH);
        assert_eq!(block[1], 1);
        assert_eq!(block[2], 0xFE);
        assert_eq!(block.len(), 3 + BLOCK_SIZE + 2);
        // Short data padded with 0x1A
        assert_eq!(block[3 + 3], PAD);
        // CRC trailer is big-endian over the padded data
        let crc = crc16_xmodem(&block[3..3 + BLOCK_SIZE]);
        assert_eq!(block[3 + BLOCK_SIZE], (crc >> 8) as u8);
        assert_eq!(block[4 + BLOCK_SIZE], (crc & 0xFF) as u8);
    }

    #[test]
    fn test_build_block_checksum_layout() {
        let data = vec![0xAA; BLOCK_SIZE];
        let block = XmodemTransfer::<MockPort>::build_block(5, &data, StartMode::Checksum);

        assert_eq!(block[0], control::SOH);
        assert_eq!(block[1], 5);
        assert_eq!(block[2], 0xFA);
        assert_eq!(block.len(), 3 + BLOCK_SIZE + 1);
        assert_eq!(block[3 + BLOCK_SIZE], checksum8(&[0xAA; BLOCK_SIZE]));
    }

    #[test]
    fn test_transfer_two_blocks_counts_chunks() {
        // Device: 'C', ACK (block 1), ACK (block 2), ACK (EOT)
        let script: Vec<Vec<u8>> = vec![
            vec![control::C],
            vec![control::ACK],
            vec![control::ACK],
            vec![control::ACK],
        ];
        let mut port = MockPort::new(&script);
        let data = vec![0x42; BLOCK_SIZE + 1]; // one full + one short block
        let mut chunks = 0;
        XmodemTransfer::with_config(&mut port, fast_config())
            .transfer(&data, || chunks += 1)
            .unwrap();
        // start + 2 blocks + EOT
        assert_eq!(chunks, 4);
    }

    #[test]
    fn test_transfer_checksum_mode_from_nak_start() {
        let script: Vec<Vec<u8>> = vec![
            vec![control::NAK],
            vec![control::ACK],
            vec![control::ACK],
        ];
        let mut port = MockPort::new(&script);
        let data = vec![0x11; 16];
        XmodemTransfer::with_config(&mut port, fast_config())
            .transfer(&data, || {})
            .unwrap();
        // SOH block with 1-byte checksum trailer, then EOT
        let written = port.written();
        assert_eq!(written[0], control::SOH);
        assert_eq!(written.len(), 3 + BLOCK_SIZE + 1 + 1);
        assert_eq!(*written.last().unwrap(), control::EOT);
    }

    #[test]
    fn test_transfer_nak_retransmits_block() {
        let script: Vec<Vec<u8>> = vec![
            vec![control::C],
            vec![control::NAK], // reject first send
            vec![control::ACK], // accept retransmission
            vec![control::ACK], // EOT
        ];
        let mut port = MockPort::new(&script);
        let data = vec![0x33; 8];
        XmodemTransfer::with_config(&mut port, fast_config())
            .transfer(&data, || {})
            .unwrap();
        // Block went out twice: 2 * (3 + 128 + 2) + 1 EOT
        assert_eq!(port.written().len(), 2 * (3 + BLOCK_SIZE + 2) + 1);
    }

    #[test]
    fn test_transfer_receiver_cancel_aborts() {
        let script: Vec<Vec<u8>> = vec![vec![control::C], vec![control::CAN]];
        let mut port = MockPort::new(&script);
        let data = vec![0x55; 8];
        let err = XmodemTransfer::with_config(&mut port, fast_config())
            .transfer(&data, || {})
            .unwrap_err();
        assert!(matches!(err, Error::TransferAborted(_)));
    }

    #[test]
    fn test_transfer_no_start_byte_times_out() {
        let mut port = MockPort::new(&[]);
        let err = XmodemTransfer::with_config(&mut port, fast_config())
            .transfer(&[0u8; 4], || {})
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
