//! Error types for cyflash.

use std::io;
use thiserror::Error;

/// Result type for cyflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cyflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A bounded wait elapsed without the expected condition.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The handshake attempt bound was reached without seeing the ready token.
    #[error("Handshake exhausted after {attempts} attempts (command {command:?})")]
    HandshakeExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The command that was being negotiated.
        command: String,
    },

    /// The chunked transfer sub-protocol aborted mid-transfer.
    #[error("Transfer aborted: {0}")]
    TransferAborted(String),

    /// The operation was interrupted by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,

    /// The PDU outlet action could not be carried out.
    ///
    /// Recoverable: the orchestrator logs this and continues; the following
    /// readiness wait will time out if the device really did not restart.
    #[error("Power cycle failed: {0}")]
    PowerCycle(String),
}
