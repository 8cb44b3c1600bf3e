//! Command/response handshake with the device console.
//!
//! Update commands (`ndl2`, `ndlcfg`, ...) are acknowledged by the device
//! echoing a short ready token once it is prepared to accept a chunked
//! transfer. The token can take several resends to appear while the console
//! task is still settling after boot, so the negotiation resends the same
//! command until the token shows up or the attempt bound is reached.

use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::DeviceSession;

/// Bytes read as the immediate response after each command send.
pub const RESPONSE_BYTES: usize = 32;

/// How command bytes are put on the wire.
///
/// Whole-line sends are fine for a healthy console; slower receivers drop
/// characters under load and need the command paced out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendMode {
    /// Send the whole command in one write.
    Line,
    /// Send one character at a time with a fixed inter-character delay.
    PerChar {
        /// Delay after each character.
        delay: Duration,
    },
    /// Send fixed-size chunks with a fixed inter-chunk delay.
    Chunked {
        /// Chunk size in bytes.
        size: usize,
        /// Delay after each chunk.
        delay: Duration,
    },
}

impl SendMode {
    /// Per-character pacing used by the recovery flow (100 ms).
    pub fn per_char_default() -> Self {
        Self::PerChar {
            delay: Duration::from_millis(100),
        }
    }

    /// Chunked pacing used for long literal commands (4 bytes / 100 ms).
    pub fn chunked_default() -> Self {
        Self::Chunked {
            size: 4,
            delay: Duration::from_millis(100),
        }
    }
}

/// Handshake tuning knobs.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Send mode for the command bytes.
    pub mode: SendMode,
    /// Settle time between sending and reading the response.
    pub settle: Duration,
    /// Attempt bound before giving up with `HandshakeExhausted`.
    pub max_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            mode: SendMode::Line,
            settle: Duration::from_millis(800),
            max_attempts: 10,
        }
    }
}

/// Negotiate transfer readiness: resend `command` until the device's
/// response contains `ready_token`.
///
/// Returns the number of attempts used (1-based). No backoff beyond the
/// fixed settle interval is applied between attempts.
pub fn negotiate<P: Port>(
    session: &mut DeviceSession<P>,
    command: &str,
    ready_token: &str,
    config: &HandshakeConfig,
) -> Result<u32> {
    for attempt in 1..=config.max_attempts {
        if crate::is_interrupt_requested() {
            return Err(Error::Cancelled);
        }

        debug!("Handshake attempt {attempt}/{}: {command:?}", config.max_attempts);
        session.send_command(command, &config.mode)?;
        std::thread::sleep(config.settle);

        let response = session.read_bounded(RESPONSE_BYTES)?;
        if response.contains(ready_token) {
            info!("Device ready for transfer ({command:?}, attempt {attempt})");
            return Ok(attempt);
        }
        debug!("No ready token in response {response:?}, retrying");
    }

    Err(Error::HandshakeExhausted {
        attempts: config.max_attempts,
        command: command.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn fast_config(max_attempts: u32) -> HandshakeConfig {
        HandshakeConfig {
            mode: SendMode::Line,
            settle: Duration::ZERO,
            max_attempts,
        }
    }

    #[test]
    fn test_negotiate_succeeds_first_attempt() {
        let port = MockPort::new(&[b"NCCC".to_vec()]);
        let mut session = DeviceSession::new(port);
        let attempts = negotiate(&mut session, "ndl2", "NCCC", &fast_config(5)).unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(session.port_mut().written(), b"ndl2\r\n");
    }

    #[test]
    fn test_negotiate_succeeds_on_attempt_k() {
        // Two junk responses, then the token embedded in echo noise
        let port = MockPort::new(&[
            b"ndl2\r\nunknown".to_vec(),
            b"".to_vec(),
            b"ndl2\r\nNCCC".to_vec(),
        ]);
        let mut session = DeviceSession::new(port);
        let attempts = negotiate(&mut session, "ndl2", "NCCC", &fast_config(5)).unwrap();
        assert_eq!(attempts, 3);
        // Command resent each attempt
        assert_eq!(session.port_mut().written(), b"ndl2\r\nndl2\r\nndl2\r\n");
    }

    #[test]
    fn test_negotiate_exhausts_after_max_attempts() {
        let port = MockPort::new(&[]);
        let mut session = DeviceSession::new(port);
        let err = negotiate(&mut session, "ndlcfg", "NCCC", &fast_config(5)).unwrap_err();
        match err {
            Error::HandshakeExhausted { attempts, command } => {
                assert_eq!(attempts, 5);
                assert_eq!(command, "ndlcfg");
            },
            other => panic!("Expected HandshakeExhausted, got {other:?}"),
        }
        // Exactly max_attempts sends went out
        let written = session.port_mut().written().to_vec();
        assert_eq!(written, b"ndlcfg\r\n".repeat(5));
    }

    #[test]
    fn test_negotiate_token_match_is_case_sensitive() {
        let port = MockPort::new(&[b"nccc".to_vec()]);
        let mut session = DeviceSession::new(port);
        assert!(negotiate(&mut session, "ndl2", "NCCC", &fast_config(1)).is_err());
    }
}
