//! Chunk transfer driver: wraps the XMODEM sub-protocol and reports
//! progress.
//!
//! The driver owns the progress counter for the duration of one stage and
//! pushes read-only snapshots to the caller's sink. It never declares stage
//! success itself; that is the verifier's job, based on what the device
//! echoes after the transfer.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::xmodem::{BLOCK_SIZE, XmodemConfig, XmodemTransfer};
use crate::session::DeviceSession;

/// Protocol chunks beyond the data blocks: the receiver's start byte and
/// the EOT exchange.
pub const OVERHEAD_CHUNKS: u32 = 2;

/// Monotonically increasing chunk counter for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    sent: u32,
    total: u32,
}

impl TransferProgress {
    /// Precompute the chunk total for a payload of `len` bytes.
    #[allow(clippy::cast_possible_truncation)] // images are far below u32::MAX blocks
    pub fn for_payload(len: usize) -> Self {
        let blocks = len.div_ceil(BLOCK_SIZE) as u32;
        Self {
            sent: 0,
            total: blocks + OVERHEAD_CHUNKS,
        }
    }

    /// Chunks consumed so far.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Precomputed chunk total.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Whether the transfer has consumed every chunk.
    pub fn is_complete(&self) -> bool {
        self.sent >= self.total
    }

    fn advance(&mut self) {
        self.sent += 1;
    }
}

/// Drive one chunked payload transfer over the session's channel.
///
/// `progress_sink` observes a snapshot after every consumed chunk; it must
/// not influence transfer state. A sub-protocol abort is surfaced as
/// [`Error::TransferAborted`] so the caller can still read the device's
/// error echo.
pub fn transfer<P: Port>(
    session: &mut DeviceSession<P>,
    payload: &[u8],
    config: &XmodemConfig,
    progress_sink: &mut dyn FnMut(TransferProgress),
) -> Result<()> {
    let mut progress = TransferProgress::for_payload(payload.len());
    debug!(
        "Transferring {} bytes in {} chunks",
        payload.len(),
        progress.total()
    );

    // The sub-protocol reads one response byte at a time; give it the
    // tighter per-character timeout and put the session's back afterwards.
    let session_timeout = session.port_mut().timeout();
    session.set_timeout(config.char_timeout)?;
    let result = XmodemTransfer::with_config(session.port_mut(), config.clone())
        .transfer(payload, || {
            progress.advance();
            progress_sink(progress);
        });
    session.set_timeout(session_timeout)?;

    match result {
        Ok(()) => {
            debug!("Transfer done ({}/{} chunks)", progress.sent(), progress.total());
            Ok(())
        },
        Err(Error::TransferAborted(reason)) => {
            warn!("Transfer aborted after {} chunks: {reason}", progress.sent());
            Err(Error::TransferAborted(reason))
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use crate::protocol::xmodem::control;
    use std::time::Duration;

    fn fast_config() -> XmodemConfig {
        XmodemConfig {
            char_timeout: Duration::from_millis(50),
            start_timeout: Duration::from_millis(200),
            max_retries: 2,
        }
    }

    fn ack_script(blocks: usize) -> Vec<Vec<u8>> {
        let mut script = vec![vec![control::C]];
        script.extend(std::iter::repeat_n(vec![control::ACK], blocks));
        script.push(vec![control::ACK]); // EOT
        script
    }

    #[test]
    fn test_progress_total_exact_multiple() {
        // Exactly 4 blocks, no partial final chunk
        let payload = vec![0u8; BLOCK_SIZE * 4];
        let port = MockPort::new(&ack_script(4));
        let mut session = DeviceSession::new(port);

        let mut last = None;
        transfer(&mut session, &payload, &fast_config(), &mut |p| {
            last = Some(p);
        })
        .unwrap();

        let last = last.unwrap();
        assert_eq!(last.total(), 4 + OVERHEAD_CHUNKS);
        assert_eq!(last.sent(), last.total());
        assert!(last.is_complete());
    }

    #[test]
    fn test_progress_total_one_byte_short() {
        // One byte less than a multiple: one short final chunk, same total
        let payload = vec![0u8; BLOCK_SIZE * 4 - 1];
        let port = MockPort::new(&ack_script(4));
        let mut session = DeviceSession::new(port);

        let mut snapshots = Vec::new();
        transfer(&mut session, &payload, &fast_config(), &mut |p| {
            snapshots.push(p);
        })
        .unwrap();

        assert_eq!(snapshots.last().unwrap().total(), 4 + OVERHEAD_CHUNKS);
        assert!(snapshots.last().unwrap().is_complete());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let payload = vec![0u8; BLOCK_SIZE * 2];
        let port = MockPort::new(&ack_script(2));
        let mut session = DeviceSession::new(port);

        let mut previous = 0;
        transfer(&mut session, &payload, &fast_config(), &mut |p| {
            assert!(p.sent() > previous);
            previous = p.sent();
        })
        .unwrap();
        assert_eq!(previous, 2 + OVERHEAD_CHUNKS);
    }

    #[test]
    fn test_transfer_applies_and_restores_char_timeout() {
        let port = MockPort::new(&ack_script(1));
        let mut session = DeviceSession::new(port);
        session.set_timeout(Duration::from_secs(1)).unwrap();

        transfer(&mut session, &[0u8; 8], &fast_config(), &mut |_| {}).unwrap();

        assert_eq!(
            session.port_mut().timeouts_set(),
            [
                Duration::from_secs(1),
                Duration::from_millis(50),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(session.port_mut().timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_abort_surfaces_as_transfer_aborted() {
        let script = vec![vec![control::C], vec![control::CAN]];
        let port = MockPort::new(&script);
        let mut session = DeviceSession::new(port);

        let err = transfer(&mut session, &[0u8; 8], &fast_config(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::TransferAborted(_)));
    }
}
