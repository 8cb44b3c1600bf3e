//! Boot monitor: wait for the device console to reach command readiness.

use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::DeviceSession;
use crate::text::filter_lines;

/// Pause between polls of the channel.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll the channel until the cumulative decoded text contains `marker`.
///
/// Lines containing any of `line_filters` are collected and returned for
/// operator visibility (boot version, memory-training results); they do not
/// influence the readiness decision. Readiness is declared the instant the
/// marker appears, even split across reads; consumed bytes are not
/// replayable, so the call triggers at most once.
///
/// Fails with [`Error::Timeout`] when `timeout` elapses without the marker,
/// and with [`Error::Cancelled`] if interruption was requested.
pub fn await_readiness<P: Port>(
    session: &mut DeviceSession<P>,
    marker: &str,
    line_filters: &[String],
    timeout: Duration,
) -> Result<Vec<String>> {
    debug!("Waiting for boot marker {marker:?} (timeout {timeout:?})");
    let start = std::time::Instant::now();
    let mut seen = String::new();
    let mut observed = Vec::new();

    loop {
        if crate::is_interrupt_requested() {
            return Err(Error::Cancelled);
        }

        let text = session.drain_available()?;
        if !text.is_empty() {
            observed.extend(filter_lines(&text, line_filters));
            seen.push_str(&text);

            if seen.contains(marker) {
                info!("Boot marker observed: {marker}");
                session.note_boot_marker();
                return Ok(observed);
            }

            // Keep only a marker-sized tail; the marker cannot span further
            // back than its own length minus one.
            if seen.len() > marker.len().saturating_mul(2) {
                let cut = seen.len() - marker.len();
                let cut = (0..=cut)
                    .rev()
                    .find(|i| seen.is_char_boundary(*i))
                    .unwrap_or(0);
                seen.drain(..cut);
            }
        }

        if start.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "Boot marker {marker:?} not observed within {timeout:?}"
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    const MARKER: &str = "NOR task init done!";

    fn filters() -> Vec<String> {
        vec![
            "Ver ".to_string(),
            "DDR Frequency".to_string(),
            "Training has run successfully".to_string(),
        ]
    }

    #[test]
    fn test_readiness_marker_in_single_read() {
        let port = MockPort::new(&[format!("boot...\n{MARKER}\n").into_bytes()]);
        let mut session = DeviceSession::new(port);
        let observed =
            await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).unwrap();
        assert!(observed.is_empty());
        assert!(session.last_boot_marker().is_some());
    }

    #[test]
    fn test_readiness_marker_split_across_reads() {
        let port = MockPort::new(&[b"...NOR task ".to_vec(), b"init done!\n".to_vec()]);
        let mut session = DeviceSession::new(port);
        assert!(await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).is_ok());
    }

    #[test]
    fn test_readiness_succeeds_once_and_consumes_bytes() {
        let port = MockPort::new(&[format!("{MARKER}\n{MARKER}\n").into_bytes()]);
        let mut session = DeviceSession::new(port);
        assert!(await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).is_ok());
        // Bytes are consumed, not replayable: a second wait times out.
        let err =
            await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_readiness_surfaces_diagnostic_lines() {
        let text = format!(
            "Ver 2.1.0-rc\nnoise line\nDDR Frequency: 4800\nTraining has run successfully\n{MARKER}\n"
        );
        let port = MockPort::new(&[text.into_bytes()]);
        let mut session = DeviceSession::new(port);
        let observed =
            await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).unwrap();
        assert_eq!(
            observed,
            vec![
                "Ver 2.1.0-rc",
                "DDR Frequency: 4800",
                "Training has run successfully"
            ]
        );
    }

    #[test]
    fn test_readiness_timeout_without_marker() {
        let port = MockPort::new(&[b"still booting\n".to_vec()]);
        let mut session = DeviceSession::new(port);
        let err =
            await_readiness(&mut session, MARKER, &filters(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
