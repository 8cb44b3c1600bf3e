//! Stage verification: classify the device's echoed text after a stage.
//!
//! Verification is a single settle-then-drain pass over the channel. The
//! classification is a case-sensitive substring scan of everything the
//! device echoed since the stage began; it never re-reads or waits for more
//! output, so verifying twice in a row yields the same outcome.

use std::time::Duration;

use log::{debug, warn};

use crate::error::Result;
use crate::port::Port;
use crate::session::DeviceSession;
use crate::stage::{Outcome, Stage, StageResult};

/// Classify echoed text against a stage's marker sets.
///
/// Failure markers dominate success markers. A stage with no success
/// markers is markerless and classifies as success unless a failure marker
/// is present.
pub fn classify(text: &str, success_markers: &[String], failure_markers: &[String]) -> Outcome {
    if failure_markers.iter().any(|m| text.contains(m.as_str())) {
        return Outcome::Failure;
    }
    if success_markers.is_empty() {
        return Outcome::Success;
    }
    if success_markers.iter().any(|m| text.contains(m.as_str())) {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

/// Verify one completed stage.
///
/// Sleeps the stage's settle delay, drains whatever the device has
/// buffered, and classifies the stage's cumulative echo. The raw echoed
/// text is always retained in the result, success or not.
pub fn verify<P: Port>(session: &mut DeviceSession<P>, stage: &Stage) -> Result<StageResult> {
    settle(stage.settle_delay);
    session.drain_available()?;

    let echoed = session.echo().to_string();
    let outcome = classify(&echoed, &stage.success_markers, &stage.failure_markers);
    match outcome {
        Outcome::Success => debug!("Stage {} verified", stage.kind),
        Outcome::Failure => warn!("Stage {} echo did not verify", stage.kind),
        Outcome::Timeout => {},
    }

    Ok(StageResult {
        kind: stage.kind,
        label: stage.label.clone(),
        outcome,
        echoed,
    })
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
