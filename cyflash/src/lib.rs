//! # cyflash
//!
//! A library for staged firmware and configuration updates of Cypress-class
//! storage controllers over their serial boot console.
//!
//! This crate provides the control logic for the whole update sequence:
//!
//! - Boot-log monitoring until the console reaches command readiness
//! - Command/response handshakes with bounded retries
//! - XMODEM-128 payload transfer with progress reporting
//! - Post-stage verification of the device's echoed text
//! - PDU outlet power-cycling between stages
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use cyflash::{
//!     DeviceSession, NativePort, NullObserver, Orchestrator, OrchestratorConfig,
//!     SerialConfig, Stage,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let session = DeviceSession::new(port);
//!
//!     let image = std::fs::read("bl2.bin")?;
//!     let stages = vec![Stage::bootloader_update("bl2.bin", image)];
//!
//!     let mut orchestrator =
//!         Orchestrator::new(session, OrchestratorConfig::default(), None, stages);
//!     let report = orchestrator.run(&mut NullObserver)?;
//!     println!("Update {}", if report.is_success() { "done" } else { "failed" });
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod handshake;
pub mod monitor;
pub mod orchestrator;
pub mod port;
pub mod power;
pub mod protocol;
pub mod session;
pub mod stage;
pub mod text;
pub mod transfer;
pub mod verify;

#[cfg(test)]
pub(crate) mod mock;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    handshake::{HandshakeConfig, SendMode},
    monitor::await_readiness,
    orchestrator::{
        NullObserver, Orchestrator, OrchestratorConfig, RunObserver, RunReport, State,
    },
    port::{DEFAULT_BAUD, Port, SerialConfig},
    power::{OutletState, PduConfig, PowerCycler},
    protocol::xmodem::{BLOCK_SIZE, XmodemConfig},
    session::DeviceSession,
    stage::{Outcome, PostAction, Stage, StageKind, StageResult},
    text::{clean_console_text, drain_utf8_lossy, filter_lines},
    transfer::TransferProgress,
};
