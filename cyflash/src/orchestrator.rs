//! Update orchestrator: drives the staged update sequence end to end.
//!
//! The orchestrator is the only component that decides whether the run
//! continues. Stage components report typed outcomes; a verify failure or
//! an exhausted wait halts the run with the partial report intact, while
//! I/O errors and cancellation propagate out as errors.

use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeConfig};
use crate::monitor;
use crate::port::Port;
use crate::power::PowerCycler;
use crate::protocol::xmodem::XmodemConfig;
use crate::session::DeviceSession;
use crate::stage::{Outcome, PostAction, Stage, StageResult, diagnostic_line_filters};
use crate::transfer::{self, TransferProgress};
use crate::verify;

/// Default bound on the boot readiness wait. Cold boots after a bootloader
/// update take tens of seconds; this is generous but finite.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(300);

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not started.
    Idle,
    /// Waiting for the boot readiness marker.
    AwaitBoot,
    /// Negotiating transfer readiness for the current stage.
    Handshake,
    /// Pushing the current stage's payload.
    Transfer,
    /// Classifying the current stage's echo.
    Verify,
    /// Cycling the PDU outlet.
    PowerCycle,
    /// Advancing to the next stage.
    NextStage,
    /// Every stage verified successfully.
    Done,
    /// The run halted before completing every stage.
    Failed,
}

/// Observer for run events. All methods default to no-ops so callers
/// implement only what they display.
pub trait RunObserver {
    /// A filtered boot diagnostic line was observed.
    fn boot_line(&mut self, _line: &str) {}

    /// A stage is about to execute.
    fn stage_started(&mut self, _index: usize, _stage: &Stage) {}

    /// A transfer chunk was consumed.
    fn transfer_progress(&mut self, _progress: TransferProgress) {}

    /// A stage finished (any outcome).
    fn stage_finished(&mut self, _result: &StageResult) {}
}

/// Observer that ignores every event.
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Tuning for a whole run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Boot readiness marker.
    pub boot_marker: String,
    /// Boot-log substrings surfaced to the observer.
    pub line_filters: Vec<String>,
    /// Bound on each boot readiness wait.
    pub boot_timeout: Duration,
    /// Settle between handshake send and response read.
    pub handshake_settle: Duration,
    /// Handshake attempt bound.
    pub handshake_attempts: u32,
    /// Transfer sub-protocol tuning.
    pub xmodem: XmodemConfig,
    /// Wait for the boot marker before the first stage.
    pub await_boot_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            boot_marker: crate::stage::BOOT_READY_MARKER.to_string(),
            line_filters: diagnostic_line_filters(),
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            handshake_settle: Duration::from_millis(800),
            handshake_attempts: 10,
            xmodem: XmodemConfig::default(),
            await_boot_on_start: true,
        }
    }
}

/// Final report of one run.
#[derive(Debug)]
pub struct RunReport {
    /// Results of the stages that executed, in order.
    pub stages: Vec<StageResult>,
    /// Terminal state, `Done` or `Failed`.
    pub state: State,
    /// Operator-facing reason when the run failed outside a stage result.
    pub failure: Option<String>,
}

impl RunReport {
    /// Whether every stage executed and verified.
    pub fn is_success(&self) -> bool {
        self.state == State::Done
    }
}

/// Drives an ordered list of stages over one device session.
pub struct Orchestrator<P: Port> {
    session: DeviceSession<P>,
    config: OrchestratorConfig,
    power: Option<PowerCycler>,
    stages: Vec<Stage>,
    state: State,
}

impl<P: Port> Orchestrator<P> {
    /// Build an orchestrator over an opened session.
    pub fn new(
        session: DeviceSession<P>,
        config: OrchestratorConfig,
        power: Option<PowerCycler>,
        stages: Vec<Stage>,
    ) -> Self {
        Self {
            session,
            config,
            power,
            stages,
            state: State::Idle,
        }
    }

    /// Current phase.
    pub fn state(&self) -> State {
        self.state
    }

    /// Access the underlying session (e.g. to close the port afterwards).
    pub fn session_mut(&mut self) -> &mut DeviceSession<P> {
        &mut self.session
    }

    /// Execute every stage in order.
    ///
    /// Returns `Ok` with a report for both complete and halted runs; `Err`
    /// only for I/O errors and cancellation.
    pub fn run(&mut self, observer: &mut dyn RunObserver) -> Result<RunReport> {
        let mut results = Vec::with_capacity(self.stages.len());

        if self.config.await_boot_on_start {
            self.state = State::AwaitBoot;
            if let Err(reason) = self.await_boot(observer)? {
                return Ok(self.finish_failed(results, reason));
            }
        }

        for index in 0..self.stages.len() {
            let stage = self.stages[index].clone();
            observer.stage_started(index, &stage);
            info!("Stage {}/{}: {}", index + 1, self.stages.len(), stage.kind);

            self.session.reset_echo();
            let result = self.run_stage(&stage, observer)?;
            let outcome = result.outcome;
            observer.stage_finished(&result);
            results.push(result);

            if outcome != Outcome::Success {
                warn!("Stage {} halted the run ({outcome:?})", stage.kind);
                return Ok(self.finish_failed(results, None));
            }

            if let PostAction::PowerCycle { reconnect } = stage.post_action {
                self.state = State::PowerCycle;
                self.power_cycle();
                if reconnect {
                    self.session.reconnect()?;
                }
                // The device restarts; readiness must be re-observed before
                // the next handshake.
                self.state = State::AwaitBoot;
                if let Err(reason) = self.await_boot(observer)? {
                    return Ok(self.finish_failed(results, reason));
                }
            }
            self.state = State::NextStage;
        }

        self.state = State::Done;
        info!("All {} stages verified", results.len());
        Ok(RunReport {
            stages: results,
            state: State::Done,
            failure: None,
        })
    }

    /// One stage: handshake, optional transfer, verify.
    ///
    /// Exhausted waits come back as a result with `Outcome::Timeout`;
    /// anything else the caller must halt on is a real error.
    fn run_stage(
        &mut self,
        stage: &Stage,
        observer: &mut dyn RunObserver,
    ) -> Result<StageResult> {
        self.state = State::Handshake;
        if let Some(token) = &stage.ready_token {
            let config = HandshakeConfig {
                mode: stage.send_mode.clone(),
                settle: self.config.handshake_settle,
                max_attempts: self.config.handshake_attempts,
            };
            match handshake::negotiate(&mut self.session, &stage.command, token, &config) {
                Ok(_) => {},
                Err(e @ (Error::HandshakeExhausted { .. } | Error::Timeout(_))) => {
                    warn!("{e}");
                    return Ok(self.timeout_result(stage));
                },
                Err(e) => return Err(e),
            }
        } else {
            self.session.send_command(&stage.command, &stage.send_mode)?;
        }

        let mut transfer_aborted = false;
        if let Some(image) = &stage.image {
            self.state = State::Transfer;
            let outcome = transfer::transfer(
                &mut self.session,
                image,
                &self.config.xmodem,
                &mut |p| observer.transfer_progress(p),
            );
            match outcome {
                Ok(()) => {},
                // Verify anyway: the device's error echo is the useful
                // diagnostic, and the classification will fail honestly.
                Err(Error::TransferAborted(reason)) => {
                    warn!("Transfer aborted, proceeding to verify: {reason}");
                    transfer_aborted = true;
                },
                Err(e @ Error::Timeout(_)) => {
                    warn!("{e}");
                    return Ok(self.timeout_result(stage));
                },
                Err(e) => return Err(e),
            }
        }

        self.state = State::Verify;
        let mut result = verify::verify(&mut self.session, stage)?;
        // A markerless stage has no echo that can vouch for an aborted
        // transfer; the abort itself is the verdict.
        if transfer_aborted && stage.success_markers.is_empty() {
            result.outcome = Outcome::Failure;
        }
        Ok(result)
    }

    /// Wait for the boot marker, forwarding diagnostic lines.
    ///
    /// `Ok(Err(reason))` is a timeout that should fail the run without
    /// tearing it down as an I/O error.
    #[allow(clippy::type_complexity)]
    fn await_boot(
        &mut self,
        observer: &mut dyn RunObserver,
    ) -> Result<std::result::Result<(), Option<String>>> {
        let observed = monitor::await_readiness(
            &mut self.session,
            &self.config.boot_marker,
            &self.config.line_filters,
            self.config.boot_timeout,
        );
        match observed {
            Ok(lines) => {
                for line in &lines {
                    observer.boot_line(line);
                }
                Ok(Ok(()))
            },
            Err(Error::Timeout(reason)) => Ok(Err(Some(reason))),
            Err(e) => Err(e),
        }
    }

    /// Cycle the outlet if a PDU is configured. Failures are recoverable;
    /// if the device truly did not restart, the next readiness wait times
    /// out and fails the run.
    fn power_cycle(&mut self) {
        match &self.power {
            Some(cycler) => {
                if let Err(e) = cycler.cycle() {
                    warn!("{e}; continuing, readiness wait will catch a dead device");
                }
            },
            None => {
                warn!("No PDU configured; power-cycle the device manually");
            },
        }
    }

    fn timeout_result(&self, stage: &Stage) -> StageResult {
        StageResult {
            kind: stage.kind,
            label: stage.label.clone(),
            outcome: Outcome::Timeout,
            echoed: self.session.echo().to_string(),
        }
    }

    fn finish_failed(&mut self, stages: Vec<StageResult>, failure: Option<String>) -> RunReport {
        self.state = State::Failed;
        RunReport {
            stages,
            state: State::Failed,
            failure,
        }
    }
}
