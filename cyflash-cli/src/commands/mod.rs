//! Command implementations shared plumbing.

pub mod provision;
pub mod recover;

use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use cyflash::{
    DeviceSession, NativePort, Orchestrator, OrchestratorConfig, Outcome, PduConfig,
    PowerCycler, RunObserver, RunReport, SerialConfig, Stage, StageResult, TransferProgress,
    clean_console_text,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

/// Resolved options shared by every update command.
#[derive(Debug)]
pub struct RunOptions {
    /// Serial port path.
    pub port: String,
    /// Baud rate.
    pub baud: u32,
    /// PDU endpoint, when power-cycling is available.
    pub pdu: Option<PduConfig>,
    /// Bound on each boot readiness wait.
    pub boot_timeout: Duration,
    /// Settle between handshake send and response read.
    pub handshake_settle: Duration,
    /// Handshake attempt bound.
    pub handshake_attempts: u32,
    /// Wait for the boot marker before the first stage.
    pub await_boot: bool,
    /// Suppress non-essential output.
    pub quiet: bool,
    /// Use progress animations (TTY with colors).
    pub fancy: bool,
}

/// Open the session, run the stages, print the per-stage report.
pub fn execute(options: &RunOptions, stages: Vec<Stage>) -> Result<RunReport> {
    if !options.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&options.port).green(),
            options.baud
        );
        if options.pdu.is_none() {
            eprintln!(
                "{} No PDU configured; power cycles must be done manually",
                style("⚠").yellow()
            );
        }
    }

    let serial = SerialConfig::new(&options.port, options.baud);
    let port = NativePort::open(&serial)
        .with_context(|| format!("Failed to open serial port {}", options.port))?;
    let session = DeviceSession::new(port);

    let config = OrchestratorConfig {
        boot_timeout: options.boot_timeout,
        handshake_settle: options.handshake_settle,
        handshake_attempts: options.handshake_attempts,
        await_boot_on_start: options.await_boot,
        ..OrchestratorConfig::default()
    };
    let power = options.pdu.clone().map(PowerCycler::new);

    debug!("Running {} stages", stages.len());
    let total = stages.len();
    let mut orchestrator = Orchestrator::new(session, config, power, stages);
    let mut observer = CliObserver::new(options.quiet, options.fancy, total);

    let report = orchestrator.run(&mut observer)?;
    let _ = orchestrator.session_mut().close();

    print_summary(&report, options.quiet);
    Ok(report)
}

fn print_summary(report: &RunReport, quiet: bool) {
    if let Some(reason) = &report.failure {
        eprintln!("{} {}", style("✗").red().bold(), reason);
    }
    if quiet {
        return;
    }
    eprintln!();
    if report.is_success() {
        eprintln!(
            "{} All {} stages verified",
            style("🎉").green().bold(),
            report.stages.len()
        );
    } else {
        eprintln!("{} Update failed; device may need recovery", style("✗").red().bold());
    }
}

/// Console observer: stage banners, boot diagnostics, a transfer progress
/// bar and the device's echoed text after every stage.
pub struct CliObserver {
    quiet: bool,
    fancy: bool,
    total: usize,
    bar: Option<ProgressBar>,
}

impl CliObserver {
    /// Create an observer for a run of `total` stages.
    pub fn new(quiet: bool, fancy: bool, total: usize) -> Self {
        Self {
            quiet,
            fancy,
            total,
            bar: None,
        }
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl RunObserver for CliObserver {
    fn boot_line(&mut self, line: &str) {
        if !self.quiet {
            eprintln!("    {}", style(line).dim());
        }
    }

    fn stage_started(&mut self, index: usize, stage: &Stage) {
        self.finish_bar();
        if !self.quiet {
            eprintln!(
                "\n{} {} ({})",
                style(format!("[{}/{}]", index + 1, self.total)).cyan().bold(),
                style(&stage.label).bold(),
                stage.kind
            );
        }
    }

    fn transfer_progress(&mut self, progress: TransferProgress) {
        if self.quiet || !self.fancy {
            return;
        }
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(u64::from(progress.total()));
            #[allow(clippy::unwrap_used)] // Static template string
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            bar
        });
        bar.set_position(u64::from(progress.sent()));
    }

    fn stage_finished(&mut self, result: &StageResult) {
        self.finish_bar();

        let (symbol, verdict) = match result.outcome {
            Outcome::Success => (style("✓").green(), "ok"),
            Outcome::Failure => (style("✗").red(), "failed"),
            Outcome::Timeout => (style("✗").red(), "timed out"),
        };
        if !self.quiet {
            eprintln!("  {symbol} {} {verdict}", result.label);
        }

        // The device's echo is the operator's evidence, shown for every
        // outcome.
        let text = clean_console_text(&result.echoed);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            eprintln!("    {}", style(line).dim());
        }
    }
}
