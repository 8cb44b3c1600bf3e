//! cyflash CLI - staged firmware/configuration updater for Cypress-class
//! storage controllers.
//!
//! ## Features
//!
//! - Full provisioning sequence (bootloader, configs, identity, frequency)
//! - Recovery flow for devices with a damaged bootloader
//! - PDU outlet power-cycling between stages
//! - Boot-log diagnostics and per-stage device echo
//! - Environment variable support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use cyflash::PduConfig;
use env_logger::Env;
use log::debug;

mod commands;
mod config;

use commands::RunOptions;
use commands::provision::ProvisionArgs;
use config::Config;

/// Set by the Ctrl-C handler, polled by the library between protocol steps.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// cyflash - staged serial updater for Cypress storage controllers.
///
/// Environment variables:
///   CYFLASH_PORT           - Default serial port
///   CYFLASH_BAUD           - Default baud rate (default: 115200)
///   CYFLASH_PDU_URL        - PDU base URL for power-cycling
///   CYFLASH_PDU_OUTLET     - PDU outlet identifier
///   CYFLASH_PDU_USER       - PDU basic-auth user
///   CYFLASH_PDU_PASSWORD   - PDU basic-auth password
#[derive(Parser)]
#[command(name = "cyflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the device console.
    #[arg(short, long, global = true, env = "CYFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "CYFLASH_BAUD")]
    baud: Option<u32>,

    /// Base URL of the switched PDU (e.g. http://192.168.0.100).
    #[arg(long, global = true, env = "CYFLASH_PDU_URL")]
    pdu_url: Option<String>,

    /// PDU outlet the device is plugged into.
    #[arg(long, global = true, env = "CYFLASH_PDU_OUTLET")]
    pdu_outlet: Option<String>,

    /// PDU basic-auth user.
    #[arg(long, global = true, env = "CYFLASH_PDU_USER")]
    pdu_user: Option<String>,

    /// PDU basic-auth password.
    #[arg(long, global = true, env = "CYFLASH_PDU_PASSWORD")]
    pdu_password: Option<String>,

    /// Bound on each boot readiness wait, in seconds (default: 300).
    #[arg(long, global = true, value_name = "SECS")]
    boot_timeout_secs: Option<u64>,

    /// Handshake attempt bound per stage (default: 10).
    #[arg(long, global = true)]
    handshake_attempts: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full provisioning sequence on a fresh board.
    Provision {
        /// Second-stage bootloader image.
        #[arg(long, value_name = "PATH")]
        bl: PathBuf,

        /// First configuration image.
        #[arg(long, value_name = "PATH")]
        cfg0: PathBuf,

        /// Second configuration image.
        #[arg(long, value_name = "PATH")]
        cfg1: PathBuf,

        /// Third configuration image.
        #[arg(long, value_name = "PATH")]
        cfg2: PathBuf,

        /// Board serial number to write. Skipping it skips the identity
        /// stage.
        #[arg(long)]
        sn: Option<String>,

        /// Memory frequency in MHz.
        #[arg(long, default_value = "4800")]
        freq: u32,
    },

    /// Recover a device whose bootloader no longer updates normally.
    Recover {
        /// Replacement firmware image.
        #[arg(short = 'f', long, value_name = "PATH")]
        firmware: PathBuf,

        /// Recovery strategy.
        #[arg(long, value_enum, default_value_t = RecoverMode::Update)]
        mode: RecoverMode,
    },
}

/// Recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RecoverMode {
    /// Reload the factory image from ROM first, then push the firmware.
    RestoreRom,
    /// Push the firmware directly.
    Update,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    if let Err(e) = ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupt requested, stopping after the current step...");
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    cyflash::set_interrupt_checker(|| INTERRUPTED.load(Ordering::SeqCst));

    debug!("cyflash v{}", env!("CARGO_PKG_VERSION"));

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            if e.downcast_ref::<cyflash::Error>()
                .is_some_and(|err| matches!(err, cyflash::Error::Cancelled))
            {
                eprintln!("{} Interrupted", style("✗").red().bold());
                ExitCode::from(130)
            } else {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                ExitCode::from(1)
            }
        },
    }
}

/// Dispatch the subcommand. Returns whether the run fully succeeded.
fn run(cli: &Cli) -> Result<bool> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let report = match &cli.command {
        Commands::Provision {
            bl,
            cfg0,
            cfg1,
            cfg2,
            sn,
            freq,
        } => {
            let options = resolve_options(cli, &config, Duration::from_millis(800), true)?;
            let args = ProvisionArgs {
                bl,
                cfgs: vec![cfg0, cfg1, cfg2],
                sn: sn.as_deref(),
                freq: *freq,
            };
            commands::provision::run(&options, &args)?
        },
        Commands::Recover { firmware, mode } => {
            // The degraded recovery console needs a longer settle and may
            // never print the boot marker; start pushing right away.
            let options = resolve_options(cli, &config, Duration::from_secs(1), false)?;
            commands::recover::run(&options, firmware, *mode == RecoverMode::RestoreRom)?
        },
    };

    Ok(report.is_success())
}

/// Merge CLI flags over config-file values into the shared run options.
fn resolve_options(
    cli: &Cli,
    config: &Config,
    handshake_settle: Duration,
    await_boot: bool,
) -> Result<RunOptions> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .context("No serial port specified (use --port, CYFLASH_PORT or the config file)")?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(cyflash::DEFAULT_BAUD);

    let pdu = resolve_pdu(cli, config)?;

    let boot_timeout = Duration::from_secs(
        cli.boot_timeout_secs
            .or(config.update.boot_timeout_secs)
            .unwrap_or(300),
    );
    let handshake_attempts = cli
        .handshake_attempts
        .or(config.update.handshake_attempts)
        .unwrap_or(10);
    if handshake_attempts == 0 {
        bail!("--handshake-attempts must be at least 1");
    }

    Ok(RunOptions {
        port,
        baud,
        pdu,
        boot_timeout,
        handshake_settle,
        handshake_attempts,
        await_boot,
        quiet: cli.quiet,
        fancy: use_fancy_output(),
    })
}

/// PDU endpoint from flags/env over the config file. URL and outlet must
/// come together; credentials default to empty.
fn resolve_pdu(cli: &Cli, config: &Config) -> Result<Option<PduConfig>> {
    let url = cli.pdu_url.clone().or_else(|| config.pdu.url.clone());
    let outlet = cli.pdu_outlet.clone().or_else(|| config.pdu.outlet.clone());

    match (url, outlet) {
        (Some(url), Some(outlet)) => {
            let user = cli
                .pdu_user
                .clone()
                .or_else(|| config.pdu.user.clone())
                .unwrap_or_default();
            let password = cli
                .pdu_password
                .clone()
                .or_else(|| config.pdu.password.clone())
                .unwrap_or_default();
            Ok(Some(PduConfig::new(url, outlet, user, password)))
        },
        (None, None) => Ok(None),
        _ => bail!("PDU configuration needs both --pdu-url and --pdu-outlet"),
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_provision() {
        let cli = Cli::try_parse_from([
            "cyflash",
            "--port",
            "/dev/ttyUSB0",
            "provision",
            "--bl",
            "bl2.bin",
            "--cfg0",
            "c0.bin",
            "--cfg1",
            "c1.bin",
            "--cfg2",
            "c2.bin",
            "--sn",
            "SN123",
            "--freq",
            "5600",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        if let Commands::Provision { bl, sn, freq, .. } = cli.command {
            assert_eq!(bl.to_str().unwrap(), "bl2.bin");
            assert_eq!(sn.as_deref(), Some("SN123"));
            assert_eq!(freq, 5600);
        } else {
            panic!("Expected Provision command");
        }
    }

    #[test]
    fn test_cli_parse_provision_defaults() {
        let cli = Cli::try_parse_from([
            "cyflash", "provision", "--bl", "bl2.bin", "--cfg0", "c0.bin", "--cfg1", "c1.bin",
            "--cfg2", "c2.bin",
        ])
        .unwrap();
        if let Commands::Provision { sn, freq, .. } = cli.command {
            assert!(sn.is_none());
            assert_eq!(freq, 4800);
        } else {
            panic!("Expected Provision command");
        }
    }

    #[test]
    fn test_cli_provision_missing_bl_fails() {
        let result = Cli::try_parse_from([
            "cyflash", "provision", "--cfg0", "c0.bin", "--cfg1", "c1.bin", "--cfg2", "c2.bin",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_recover() {
        let cli = Cli::try_parse_from([
            "cyflash",
            "recover",
            "-f",
            "fw.bin",
            "--mode",
            "restore-rom",
        ])
        .unwrap();
        if let Commands::Recover { firmware, mode } = cli.command {
            assert_eq!(firmware.to_str().unwrap(), "fw.bin");
            assert_eq!(mode, RecoverMode::RestoreRom);
        } else {
            panic!("Expected Recover command");
        }
    }

    #[test]
    fn test_cli_recover_default_mode_is_update() {
        let cli = Cli::try_parse_from(["cyflash", "recover", "--firmware", "fw.bin"]).unwrap();
        if let Commands::Recover { mode, .. } = cli.command {
            assert_eq!(mode, RecoverMode::Update);
        } else {
            panic!("Expected Recover command");
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "cyflash",
            "--port",
            "COM3",
            "--baud",
            "115200",
            "--pdu-url",
            "http://192.168.0.100",
            "--pdu-outlet",
            "1",
            "--boot-timeout-secs",
            "120",
            "--handshake-attempts",
            "5",
            "-vv",
            "--quiet",
            "recover",
            "-f",
            "fw.bin",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, Some(115200));
        assert_eq!(cli.pdu_url.as_deref(), Some("http://192.168.0.100"));
        assert_eq!(cli.pdu_outlet.as_deref(), Some("1"));
        assert_eq!(cli.boot_timeout_secs, Some(120));
        assert_eq!(cli.handshake_attempts, Some(5));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["cyflash"]).is_err());
    }

    // ---- option resolution ----

    fn minimal_cli(args: &[&str]) -> Cli {
        let mut full = vec!["cyflash"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["recover", "-f", "fw.bin"]);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_resolve_options_requires_port() {
        let cli = minimal_cli(&[]);
        let err =
            resolve_options(&cli, &Config::default(), Duration::from_secs(1), true).unwrap_err();
        assert!(err.to_string().contains("serial port"));
    }

    #[test]
    fn test_resolve_options_port_from_config() {
        let cli = minimal_cli(&[]);
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB7".to_string());

        let options = resolve_options(&cli, &config, Duration::from_secs(1), true).unwrap();
        assert_eq!(options.port, "/dev/ttyUSB7");
        assert_eq!(options.baud, cyflash::DEFAULT_BAUD);
        assert!(options.pdu.is_none());
    }

    #[test]
    fn test_resolve_options_cli_overrides_config() {
        let cli = minimal_cli(&["--port", "/dev/ttyUSB0", "--baud", "57600"]);
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyUSB7".to_string());
        config.connection.baud = Some(9600);

        let options = resolve_options(&cli, &config, Duration::from_secs(1), true).unwrap();
        assert_eq!(options.port, "/dev/ttyUSB0");
        assert_eq!(options.baud, 57600);
    }

    #[test]
    fn test_resolve_options_carries_boot_wait_choice() {
        let cli = minimal_cli(&["--port", "p"]);
        let config = Config::default();

        let provision = resolve_options(&cli, &config, Duration::from_millis(800), true).unwrap();
        let recover = resolve_options(&cli, &config, Duration::from_secs(1), false).unwrap();
        assert!(provision.await_boot);
        assert!(!recover.await_boot);
    }

    #[test]
    fn test_resolve_options_rejects_zero_handshake_attempts() {
        let cli = minimal_cli(&["--port", "p", "--handshake-attempts", "0"]);
        let err =
            resolve_options(&cli, &Config::default(), Duration::from_secs(1), true).unwrap_err();
        assert!(err.to_string().contains("handshake-attempts"));
    }

    #[test]
    fn test_resolve_pdu_requires_url_and_outlet_together() {
        let cli = minimal_cli(&["--port", "p", "--pdu-url", "http://pdu"]);
        assert!(resolve_pdu(&cli, &Config::default()).is_err());

        let cli = minimal_cli(&["--port", "p", "--pdu-url", "http://pdu", "--pdu-outlet", "1"]);
        let pdu = resolve_pdu(&cli, &Config::default()).unwrap().unwrap();
        assert_eq!(pdu.base_url, "http://pdu");
        assert_eq!(pdu.outlet, "1");
        assert_eq!(pdu.user, "");
    }
}
