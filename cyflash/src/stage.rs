//! Update stages and their console-protocol constants.
//!
//! A stage is one ordered unit of the update sequence: the command that
//! opens it, an optional payload image, the token that gates the transfer,
//! the markers that classify the device's echo, and what happens afterwards.
//! Stages are built once from CLI inputs and immutable during a run.

use std::time::Duration;

use crate::handshake::SendMode;

/// Boot-log line printed once the console task accepts commands.
pub const BOOT_READY_MARKER: &str = "NOR task init done!";

/// Token echoed by the device when it is ready to receive a chunked
/// transfer.
pub const READY_TOKEN: &str = "NCCC";

/// Bootloader push command.
pub const CMD_BOOTLOADER: &str = "ndl2";

/// Restore-from-ROM push command.
pub const CMD_ROM_RESTORE: &str = "rdl";

/// Configuration push command.
pub const CMD_CONFIG: &str = "ndlcfg";

/// Boot-log substrings surfaced to the operator while waiting for
/// readiness.
pub fn diagnostic_line_filters() -> Vec<String> {
    vec![
        "Ver ".to_string(),
        "DDR Frequency".to_string(),
        "Training has run successfully".to_string(),
    ]
}

/// Kind of work a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Second-stage bootloader push.
    BootloaderUpdate,
    /// Vendor/common configuration push.
    ConfigUpdate,
    /// Serial-number / board identity write.
    IdentityUpdate,
    /// Memory frequency selection.
    FrequencySet,
    /// Post-update read-back of version and configuration.
    FinalVerify,
}

impl StageKind {
    /// Human-readable name for logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BootloaderUpdate => "bootloader-update",
            Self::ConfigUpdate => "config-update",
            Self::IdentityUpdate => "identity-update",
            Self::FrequencySet => "frequency-set",
            Self::FinalVerify => "final-verify",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action taken after a stage verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    /// Continue straight to the next stage.
    None,
    /// Power-cycle the device through the PDU outlet.
    ///
    /// Always re-triggers the readiness wait before the next stage's
    /// handshake. `reconnect` additionally recycles the host-side serial
    /// handle, which some stages require.
    PowerCycle {
        /// Reopen the serial channel after the cycle.
        reconnect: bool,
    },
}

/// One ordered unit of the update sequence.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Kind of work.
    pub kind: StageKind,
    /// Operator-facing label (e.g. the config file name).
    pub label: String,
    /// Console command that opens the stage.
    pub command: String,
    /// Opaque payload pushed over the chunked sub-protocol, if any.
    pub image: Option<Vec<u8>>,
    /// Token required in the response before the transfer may start.
    /// `None` for command-only stages.
    pub ready_token: Option<String>,
    /// Substrings whose presence in the echo means success.
    pub success_markers: Vec<String>,
    /// Substrings whose presence in the echo means failure.
    pub failure_markers: Vec<String>,
    /// Wait before reading the post-stage echo.
    pub settle_delay: Duration,
    /// What happens after verification.
    pub post_action: PostAction,
    /// How command bytes are paced onto the wire.
    pub send_mode: SendMode,
}

impl Stage {
    /// Bootloader push: `ndl2` + image, power cycle afterwards.
    pub fn bootloader_update(label: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            kind: StageKind::BootloaderUpdate,
            label: label.into(),
            command: CMD_BOOTLOADER.to_string(),
            image: Some(image),
            ready_token: Some(READY_TOKEN.to_string()),
            success_markers: vec!["successfully executed vu: ndl2 command!".to_string()],
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(1),
            post_action: PostAction::PowerCycle { reconnect: false },
            send_mode: SendMode::Line,
        }
    }

    /// Restore-from-ROM push: `rdl` + image, paced per character for the
    /// degraded console a recovery starts from. The device never echoes a
    /// verdict for this command, so the stage is markerless.
    pub fn rom_restore(label: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            kind: StageKind::BootloaderUpdate,
            label: label.into(),
            command: CMD_ROM_RESTORE.to_string(),
            image: Some(image),
            ready_token: Some(READY_TOKEN.to_string()),
            success_markers: Vec::new(),
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(1),
            post_action: PostAction::None,
            send_mode: SendMode::per_char_default(),
        }
    }

    /// Configuration push: `ndlcfg` + image. Config images are larger and
    /// the device takes noticeably longer to commit them.
    pub fn config_update(label: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            kind: StageKind::ConfigUpdate,
            label: label.into(),
            command: CMD_CONFIG.to_string(),
            image: Some(image),
            ready_token: Some(READY_TOKEN.to_string()),
            success_markers: vec!["updating success".to_string()],
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(5),
            post_action: PostAction::None,
            send_mode: SendMode::Line,
        }
    }

    /// Identity write: long literal command, paced in chunks.
    pub fn identity_update(command: impl Into<String>) -> Self {
        Self {
            kind: StageKind::IdentityUpdate,
            label: "identity".to_string(),
            command: command.into(),
            image: None,
            ready_token: None,
            success_markers: vec![
                "successfully executed vu: writematheader command!".to_string(),
            ],
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(2),
            post_action: PostAction::None,
            send_mode: SendMode::chunked_default(),
        }
    }

    /// Frequency selection: markerless command stage, power cycle with a
    /// channel reconnect afterwards.
    pub fn frequency_set(mhz: u32) -> Self {
        Self {
            kind: StageKind::FrequencySet,
            label: format!("cfgfreq {mhz}"),
            command: format!("cfgfreq {mhz}"),
            image: None,
            ready_token: None,
            success_markers: Vec::new(),
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(2),
            post_action: PostAction::PowerCycle { reconnect: true },
            send_mode: SendMode::chunked_default(),
        }
    }

    /// Final verification read: markerless, echo retained for the operator.
    pub fn final_verify(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            kind: StageKind::FinalVerify,
            label: command.clone(),
            command,
            image: None,
            ready_token: None,
            success_markers: Vec::new(),
            failure_markers: Vec::new(),
            settle_delay: Duration::from_secs(2),
            post_action: PostAction::None,
            send_mode: SendMode::chunked_default(),
        }
    }

    /// Override the post action.
    #[must_use]
    pub fn with_post_action(mut self, post_action: PostAction) -> Self {
        self.post_action = post_action;
        self
    }

    /// Override the send mode.
    #[must_use]
    pub fn with_send_mode(mut self, send_mode: SendMode) -> Self {
        self.send_mode = send_mode;
        self
    }

    /// Override the marker sets.
    #[must_use]
    pub fn with_markers(mut self, success: Vec<String>, failure: Vec<String>) -> Self {
        self.success_markers = success;
        self.failure_markers = failure;
        self
    }

    /// Override the settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

/// Classification of one stage's echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A success marker was present (or the stage is markerless).
    Success,
    /// A failure marker was present, or no marker at all.
    Failure,
    /// The readiness wait or handshake bound elapsed.
    Timeout,
}

/// Result of one verified stage. Immutable once produced.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage kind.
    pub kind: StageKind,
    /// Stage label.
    pub label: String,
    /// Classified outcome.
    pub outcome: Outcome,
    /// Raw echoed text, always retained for operator display.
    pub echoed: String,
}
