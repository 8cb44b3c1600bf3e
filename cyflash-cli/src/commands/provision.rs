//! Full provisioning sequence: bootloader, configurations, identity,
//! frequency, verification reads.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cyflash::{RunReport, Stage};

use super::{RunOptions, execute};

/// Provisioning inputs resolved from the CLI.
pub struct ProvisionArgs<'a> {
    /// Second-stage bootloader image.
    pub bl: &'a Path,
    /// Configuration images, applied in order.
    pub cfgs: Vec<&'a Path>,
    /// Board serial number; `None` skips the identity stage.
    pub sn: Option<&'a str>,
    /// Memory frequency in MHz.
    pub freq: u32,
}

/// Commands issued after the last power cycle to read back what the update
/// produced.
const VERIFY_COMMANDS: &[&str] = &["ver", "readmatheader", "showcfginfo"];

/// Run the full provisioning sequence.
pub fn run(options: &RunOptions, args: &ProvisionArgs<'_>) -> Result<RunReport> {
    let bl_image = read_image(args.bl)?;
    let mut stages = vec![Stage::bootloader_update(file_label(args.bl), bl_image)];

    for path in &args.cfgs {
        stages.push(Stage::config_update(file_label(path), read_image(path)?));
    }

    if let Some(sn) = args.sn {
        stages.push(Stage::identity_update(identity_command(sn)));
    }

    stages.push(Stage::frequency_set(args.freq));
    for command in VERIFY_COMMANDS {
        stages.push(Stage::final_verify(*command));
    }

    execute(options, stages)
}

/// Board identity written to the mat header. Only the serial number varies
/// per unit; the remaining fields identify the board family.
fn identity_command(sn: &str) -> String {
    format!("writematheader {sn} opn-1 MCM500 A1 ScaleFlux Cypress")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
