//! Recovery flow for a device whose bootloader no longer updates normally.
//!
//! Recovery talks to a degraded console: commands are paced one character
//! at a time and the device echoes no verdicts, so every stage is
//! markerless. `restore-rom` first reloads the factory image from ROM with
//! `rdl`, then pushes the replacement bootloader.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cyflash::{PostAction, RunReport, SendMode, Stage};

use super::{RunOptions, execute};

/// Run the recovery sequence.
pub fn run(options: &RunOptions, firmware: &Path, restore_rom: bool) -> Result<RunReport> {
    let image = fs::read(firmware)
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?;
    let label = firmware
        .file_name()
        .map_or_else(|| firmware.display().to_string(), |n| n.to_string_lossy().into_owned());

    let mut stages = Vec::new();
    if restore_rom {
        stages.push(Stage::rom_restore(format!("{label} (rdl)"), image.clone()));
    }
    stages.push(firmware_push(label, image));

    execute(options, stages)
}

/// Recovery `ndl2` push: same command as the provisioning bootloader
/// stage, but per-character pacing, no verdict markers and no power cycle.
fn firmware_push(label: String, image: Vec<u8>) -> Stage {
    Stage::bootloader_update(label, image)
        .with_markers(Vec::new(), Vec::new())
        .with_send_mode(SendMode::per_char_default())
        .with_post_action(PostAction::None)
}
