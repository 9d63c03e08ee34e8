// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    error::ImageError,
    logo::LogoPayload,
    output::write_atomic,
    partitions::{slot_for_role, PartitionRole, PartitionSlot, FLASH_MAP, LOGO_PARTITION_SIZE},
    tools::DeviceTransport,
};

/// Writable directory on the device used for transfers
pub static DEVICE_STAGING_DIR: &str = "/data";

/// Name of a backup directory taken at the given time (YYYYmmdd_HHMMSS).
pub fn backup_dir_name(timestamp: &str) -> String {
    format!("backup_{timestamp}")
}

/// Result of a device backup.
#[derive(Debug, Default, PartialEq)]
pub struct BackupReport {
    pub saved: Vec<PartitionSlot>,
    pub failed: Vec<PartitionSlot>,
}

/// Pull all partitions of the connected device into a backup directory.
///
/// A partition failing to transfer is logged and skipped, the backup
/// continues with the next one.
///
/// # Error
///
/// Returns `ImageError::NoDevice` if no device is connected.
pub fn backup_device(transport: &dyn DeviceTransport, dir: &Path) -> Result<BackupReport> {
    if !transport.is_connected()? {
        return Err(ImageError::NoDevice.into());
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}.", dir.display()))?;
    log::info!("Backing up to {}.", dir.display());

    let mut report = BackupReport::default();

    for slot in FLASH_MAP.iter() {
        let local = dir.join(slot.dump_name());

        match transport.pull(&slot.device_path(), &local) {
            Ok(()) => {
                log::info!("Saved {slot}.");
                report.saved.push(*slot);
            }
            Err(err) => {
                log::error!("Failed to back up {slot}: {err:#}");
                report.failed.push(*slot);
            }
        }
    }

    log::info!(
        "Backup finished, {} of {} partitions saved.",
        report.saved.len(),
        FLASH_MAP.len()
    );

    Ok(report)
}

/// A logo ready to be written to the device.
struct EncodedLogo {
    slot: PartitionSlot,
    file_name: &'static str,
    bytes: Vec<u8>,
}

/// Shell command writing a pushed logo into its partition.
pub fn logo_write_command(file_name: &str, slot: &PartitionSlot) -> String {
    format!(
        "toolbox dd if={DEVICE_STAGING_DIR}/{file_name} of={} bs={LOGO_PARTITION_SIZE} && sync",
        slot.device_path()
    )
}

/// Flash boot and shutdown logo over the device transport.
///
/// Both logos are encoded up front, so an oversized logo aborts the
/// operation before anything is written to the device. Each logo is
/// written to a temporary file within `workdir`, pushed to the device
/// and copied into its partition from there.
///
/// Returns the number of flashed logos.
pub fn flash_logos(
    transport: &dyn DeviceTransport,
    boot_logo: Option<&Path>,
    shutdown_logo: Option<&Path>,
    workdir: &Path,
) -> Result<usize> {
    let mut logos = Vec::new();

    for (source, role, file_name) in [
        (boot_logo, PartitionRole::BootLogo, "boot_logo_padded.jpg"),
        (
            shutdown_logo,
            PartitionRole::ShutdownLogo,
            "shutdown_logo_padded.jpg",
        ),
    ] {
        let source = match source {
            Some(source) => source,
            None => continue,
        };

        let source_bytes =
            fs::read(source).with_context(|| format!("Failed to read {}.", source.display()))?;
        let bytes = LogoPayload::new(source_bytes)
            .encode()
            .with_context(|| format!("Logo {} does not fit.", source.display()))?;

        logos.push(EncodedLogo {
            slot: slot_for_role(role),
            file_name,
            bytes,
        });
    }

    if logos.is_empty() {
        log::warn!("No logo given, nothing to flash.");
        return Ok(0);
    }

    if !transport.is_connected()? {
        return Err(ImageError::NoDevice.into());
    }

    for logo in &logos {
        let local: PathBuf = workdir.join(logo.file_name);
        write_atomic(&local, |writer: &mut dyn Write| Ok(writer.write_all(&logo.bytes)?))?;

        let result = push_logo(transport, &local, logo);

        if let Err(err) = fs::remove_file(&local) {
            log::warn!("Failed to remove {}: {err}", local.display());
        }

        result?;
    }

    Ok(logos.len())
}

fn push_logo(transport: &dyn DeviceTransport, local: &Path, logo: &EncodedLogo) -> Result<()> {
    log::info!("Flashing {} to {}.", logo.file_name, logo.slot);

    transport.push(local, &format!("{DEVICE_STAGING_DIR}/"))?;
    transport.shell(&logo_write_command(logo.file_name, &logo.slot))
}
