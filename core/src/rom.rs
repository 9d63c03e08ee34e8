// SPDX-License-Identifier: MIT
use anyhow::{anyhow, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    customize::{info_config_paths, BuildSettings},
    error::ImageError,
    hash_sum::{verify_sidecar, write_sidecar},
    partitions::SYSTEM_FLASH_OFFSET,
    patcher::patch_file,
    tools::{FelFlasher, SquashfsCodec},
};

/// Name prefix of system images
pub static SYSTEM_IMAGE_PREFIX: &str = "system_v";
/// Name prefix of full restore images
pub static RESTORE_IMAGE_PREFIX: &str = "full_restore_v";

/// File name of the system image of a version (eg. system_v1.2.bin).
pub fn system_image_name(version: &str) -> String {
    format!("{SYSTEM_IMAGE_PREFIX}{version}.bin")
}

/// File name of the full restore image of a version.
pub fn restore_image_name(version: &str) -> String {
    format!("{RESTORE_IMAGE_PREFIX}{version}.bin")
}

/// Request to build a system image from a firmware tree.
pub struct BuildRequest<'a> {
    /// Unpacked firmware tree (squashfs-root)
    pub root: &'a Path,
    pub settings: &'a BuildSettings,
    /// Build date, formatted as YYYYMMDD
    pub date: &'a str,
    pub output_dir: &'a Path,
    /// mksquashfs exclude list, used if it exists
    pub exclude_list: Option<&'a Path>,
}

/// Build a system image.
///
/// Writes the firmware information into the firmware tree, encodes the
/// tree and writes a checksum file next to the image. The image is only
/// moved into place once the encoder succeeded.
///
/// Returns the path of the created image.
pub fn build_rom(request: &BuildRequest, codec: &dyn SquashfsCodec) -> Result<PathBuf> {
    request.settings.validate()?;

    if !request.root.is_dir() {
        return Err(anyhow!(
            "Firmware tree {} does not exist. Extract a backup first.",
            request.root.display()
        ));
    }

    let rules = request.settings.rules(request.date);
    for path in info_config_paths(request.root) {
        patch_file(&path, &rules)?;
    }

    fs::create_dir_all(request.output_dir)
        .with_context(|| format!("Failed to create {}.", request.output_dir.display()))?;

    let name = system_image_name(&request.settings.version);
    let image = request.output_dir.join(&name);
    let staging = tempfile::Builder::new()
        .prefix(".build")
        .tempdir_in(request.output_dir)
        .context("Failed to create staging directory.")?;
    let staged_image = staging.path().join(&name);

    let exclude_list = request
        .exclude_list
        .filter(|list| list.is_file())
        .map(Path::to_path_buf);

    log::info!("Building {}.", image.display());
    codec.pack(request.root, &staged_image, exclude_list)?;

    fs::rename(&staged_image, &image)
        .with_context(|| format!("Failed to move image into place at {}.", image.display()))?;

    let hash_sum = write_sidecar(&image)?;
    let size = fs::metadata(&image)
        .with_context(|| format!("Failed to stat {}.", image.display()))?
        .len();

    log::info!("Built {} ({size} bytes, SHA-256 {hash_sum}).", image.display());

    Ok(image)
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .with_context(|| format!("Failed to stat {}.", path.display()))?
        .len())
}

/// Verify the image and write it to the flash at the given offset.
fn flash_image(image: &Path, offset: u64, flasher: &dyn FelFlasher) -> Result<()> {
    if !image.is_file() {
        return Err(anyhow!("Image {} does not exist.", image.display()));
    }

    verify_sidecar(image)?;

    log::info!("Flashing {} at {offset:#x}.", image.display());
    flasher.spiflash_write(offset, image)?;

    log::info!("Resetting device.");
    flasher.reset()
}

/// Flash a system image into the system partition of a device in FEL mode.
///
/// If a dump of the system partition is given as reference, the image
/// has to be smaller than the dump, as it would overwrite the
/// following partitions otherwise.
///
/// # Error
///
/// Returns `ImageError::ImageTooLarge` before anything is written if the
/// image does not fit, `ImageError::ChecksumMismatch` if the image does
/// not match its checksum file.
pub fn flash_system(
    image: &Path,
    reference_dump: Option<&Path>,
    flasher: &dyn FelFlasher,
) -> Result<()> {
    if let Some(reference) = reference_dump {
        let actual = file_size(image)?;
        let capacity = file_size(reference)?;

        log::info!(
            "Image size {actual} bytes, partition size {capacity} bytes ({}).",
            reference.display()
        );

        if actual >= capacity {
            return Err(ImageError::ImageTooLarge {
                path: image.to_path_buf(),
                actual,
                capacity,
            }
            .into());
        }
    } else {
        log::warn!("No reference dump given, skipping size check.");
    }

    flash_image(image, SYSTEM_FLASH_OFFSET, flasher)
}

/// Flash a full restore image from sector 0 of a device in FEL mode.
pub fn flash_restore(image: &Path, flasher: &dyn FelFlasher) -> Result<()> {
    flash_image(image, 0, flasher)
}

/// Returns the lexicographically last `<prefix>*.bin` file of a directory.
pub fn latest_image<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read {}.", dir.display()))?;

    let mut latest: Option<(String, PathBuf)> = None;

    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}.", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();

        if !name.starts_with(prefix) || !name.ends_with(".bin") || !entry.path().is_file() {
            continue;
        }

        if latest.as_ref().map_or(true, |(last, _)| name > *last) {
            latest = Some((name, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}
