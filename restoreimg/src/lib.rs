// SPDX-License-Identifier: MIT

//! This generates a full flash restore image from a partition backup of the camera.
//!
//! A backup consists of the raw dumps mtdblock0 to mtdblock7 taken from the
//! device, either as directory or as (gzip compressed) tar archive. The restore
//! image is the concatenation of these dumps starting with the bootloader and
//! is written to the SPI flash at offset 0 using FEL mode.
//!
//! Only consecutive dumps are included, the image ends before the first
//! missing partition. A checksum file is written next to the image and
//! verified before flashing.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use v3rom_core::{hash_sum::write_sidecar, rom::restore_image_name, *};

/// Last partition included by default, mtdblock7 is not part of a restore
const DEFAULT_LAST_SLOT: u8 = 6;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(version, about, long_about=None, arg_required_else_help=true)]
pub struct CliArguments {
    /// Turn on more detailed information
    #[arg(short, long)]
    pub verbose: bool,

    /// Turn on debugging information (-v is ignored if set)
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Application commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Print out the layout of the restore image that would be generated
    Print {
        /// Backup directory or archive containing the mtdblock dumps
        #[arg(short, long, value_name = "BACKUP_PATH")]
        backup: PathBuf,
        /// Last partition to include
        #[arg(short, long, default_value_t = DEFAULT_LAST_SLOT, value_parser = clap::value_parser!(u8).range(0..8))]
        last_slot: u8,
    },
    /// Create a restore image from the given backup
    Image {
        /// Backup directory or archive containing the mtdblock dumps
        #[arg(short, long, value_name = "BACKUP_PATH")]
        backup: PathBuf,
        /// Version used in the image name
        #[arg(short, long = "rom-version", value_name = "VERSION")]
        rom_version: String,
        /// Last partition to include
        #[arg(short, long, default_value_t = DEFAULT_LAST_SLOT, value_parser = clap::value_parser!(u8).range(0..8))]
        last_slot: u8,
        /// Path of the generated image file (default: full_restore_v<VERSION>.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Load the partitions of a backup and assemble them.
fn load_image(backup: &Path, last_slot: u8) -> Result<RestoreImage> {
    log::info!("Loading the partition backup from {}.", backup.display());

    let mut store = open_store(backup);
    let partitions = load_partitions(store.as_mut(), last_slot)
        .with_context(|| format!("Reading backup {} failed.", backup.display()))?;

    assemble(partitions).context("Assembling restore image failed.")
}

/// Prints out the layout of the restore image that would be generated.
///
/// This does not save the image to a file.
fn print(backup: &Path, last_slot: u8) -> Result<()> {
    let image = load_image(backup, last_slot)?;

    for entry in image.layout() {
        println!("{entry}");
    }
    println!("Total size: {} bytes", image.total_size());

    Ok(())
}

/// Generates a restore image and its checksum file.
fn image(backup: &Path, rom_version: &str, last_slot: u8, output: &Option<PathBuf>) -> Result<()> {
    let image_path = match output {
        Some(path) => path.clone(),
        None => PathBuf::from(restore_image_name(rom_version)),
    };

    let image = load_image(backup, last_slot)?;
    image.write_file(&image_path)?;

    let hash_sum = write_sidecar(&image_path)?;
    log::info!("SHA-256 of {}: {hash_sum}", image_path.display());

    Ok(())
}

/// Main application containing
pub fn app(cli_args: CliArguments) -> Result<()> {
    match &cli_args.command {
        Commands::Print { backup, last_slot } => print(backup, *last_slot),
        Commands::Image {
            backup,
            rom_version,
            last_slot,
            output,
        } => image(backup, rom_version, *last_slot, output),
    }
}
