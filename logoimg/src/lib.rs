// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use v3rom_core::{
    logo::{encode_logo, extract_logo, LogoExtraction},
    output::write_atomic,
    partitions::LOGO_PARTITION_SIZE,
    scanner::{find_marker, JPEG_SOI},
};

/// Suffix of padded logo images next to their source
static PADDED_SUFFIX: &str = "_padded";

/// Helper function to determine the default output of a source image
fn padded_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = input
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    input.with_file_name(format!("{stem}{PADDED_SUFFIX}{extension}"))
}

/// Clap command line arguments
#[derive(Parser, Debug)]
#[command(version, about, long_about=None, arg_required_else_help=true)]
pub struct CliArguments {
    /// Turn on more detailed information
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Turn on debugging information (-v is ignored if set)
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Application commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Pad a JPEG to the size of a logo partition
    Image {
        /// JPEG image to be shown by the camera
        #[arg(short, long, value_name = "JPEG")]
        input: PathBuf,
        /// Path of the generated partition image (default: <JPEG>_padded.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Size of the logo partition
        #[arg(short, long, default_value_t = LOGO_PARTITION_SIZE)]
        size: usize,
    },
    /// Extract the JPEG of a logo partition dump
    Extract {
        /// Raw dump of a logo partition (mtdblock4 or mtdblock5)
        #[arg(short = 'i', long, value_name = "DUMP")]
        dump: PathBuf,
        /// Path of the extracted image without extension, .jpg or .raw is appended
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Pads a JPEG with zeros to the size of a logo partition.
fn image(input: &Path, output: &Option<PathBuf>, size: usize) -> Result<()> {
    let output = match output {
        Some(path) => path.clone(),
        None => padded_path(input),
    };

    let source =
        fs::read(input).with_context(|| format!("Failed to read logo {}.", input.display()))?;

    if find_marker(&source, JPEG_SOI) != Some(0) {
        log::warn!(
            "{} does not start with a JPEG header, the camera may not show it.",
            input.display()
        );
    }

    let padded = encode_logo(&source, size)
        .with_context(|| format!("Logo {} does not fit.", input.display()))?;

    log::info!(
        "Padding {} ({} bytes) to {size} bytes.",
        input.display(),
        source.len()
    );

    write_atomic(&output, |writer: &mut dyn Write| Ok(writer.write_all(&padded)?))
        .with_context(|| format!("Failed to write logo image {}.", output.display()))
}

/// Extracts the JPEG of a logo partition dump.
///
/// Dumps without JPEG are kept as raw file.
fn extract(dump: &Path, output: &Path) -> Result<()> {
    let raw =
        fs::read(dump).with_context(|| format!("Failed to read dump {}.", dump.display()))?;

    let (bytes, extension) = match extract_logo(&raw) {
        LogoExtraction::Jpeg(jpeg) => (jpeg, "jpg"),
        LogoExtraction::Raw(raw) => (raw, "raw"),
    };

    let mut file_name = output.as_os_str().to_os_string();
    file_name.push(".");
    file_name.push(extension);
    let path = PathBuf::from(file_name);

    log::info!("Writing {} ({} bytes).", path.display(), bytes.len());

    write_atomic(&path, |writer: &mut dyn Write| Ok(writer.write_all(bytes)?))
        .with_context(|| format!("Failed to write {}.", path.display()))?;

    println!("{}", path.display());

    Ok(())
}

/// Main application function
///
/// This function is seperated into its own compile unit
/// in order to allow testing the final binary.
pub fn app(cli_args: CliArguments) -> Result<()> {
    match &cli_args.command {
        Commands::Image {
            input,
            output,
            size,
        } => image(input, output, *size),
        Commands::Extract { dump, output } => extract(dump, output),
    }
}
