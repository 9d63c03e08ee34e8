// SPDX-License-Identifier: MIT

//! This is a firmware tool for Allwinner V3 based action cameras
//!
//! The camera firmware lives in eight partitions of a SPI flash. Partitions are
//! backed up over ADB while the camera is running, the squashfs system partition
//! is unpacked into a firmware tree which is customized and packed into a new
//! system image. New images are written using FEL mode, which works even if the
//! firmware on the device no longer boots.
//!
//! Flashing in a nutshell:
//! Take a backup first, it is the only way back. A system image must be smaller
//! than the system partition of the backup, a full restore image always starts
//! with the bootloader of the backup.
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::{
    env, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use v3rom_core::{
    customize::{
        apply_customization, CustomizeRequest, Customization, DEFAULT_EXCLUDE_LIST, FIRMWARE_ROOT,
    },
    device::{backup_device, backup_dir_name, flash_logos},
    extract::{extract_backup, extraction_dir},
    rom::{
        build_rom, flash_restore, flash_system, latest_image, BuildRequest, RESTORE_IMAGE_PREFIX,
        SYSTEM_IMAGE_PREFIX,
    },
    store::{archive_backup, open_store},
    tools::{check_tools, Adb, SquashfsCodec, SquashfsTools, SunxiFel},
};

/// Default path of the log file
pub const DEFAULT_LOG_FILE: &str = "v3rom.log";

/// Format of the build date written into the firmware information
const BUILD_DATE_FORMAT: &str = "%Y%m%d";
/// Format of the timestamp within backup names
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Parser, Debug)]
#[command(version, about, long_about=None, arg_required_else_help=true)]
pub struct CliArguments {
    /// Turn on more detailed information
    #[arg(short, long)]
    pub verbose: bool,

    /// Turn on debugging information (-v is ignored if set)
    #[arg(short, long)]
    pub debug: bool,

    /// Log file receiving warnings and errors
    #[arg(short, long, value_name = "LOG_PATH", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that the external tools are installed
    Deps,
    /// Back up all partitions of the connected camera over ADB
    Backup {
        /// Directory the backup directory is created in
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
        /// Additionally pack the backup into a tar.gz archive
        #[arg(short, long)]
        archive: bool,
    },
    /// Pack a backup directory into a tar.gz archive
    Archive {
        /// Backup directory containing the mtdblock dumps
        #[arg(short, long, value_name = "BACKUP_DIR")]
        backup: PathBuf,
        /// Path of the archive (default: <BACKUP_DIR>.tar.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Split a backup into bootloader, kernel, system, data and logos
    Extract {
        /// Backup directory or archive containing the mtdblock dumps
        #[arg(short, long, value_name = "BACKUP_PATH")]
        backup: PathBuf,
        /// Output directory (default: <BACKUP_PATH>_extracted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Unpack the system filesystem into squashfs-root
        #[arg(short, long)]
        unpack: bool,
    },
    /// Unpack a system image into a firmware tree
    Unpack {
        /// System image, eg. an extracted system.squashfs
        #[arg(short, long, value_name = "IMAGE")]
        image: PathBuf,
        /// Firmware tree to be created
        #[arg(short, long, default_value = FIRMWARE_ROOT)]
        root: PathBuf,
        /// Replace an existing firmware tree
        #[arg(short, long)]
        force: bool,
    },
    /// Apply a customization profile to a firmware tree
    Customize {
        /// Customization profile (JSON)
        #[arg(short, long, value_name = "PROFILE")]
        profile: PathBuf,
        /// Firmware tree to be customized
        #[arg(short, long, default_value = FIRMWARE_ROOT)]
        root: PathBuf,
        /// Additional paths to leave out when debloating, one per line
        #[arg(short, long, value_name = "EXCLUDE_FILE")]
        exclude: Option<PathBuf>,
        /// Exclude list handed to mksquashfs
        #[arg(long, default_value = DEFAULT_EXCLUDE_LIST)]
        exclude_list: PathBuf,
    },
    /// Customize a firmware tree and build a system image from it
    Build {
        /// Customization profile (JSON) including the build settings
        #[arg(short, long, value_name = "PROFILE")]
        profile: PathBuf,
        /// Firmware tree to be built
        #[arg(short, long, default_value = FIRMWARE_ROOT)]
        root: PathBuf,
        /// Directory the image is created in
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
        /// Build date as YYYYMMDD (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Additional paths to leave out when debloating, one per line
        #[arg(short, long, value_name = "EXCLUDE_FILE")]
        exclude: Option<PathBuf>,
        /// Exclude list handed to mksquashfs
        #[arg(long, default_value = DEFAULT_EXCLUDE_LIST)]
        exclude_list: PathBuf,
    },
    /// Flash a system image using FEL mode
    Flash {
        /// System image (default: latest system_v*.bin within --dir)
        #[arg(short, long, value_name = "IMAGE")]
        image: Option<PathBuf>,
        /// Directory searched for the latest system image
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// mtdblock2 of a backup, the image has to be smaller
        #[arg(short, long, value_name = "MTDBLOCK2")]
        reference: Option<PathBuf>,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Flash a full restore image using FEL mode
    Restore {
        /// Restore image (default: latest full_restore_v*.bin within --dir)
        #[arg(short, long, value_name = "IMAGE")]
        image: Option<PathBuf>,
        /// Directory searched for the latest restore image
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Flash boot and shutdown logo over ADB
    Logos {
        /// JPEG shown while booting
        #[arg(short, long, value_name = "JPEG")]
        boot: Option<PathBuf>,
        /// JPEG shown while shutting down
        #[arg(short, long, value_name = "JPEG")]
        shutdown: Option<PathBuf>,
    },
}

/// Ask the user to confirm a destructive operation.
///
/// Without a terminal on stdin there is nobody to ask, so
/// the operation is only confirmed by passing `--yes`.
fn confirm(question: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }

    if unsafe { libc::isatty(libc::STDIN_FILENO) } == 0 {
        return Err(anyhow!(
            "{question} Not running interactively, pass --yes to confirm."
        ));
    }

    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read answer.")?;

    match answer.trim() {
        "y" | "Y" | "yes" => Ok(()),
        _ => Err(anyhow!("Aborted.")),
    }
}

/// Returns the given build date or today.
fn build_date(date: &Option<String>) -> Result<String> {
    match date {
        Some(date) => {
            NaiveDate::parse_from_str(date, BUILD_DATE_FORMAT)
                .with_context(|| format!("Invalid build date {date}, expected YYYYMMDD."))?;
            Ok(date.clone())
        }
        None => Ok(Local::now().format(BUILD_DATE_FORMAT).to_string()),
    }
}

/// Prints the location of all external tools
fn deps() -> Result<()> {
    log::debug!("Checking external tools.");

    let mut missing = 0;

    for (tool, location) in check_tools() {
        match location {
            Some(path) => println!("{:<12} {}", tool.name, path.display()),
            None => {
                println!("{:<12} missing", tool.name);
                missing += 1;
            }
        }
    }

    if missing > 0 {
        log::warn!(
            "{missing} tools are missing. squashfs-tools and adb are available as packages, \
             sunxi-fel is built from the sunxi-tools sources."
        );
    }

    Ok(())
}

/// Backs up the connected camera
fn backup(output_dir: &Path, archive: bool) -> Result<()> {
    let timestamp = Local::now().format(BACKUP_TIMESTAMP_FORMAT).to_string();
    let dir = output_dir.join(backup_dir_name(&timestamp));

    let report = backup_device(&Adb::default(), &dir)?;

    if report.saved.is_empty() {
        return Err(anyhow!("No partition could be backed up."));
    }

    println!("{}", dir.display());

    if archive {
        let mut output = dir.clone().into_os_string();
        output.push(".tar.gz");
        archive_backup(&dir, PathBuf::from(output))?;
    }

    Ok(())
}

/// Packs a backup directory
fn archive(backup: &Path, output: &Option<PathBuf>) -> Result<()> {
    if !backup.is_dir() {
        return Err(anyhow!("Backup {} is not a directory.", backup.display()));
    }

    let output = match output {
        Some(path) => path.clone(),
        None => {
            let mut output = backup.as_os_str().to_os_string();
            output.push(".tar.gz");
            PathBuf::from(output)
        }
    };

    let archived = archive_backup(backup, &output)?;
    if archived == 0 {
        log::warn!("{} contains no partition dumps.", backup.display());
    }

    Ok(())
}

/// Extracts a backup into its artifacts
fn extract(backup: &Path, output: &Option<PathBuf>, unpack: bool) -> Result<()> {
    if !backup.exists() {
        return Err(anyhow!("Backup {} does not exist.", backup.display()));
    }

    let output_dir = match output {
        Some(path) => path.clone(),
        None => extraction_dir(backup),
    };

    let squashfs = SquashfsTools::default();
    let codec = unpack.then_some(&squashfs as &dyn SquashfsCodec);

    let mut store = open_store(backup);
    let artifacts = extract_backup(store.as_mut(), &output_dir, codec)?;

    if artifacts.is_empty() {
        log::warn!("{} contains no partition dumps.", backup.display());
    }

    for artifact in artifacts {
        println!("{} {}", artifact.kind, artifact.path.display());
    }

    Ok(())
}

/// Unpacks a system image
fn unpack(image: &Path, root: &Path, force: bool) -> Result<()> {
    if root.exists() {
        if !force {
            return Err(anyhow!(
                "{} already exists, use --force to replace it.",
                root.display()
            ));
        }

        log::info!("Removing {}.", root.display());
        fs::remove_dir_all(root)
            .with_context(|| format!("Failed to remove {}.", root.display()))?;
    }

    SquashfsTools::default().unpack(image, root)
}

/// Loads a customization profile
fn load_profile(profile: &Path) -> Result<Customization> {
    log::info!("Loading the customization profile from {}.", profile.display());
    Customization::new(profile)
}

/// Applies a profile to a firmware tree
fn customize(
    customization: &Customization,
    root: &Path,
    exclude: &Option<PathBuf>,
    exclude_list: &Path,
) -> Result<()> {
    if !root.is_dir() {
        return Err(anyhow!(
            "Firmware tree {} does not exist. Extract a backup first.",
            root.display()
        ));
    }

    apply_customization(&CustomizeRequest {
        root,
        customization,
        exclude_list,
        user_exclude: exclude.as_deref(),
    })
    .with_context(|| format!("Failed to customize {}.", root.display()))
}

/// Customizes a firmware tree and builds the system image
fn build(
    profile: &Path,
    root: &Path,
    output_dir: &Path,
    date: &Option<String>,
    exclude: &Option<PathBuf>,
    exclude_list: &Path,
) -> Result<()> {
    let date = build_date(date)?;
    let customization = load_profile(profile)?;
    let settings = customization
        .build
        .as_ref()
        .with_context(|| format!("Profile {} lacks build settings.", profile.display()))?;
    settings.validate()?;

    customize(&customization, root, exclude, exclude_list)?;

    let image = build_rom(
        &BuildRequest {
            root,
            settings,
            date: &date,
            output_dir,
            exclude_list: Some(exclude_list),
        },
        &SquashfsTools::default(),
    )?;

    println!("{}", image.display());

    Ok(())
}

/// Returns the given image or the latest one within the directory
fn select_image(image: &Option<PathBuf>, dir: &Path, prefix: &str) -> Result<PathBuf> {
    match image {
        Some(image) => Ok(image.clone()),
        None => latest_image(dir, prefix)?.with_context(|| {
            format!("No {prefix}*.bin found in {}, build one first.", dir.display())
        }),
    }
}

/// Flashes a system image
fn flash(image: &Option<PathBuf>, dir: &Path, reference: &Option<PathBuf>, yes: bool) -> Result<()> {
    let image = select_image(image, dir, SYSTEM_IMAGE_PREFIX)?;

    log::info!("The camera has to be connected in FEL mode.");
    confirm(&format!("Flash {} to the system partition?", image.display()), yes)?;

    flash_system(&image, reference.as_deref(), &SunxiFel::default())?;

    println!("Flashed {}, the camera is rebooting.", image.display());

    Ok(())
}

/// Flashes a full restore image
fn restore(image: &Option<PathBuf>, dir: &Path, yes: bool) -> Result<()> {
    let image = select_image(image, dir, RESTORE_IMAGE_PREFIX)?;

    log::info!("The camera has to be connected in FEL mode.");
    confirm(
        &format!("Overwrite the whole flash with {}?", image.display()),
        yes,
    )?;

    flash_restore(&image, &SunxiFel::default())?;

    println!("Restored {}, the camera is rebooting.", image.display());

    Ok(())
}

/// Flashes the logos
fn logos(boot: &Option<PathBuf>, shutdown: &Option<PathBuf>) -> Result<()> {
    if boot.is_none() && shutdown.is_none() {
        return Err(anyhow!("No logo given, use --boot and/or --shutdown."));
    }

    let flashed = flash_logos(
        &Adb::default(),
        boot.as_deref(),
        shutdown.as_deref(),
        &env::temp_dir(),
    )?;

    println!("Flashed {flashed} logos, reboot the camera to see them.");

    Ok(())
}

/// Main application containing
pub fn app(cli_args: CliArguments) -> Result<()> {
    match &cli_args.command {
        Some(Commands::Deps) => deps(),
        Some(Commands::Backup {
            output_dir,
            archive: pack,
        }) => backup(output_dir, *pack),
        Some(Commands::Archive { backup, output }) => archive(backup, output),
        Some(Commands::Extract {
            backup,
            output,
            unpack: unpack_system,
        }) => extract(backup, output, *unpack_system),
        Some(Commands::Unpack { image, root, force }) => unpack(image, root, *force),
        Some(Commands::Customize {
            profile,
            root,
            exclude,
            exclude_list,
        }) => customize(&load_profile(profile)?, root, exclude, exclude_list),
        Some(Commands::Build {
            profile,
            root,
            output_dir,
            date,
            exclude,
            exclude_list,
        }) => build(profile, root, output_dir, date, exclude, exclude_list),
        Some(Commands::Flash {
            image,
            dir,
            reference,
            yes,
        }) => flash(image, dir, reference, *yes),
        Some(Commands::Restore { image, dir, yes }) => restore(image, dir, *yes),
        Some(Commands::Logos { boot, shutdown }) => logos(boot, shutdown),
        None => Ok(()),
    }
}
