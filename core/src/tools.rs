// SPDX-License-Identifier: MIT

//! External programs the image pipeline delegates to.
//!
//! Squashfs encoding, the ADB transport and FEL flashing are not reimplemented
//! but invoked as processes. Each capability is a trait, so operations can be
//! exercised without the programs being installed.
use anyhow::{Context, Result};
use std::{
    env,
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use crate::error::ImageError;

/// Override for the mksquashfs location
pub static MKSQUASHFS_ENV: &str = "V3ROM_MKSQUASHFS";
/// Override for the unsquashfs location
pub static UNSQUASHFS_ENV: &str = "V3ROM_UNSQUASHFS";
/// Override for the adb location
pub static ADB_ENV: &str = "V3ROM_ADB";
/// Override for the sunxi-fel location
pub static SUNXI_FEL_ENV: &str = "V3ROM_SUNXI_FEL";
/// Location of sunxi-fel when built from source next to the tool
pub static SUNXI_FEL_LOCAL: &str = "sunxi-tools/sunxi-fel";

/// Filesystem codec turning a directory tree into a compressed image and back.
#[cfg_attr(test, mockall::automock)]
pub trait SquashfsCodec {
    /// Encode `source_dir` into `image`, leaving out the paths listed in `exclude_list`.
    fn pack(&self, source_dir: &Path, image: &Path, exclude_list: Option<PathBuf>) -> Result<()>;

    /// Decode `image` into the not yet existing directory `dest_dir`.
    fn unpack(&self, image: &Path, dest_dir: &Path) -> Result<()>;
}

/// Byte stream transport to fixed paths on the device.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceTransport {
    /// Returns true if a device is ready for transfers.
    fn is_connected(&self) -> Result<bool>;

    /// Copy a file from the device.
    fn pull(&self, device_path: &str, local: &Path) -> Result<()>;

    /// Copy a file onto the device.
    fn push(&self, local: &Path, device_path: &str) -> Result<()>;

    /// Run a shell command on the device.
    fn shell(&self, command: &str) -> Result<()>;
}

/// Raw SPI flash access of a device in FEL mode.
#[cfg_attr(test, mockall::automock)]
pub trait FelFlasher {
    /// Write an image to the SPI flash starting at `offset`.
    fn spiflash_write(&self, offset: u64, image: &Path) -> Result<()>;

    /// Reset the device using the watchdog.
    fn reset(&self) -> Result<()>;
}

/// An external program.
#[derive(Clone, Debug, PartialEq)]
pub struct Tool {
    /// Name used in messages
    pub name: &'static str,
    /// Program to execute, either a path or a name looked up in PATH
    pub program: PathBuf,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Tool {
    /// Locate a program, preferring the location given by an environment variable.
    pub fn locate(name: &'static str, env_var: &str) -> Self {
        let program = env::var_os(env_var)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(name));

        Self { name, program }
    }

    /// Returns the resolved location of the program, if it can be found.
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }

        env::var_os("PATH").and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(&self.program))
                .find(|candidate| candidate.is_file())
        })
    }

    /// Run the program and return its standard output.
    ///
    /// The output is logged line by line.
    ///
    /// # Error
    ///
    /// Returns an error variant if the program cannot be started or
    /// returns unsuccessfully.
    pub fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args);

        log::debug!("Executing {command:?}.");

        let output = command.output().with_context(|| {
            format!(
                "Failed to execute {} ({}). Is it installed?",
                self.name,
                self.program.display()
            )
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        for line in stdout.lines() {
            log::info!("{}: {line}", self.name);
        }

        if !output.status.success() {
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                log::error!("{}: {line}", self.name);
            }

            return Err(ImageError::ToolFailed {
                tool: self.name.to_string(),
                status: output.status.to_string(),
            }
            .into());
        }

        Ok(stdout)
    }
}

/// squashfs-tools (mksquashfs and unsquashfs).
pub struct SquashfsTools {
    pub mksquashfs: Tool,
    pub unsquashfs: Tool,
}

impl Default for SquashfsTools {
    fn default() -> Self {
        Self {
            mksquashfs: Tool::locate("mksquashfs", MKSQUASHFS_ENV),
            unsquashfs: Tool::locate("unsquashfs", UNSQUASHFS_ENV),
        }
    }
}

impl SquashfsCodec for SquashfsTools {
    fn pack(&self, source_dir: &Path, image: &Path, exclude_list: Option<PathBuf>) -> Result<()> {
        let mut args = vec![
            source_dir.as_os_str(),
            image.as_os_str(),
            OsStr::new("-comp"),
            OsStr::new("xz"),
            OsStr::new("-no-xattrs"),
            OsStr::new("-noappend"),
        ];

        if let Some(exclude_list) = &exclude_list {
            log::info!("Using exclusions from {}.", exclude_list.display());
            args.push(OsStr::new("-ef"));
            args.push(exclude_list.as_os_str());
        }

        self.mksquashfs.run(args).map(|_| ())
    }

    fn unpack(&self, image: &Path, dest_dir: &Path) -> Result<()> {
        self.unsquashfs
            .run([OsStr::new("-d"), dest_dir.as_os_str(), image.as_os_str()])
            .map(|_| ())
    }
}

/// Android debug bridge.
pub struct Adb {
    pub tool: Tool,
}

impl Default for Adb {
    fn default() -> Self {
        Self {
            tool: Tool::locate("adb", ADB_ENV),
        }
    }
}

/// Returns true if the output of `adb devices` lists a ready device.
fn lists_ready_device(devices: &str) -> bool {
    devices
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .any(|line| line.split_whitespace().nth(1) == Some("device"))
}

impl DeviceTransport for Adb {
    fn is_connected(&self) -> Result<bool> {
        let devices = self.tool.run(["devices"])?;
        Ok(lists_ready_device(&devices))
    }

    fn pull(&self, device_path: &str, local: &Path) -> Result<()> {
        self.tool
            .run([OsStr::new("pull"), OsStr::new(device_path), local.as_os_str()])
            .map(|_| ())
    }

    fn push(&self, local: &Path, device_path: &str) -> Result<()> {
        self.tool
            .run([OsStr::new("push"), local.as_os_str(), OsStr::new(device_path)])
            .map(|_| ())
    }

    fn shell(&self, command: &str) -> Result<()> {
        self.tool.run(["shell", command]).map(|_| ())
    }
}

/// sunxi-fel of the sunxi-tools.
pub struct SunxiFel {
    pub tool: Tool,
}

impl Default for SunxiFel {
    fn default() -> Self {
        let mut tool = Tool::locate("sunxi-fel", SUNXI_FEL_ENV);

        if env::var_os(SUNXI_FEL_ENV).is_none() && Path::new(SUNXI_FEL_LOCAL).is_file() {
            tool.program = PathBuf::from(SUNXI_FEL_LOCAL);
        }

        Self { tool }
    }
}

impl FelFlasher for SunxiFel {
    fn spiflash_write(&self, offset: u64, image: &Path) -> Result<()> {
        let offset = offset.to_string();

        self.tool
            .run([
                OsStr::new("-p"),
                OsStr::new("spiflash-write"),
                OsStr::new(&offset),
                image.as_os_str(),
            ])
            .map(|_| ())
    }

    fn reset(&self) -> Result<()> {
        self.tool.run(["wdreset"]).map(|_| ())
    }
}

/// Returns all external programs used by the tools.
pub fn all_tools() -> Vec<Tool> {
    let squashfs = SquashfsTools::default();

    vec![
        squashfs.mksquashfs,
        squashfs.unsquashfs,
        Adb::default().tool,
        SunxiFel::default().tool,
    ]
}

/// Check which external programs are available.
///
/// Returns each program together with its resolved location.
pub fn check_tools() -> Vec<(Tool, Option<PathBuf>)> {
    all_tools()
        .into_iter()
        .map(|tool| {
            let location = tool.resolve();
            (tool, location)
        })
        .collect()
}
