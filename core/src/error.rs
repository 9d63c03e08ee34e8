// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the image pipeline that an operator has to act upon.
///
/// These are wrapped into `anyhow::Error` by the operations returning them,
/// callers which need to distinguish them use `downcast_ref::<ImageError>()`.
#[derive(Error, Debug)]
pub enum ImageError {
    /// The bootloader dump (slot 0) is mandatory for restore images.
    #[error("Mandatory partition mtdblock0 is missing in {location}.")]
    MissingPartition { location: String },

    /// A logo does not fit into its fixed size partition.
    #[error("Logo payload of {actual} bytes exceeds the partition capacity of {capacity} bytes.")]
    PayloadTooLarge { actual: usize, capacity: usize },

    /// No JPEG start of image marker has been found within a logo dump.
    #[error("No JPEG start of image marker found.")]
    MarkerNotFound,

    /// A config file is not part of the current firmware tree.
    #[error("Config file {} does not exist.", .path.display())]
    ConfigFileAbsent { path: PathBuf },

    /// An image does not fit into the partition it should be flashed to.
    #[error("Image {} is too large: {actual} >= {capacity} bytes.", .path.display())]
    ImageTooLarge {
        path: PathBuf,
        actual: u64,
        capacity: u64,
    },

    /// The SHA-256 sidecar of an image does not match its content.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}.", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// An external tool terminated unsuccessfully.
    #[error("{tool} failed with {status}.")]
    ToolFailed { tool: String, status: String },

    /// No device answered on the ADB transport.
    #[error("No device connected via ADB.")]
    NoDevice,
}
