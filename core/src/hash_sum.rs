// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use hex::FromHex;
use ring::digest::{Context as DigestContext, SHA256};
use std::{
    ffi::OsString,
    fmt,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use crate::{error::ImageError, output::write_atomic};

/// Extension of checksum files stored next to generated images
pub static SIDECAR_EXTENSION: &str = "sha256";

/// SHA-256 hash sum of an image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HashSum([u8; 32]);

impl HashSum {
    /// Construct a new hash sum over the content of the given file.
    ///
    /// The file is streamed through the digest, so images of any size
    /// can be hashed without loading them into memory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open {} for hashing.", path.as_ref().display()))?;

        let mut hash_ctx = DigestContext::new(&SHA256);
        let mut buf: [u8; 0x2000] = [0x00; 0x2000];

        loop {
            let bytes_read = file.read(&mut buf[..])?;
            if bytes_read == 0 {
                break;
            }

            hash_ctx.update(&buf[..bytes_read]);
        }

        Ok(HashSum(hash_ctx.finish().as_ref().try_into()?))
    }

    /// Parse a hex encoded hash sum.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();

        Ok(HashSum(<[u8; 32]>::from_hex(hex).with_context(|| {
            format!("Invalid hash sum {hex} (should be 64 hex digits).")
        })?))
    }
}

impl fmt::Display for HashSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Path of the checksum file belonging to an image.
pub fn sidecar_path<P: AsRef<Path>>(image: P) -> PathBuf {
    let mut name = OsString::from(image.as_ref().as_os_str());
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Write a sha256sum compatible checksum file next to the image.
pub fn write_sidecar<P: AsRef<Path>>(image: P) -> Result<HashSum> {
    let image = image.as_ref();
    let hash_sum = HashSum::from_file(image)?;
    let file_name = image
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    write_atomic(sidecar_path(image), |writer: &mut dyn Write| {
        Ok(writeln!(writer, "{hash_sum}  {file_name}")?)
    })
    .with_context(|| format!("Failed to write checksum file for {}.", image.display()))?;

    log::debug!("SHA-256 of {}: {hash_sum}", image.display());

    Ok(hash_sum)
}

/// Verify an image against its checksum file.
///
/// Returns false if there is no checksum file to check against.
///
/// # Error
///
/// Returns an error variant if the checksum file is malformed or
/// the checksums differ.
pub fn verify_sidecar<P: AsRef<Path>>(image: P) -> Result<bool> {
    let image = image.as_ref();
    let sidecar = sidecar_path(image);

    if !sidecar.exists() {
        log::info!("No checksum file for {}, skipping verification.", image.display());
        return Ok(false);
    }

    let content = fs::read_to_string(&sidecar)
        .with_context(|| format!("Failed to read {}.", sidecar.display()))?;
    let expected = HashSum::from_hex(
        content
            .split_whitespace()
            .next()
            .with_context(|| format!("Checksum file {} is empty.", sidecar.display()))?,
    )?;
    let actual = HashSum::from_file(image)?;

    if expected != actual {
        return Err(ImageError::ChecksumMismatch {
            path: image.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into());
    }

    log::info!("Checksum of {} verified.", image.display());

    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;

    static EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        let hash_sum = HashSum::from_file(&path).unwrap();

        assert_eq!(hash_sum.to_string(), EMPTY_SHA256);
        assert_eq!(HashSum::from_hex(EMPTY_SHA256).unwrap(), hash_sum);
        assert_eq!(
            HashSum::from_hex(&format!(" {}\n", EMPTY_SHA256.to_uppercase())).unwrap(),
            hash_sum
        );
    }

    #[test]
    fn test_invalid_hex() {
        assert!(HashSum::from_hex("c0ffd00d").is_err());
        assert!(HashSum::from_hex("not a hash").is_err());
        assert!(HashSum::from_hex(&format!("{EMPTY_SHA256}00")).is_err());
    }

    /// A sign in front of the digest is corruption, not a valid hex digit.
    #[test]
    fn test_signed_hex() {
        let signed = format!("+{}", &EMPTY_SHA256[1..]);

        assert_eq!(signed.len(), 64);
        assert!(HashSum::from_hex(&signed).is_err());
    }

    #[test]
    fn test_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("system_v1.0.bin");
        fs::write(&image, b"squashfs").unwrap();

        assert!(!verify_sidecar(&image).unwrap());

        let hash_sum = write_sidecar(&image).unwrap();
        let content = fs::read_to_string(dir.path().join("system_v1.0.bin.sha256")).unwrap();

        assert_eq!(content, format!("{hash_sum}  system_v1.0.bin\n"));
        assert!(verify_sidecar(&image).unwrap());

        fs::write(&image, b"tampered").unwrap();
        let err = verify_sidecar(&image).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ImageError>(),
            Some(ImageError::ChecksumMismatch { .. })
        ));
    }
}
