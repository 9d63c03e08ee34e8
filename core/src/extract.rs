// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    customize::FIRMWARE_ROOT,
    logo::{extract_logo, LogoExtraction},
    output::write_atomic,
    partitions::{PartitionRole, PartitionSlot, FLASH_MAP},
    store::PartitionStore,
    tools::SquashfsCodec,
};

/// How an artifact was derived from its partition dump.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// Dump copied as is
    Copied,
    /// JPEG cut out of a logo partition
    Jpeg,
    /// Logo partition without JPEG, copied as is
    RawFallback,
    /// System filesystem unpacked into a directory
    Unpacked,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copied => write!(f, "copied"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::RawFallback => write!(f, "raw"),
            Self::Unpacked => write!(f, "unpacked"),
        }
    }
}

/// A file or directory created from a backup.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedArtifact {
    pub slot: PartitionSlot,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

/// Default extraction directory of a backup (eg. backup_20240101_120000_extracted).
pub fn extraction_dir<P: AsRef<Path>>(backup: P) -> PathBuf {
    let backup = backup.as_ref();
    let name = backup
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "backup".to_string());
    let name = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tar"))
        .unwrap_or(&name);

    backup.with_file_name(format!("{name}_extracted"))
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |writer: &mut dyn Write| Ok(writer.write_all(bytes)?))
        .with_context(|| format!("Failed to write {}.", path.display()))
}

/// Split a backup into its logical artifacts.
///
/// Known partitions are stored under their artifact name, logos are cut
/// out of their zero padded partitions. Unknown partitions are stored
/// as `<dump>.raw`. If a codec is given, the system filesystem is
/// additionally unpacked into `squashfs-root`, a failure to do so is
/// logged but does not fail the extraction.
///
/// Returns the created artifacts in slot order.
pub fn extract_backup(
    store: &mut dyn PartitionStore,
    output_dir: &Path,
    codec: Option<&dyn SquashfsCodec>,
) -> Result<Vec<ExtractedArtifact>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}.", output_dir.display()))?;

    log::info!(
        "Extracting {} to {}.",
        store.describe(),
        output_dir.display()
    );

    let mut artifacts = Vec::new();

    for slot in FLASH_MAP.iter() {
        let bytes = match store.read(slot)? {
            Some(bytes) => bytes,
            None => {
                log::debug!("{} not in backup, skipping.", slot.dump_name());
                continue;
            }
        };

        let (path, kind) = match (slot.role, slot.artifact_name()) {
            (PartitionRole::BootLogo | PartitionRole::ShutdownLogo, Some(name)) => {
                match extract_logo(&bytes) {
                    LogoExtraction::Jpeg(jpeg) => {
                        let path = output_dir.join(format!("{name}.jpg"));
                        write_artifact(&path, jpeg)?;
                        (path, ArtifactKind::Jpeg)
                    }
                    LogoExtraction::Raw(raw) => {
                        let path = output_dir.join(format!("{name}.raw"));
                        write_artifact(&path, raw)?;
                        (path, ArtifactKind::RawFallback)
                    }
                }
            }
            (_, Some(name)) => {
                let path = output_dir.join(name);
                write_artifact(&path, &bytes)?;
                (path, ArtifactKind::Copied)
            }
            (_, None) => {
                let path = output_dir.join(format!("{}.raw", slot.dump_name()));
                write_artifact(&path, &bytes)?;
                (path, ArtifactKind::Copied)
            }
        };

        log::info!(
            "{} -> {} ({kind}, {} bytes)",
            slot.dump_name(),
            path.display(),
            bytes.len()
        );

        let system_image = (slot.role == PartitionRole::SystemFilesystem).then(|| path.clone());
        artifacts.push(ExtractedArtifact {
            slot: *slot,
            path,
            kind,
        });

        if let (Some(codec), Some(image)) = (codec, system_image) {
            let dest_dir = output_dir.join(FIRMWARE_ROOT);

            if dest_dir.exists() {
                log::warn!("{} already exists, not unpacking.", dest_dir.display());
                continue;
            }

            match codec.unpack(&image, &dest_dir) {
                Ok(()) => {
                    log::info!("Unpacked system filesystem to {}.", dest_dir.display());
                    artifacts.push(ExtractedArtifact {
                        slot: *slot,
                        path: dest_dir,
                        kind: ArtifactKind::Unpacked,
                    });
                }
                Err(err) => log::error!("Unpacking the system filesystem failed: {err:#}"),
            }
        }
    }

    Ok(artifacts)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{store::DirectoryStore, tools::MockSquashfsCodec};
    use anyhow::anyhow;

    fn backup_dir(dumps: &[(u8, Vec<u8>)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (index, bytes) in dumps {
            fs::write(dir.path().join(format!("mtdblock{index}")), bytes).unwrap();
        }
        dir
    }

    fn logo_dump(jpeg_offset: usize) -> Vec<u8> {
        let mut dump = vec![0x00; 64];
        dump[jpeg_offset..jpeg_offset + 4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE1]);
        dump
    }

    #[test]
    fn test_extraction_dir() {
        assert_eq!(
            extraction_dir("backups/backup_20240101_120000"),
            PathBuf::from("backups/backup_20240101_120000_extracted")
        );
        assert_eq!(
            extraction_dir("backup_1.tar.gz"),
            PathBuf::from("backup_1_extracted")
        );
    }

    #[test]
    fn test_extract_backup() {
        let backup = backup_dir(&[
            (0, vec![0xAA; 8]),
            (1, vec![0xBB; 8]),
            (3, vec![0xDD; 8]),
            (4, logo_dump(16)),
            (5, vec![0x00; 64]),
            (7, vec![0x77; 2]),
        ]);
        let out = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(backup.path());

        let artifacts = extract_backup(&mut store, out.path(), None).unwrap();

        let summary: Vec<(u8, String, ArtifactKind)> = artifacts
            .iter()
            .map(|a| {
                (
                    a.slot.index,
                    a.path.file_name().unwrap().to_string_lossy().to_string(),
                    a.kind,
                )
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                (0, "uboot.bin".to_string(), ArtifactKind::Copied),
                (1, "boot.img".to_string(), ArtifactKind::Copied),
                (3, "data.jffs2".to_string(), ArtifactKind::Copied),
                (4, "boot_logo.jpg".to_string(), ArtifactKind::Jpeg),
                (5, "shutdown_logo.raw".to_string(), ArtifactKind::RawFallback),
                (7, "mtdblock7.raw".to_string(), ArtifactKind::Copied),
            ]
        );

        let jpeg = fs::read(out.path().join("boot_logo.jpg")).unwrap();
        assert_eq!(jpeg.len(), 48);
        assert_eq!(&jpeg[..3], &[0xFF, 0xD8, 0xFF]);
        assert_eq!(
            fs::read(out.path().join("shutdown_logo.raw")).unwrap(),
            vec![0x00; 64]
        );
    }

    #[test]
    fn test_extract_unpacks_system() {
        let backup = backup_dir(&[(2, b"hsqs".to_vec())]);
        let out = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(backup.path());

        let image = out.path().join("system.squashfs");
        let dest_dir = out.path().join("squashfs-root");

        let mut codec = MockSquashfsCodec::new();
        codec
            .expect_unpack()
            .withf(move |i, d| i.to_path_buf() == image && d.to_path_buf() == dest_dir)
            .times(1)
            .returning(|_, _| Ok(()));

        let artifacts = extract_backup(&mut store, out.path(), Some(&codec)).unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].kind, ArtifactKind::Unpacked);
        assert_eq!(artifacts[1].path, out.path().join("squashfs-root"));
    }

    /// A failing unpack still leaves the copied image in place.
    #[test]
    fn test_extract_unpack_failure() {
        let backup = backup_dir(&[(2, b"junk".to_vec())]);
        let out = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(backup.path());

        let mut codec = MockSquashfsCodec::new();
        codec
            .expect_unpack()
            .times(1)
            .returning(|_, _| Err(anyhow!("not a squashfs")));

        let artifacts = extract_backup(&mut store, out.path(), Some(&codec)).unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Copied);
        assert_eq!(fs::read(&artifacts[0].path).unwrap(), b"junk");
    }
}
