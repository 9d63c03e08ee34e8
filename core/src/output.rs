// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use std::{
    fs::{self, Permissions},
    io::{BufWriter, Write},
    path::Path,
};
use tempfile::NamedTempFile;

/// Mode of newly created output files
#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o644;

/// Permissions the destination ends up with.
///
/// Existing files keep their permissions, new files get the usual
/// mode of regular files instead of the private mode of temp files.
fn target_permissions(path: &Path) -> Result<Option<Permissions>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(new_file_permissions()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read permissions of {}.", path.display()))
        }
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;

    Some(Permissions::from_mode(NEW_FILE_MODE))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<Permissions> {
    None
}

/// Write a file in one go without ever exposing a partially written file.
///
/// The content is written into a temporary file within the destination
/// directory, flushed to disk and renamed onto the destination afterwards.
/// If writing fails the temporary file is removed and an already existing
/// destination file stays untouched. The permissions of an existing
/// destination are carried over to the new file.
pub fn write_atomic<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let permissions = target_permissions(path)?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}.", dir.display()))?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}.", path.display()))?;
    }

    if let Some(permissions) = permissions {
        temp.as_file()
            .set_permissions(permissions)
            .with_context(|| format!("Failed to set permissions of {}.", path.display()))?;
    }

    temp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}.", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to move output into place at {}.", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::anyhow;
    use std::fs;

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        write_atomic(&path, |w| Ok(w.write_all(&[0xAA; 4])?)).unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![0xAA; 4]);
    }

    /// A failing writer must neither leave a file behind nor touch an existing one.
    #[test]
    fn test_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.bin");
        let existing = dir.path().join("existing.bin");
        fs::write(&existing, b"old").unwrap();

        for path in [&fresh, &existing] {
            let result = write_atomic(path, |w| {
                w.write_all(b"partial")?;
                Err(anyhow!("disk full"))
            });
            assert!(result.is_err());
        }

        assert!(!fresh.exists());
        assert_eq!(fs::read(&existing).unwrap(), b"old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.bin");
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, Permissions::from_mode(0o755)).unwrap();

        write_atomic(&fresh, |w| Ok(w.write_all(b"new")?)).unwrap();
        write_atomic(&script, |w| Ok(w.write_all(b"#!/bin/sh\nexit 0\n")?)).unwrap();

        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&fresh), 0o644);
        assert_eq!(mode(&script), 0o755);
    }
}
