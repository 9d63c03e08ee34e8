// SPDX-License-Identifier: MIT
use anyhow::Result;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A file or directory within its own temporary directory.
///
/// The temporary directory is removed together with the fixture.
pub struct Fixture {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl Fixture {
    /// Creates a new fixture, the path itself is not created.
    pub fn new(filename: &str) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(filename);

        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a new fixture file with the given content.
    pub fn with_content<C: AsRef<[u8]>>(filename: &str, content: C) -> Result<Self> {
        let fixture = Fixture::new(filename);
        fs::write(&fixture.path, content)?;
        Ok(fixture)
    }

    /// Creates a new empty fixture directory.
    pub fn dir(dirname: &str) -> Result<Self> {
        let fixture = Fixture::new(dirname);
        fs::create_dir_all(&fixture.path)?;
        Ok(fixture)
    }

    /// Creates a backup directory holding the given partition dumps.
    pub fn backup(dumps: &[(u8, &[u8])]) -> Result<Self> {
        let fixture = Fixture::dir("backup_20240101_120000")?;
        for (index, bytes) in dumps {
            fs::write(fixture.path.join(format!("mtdblock{index}")), bytes)?;
        }
        Ok(fixture)
    }

    /// Creates a file next to the fixture.
    pub fn sibling<C: AsRef<[u8]>>(&self, filename: &str, content: C) -> Result<PathBuf> {
        let path = self.parent_dir().join(filename);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Directory containing the fixture.
    pub fn parent_dir(&self) -> &Path {
        self._temp_dir.path()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Ensure files get dropped as soon as not needed anymore
impl Deref for Fixture {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path.deref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backup_fixture() {
        let backup = Fixture::backup(&[(0, &[0xAA]), (2, &[0xCC, 0xCC])]).unwrap();

        assert_eq!(fs::read(backup.join("mtdblock0")).unwrap(), vec![0xAA]);
        assert_eq!(fs::read(backup.join("mtdblock2")).unwrap(), vec![0xCC, 0xCC]);
        assert!(!backup.join("mtdblock1").exists());
    }

    #[test]
    fn test_fixture_cleanup() {
        let fixture = Fixture::with_content("logo.jpg", [0xFF, 0xD8, 0xFF]).unwrap();
        let parent = fixture.parent_dir().to_path_buf();

        assert!(fixture.path().is_file());
        drop(fixture);
        assert!(!parent.exists());
    }
}
