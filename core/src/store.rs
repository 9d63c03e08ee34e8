// SPDX-License-Identifier: MIT
use anyhow::{anyhow, Context, Result};
use flate2::{bufread::GzDecoder, write::GzEncoder, Compression};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
};
use tar::{Archive, Builder};

use crate::{
    output::write_atomic,
    partitions::{PartitionSlot, FLASH_MAP},
};

/// Source of raw partition dumps.
///
/// A store maps flash slots to the raw dump taken from the device,
/// slots without a dump are reported as None.
pub trait PartitionStore {
    /// Read the complete dump of a slot.
    fn read(&mut self, slot: &PartitionSlot) -> Result<Option<Vec<u8>>>;

    /// Human readable location of the store used in messages.
    fn describe(&self) -> String;
}

/// Backup directory containing the files mtdblock0 to mtdblock7.
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the dump of the given slot.
    pub fn dump_path(&self, slot: &PartitionSlot) -> PathBuf {
        self.dir.join(slot.dump_name())
    }
}

impl PartitionStore for DirectoryStore {
    fn read(&mut self, slot: &PartitionSlot) -> Result<Option<Vec<u8>>> {
        let path = self.dump_path(slot);

        if !path.is_file() {
            return Ok(None);
        }

        fs::read(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}.", path.display()))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Tar archive of a backup directory.
///
/// The archive may be compressed using the gzip compression algorithm,
/// which is detected by the magic bytes of the file. Entries are matched by
/// their file name, so archives containing the backup directory itself work
/// as well as flat ones.
pub struct ArchiveStore {
    path: PathBuf,
}

impl ArchiveStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Open the archive for a single pass over its entries.
    fn open(&self) -> Result<Archive<Box<dyn BufRead>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open backup archive {}.", self.path.display()))?;
        let mut stream: Box<dyn BufRead> = Box::new(BufReader::new(file));

        let tar: Box<dyn BufRead> = if is_gzipped(stream.as_mut())? {
            Box::new(BufReader::new(GzDecoder::new(stream)))
        } else {
            stream
        };

        Ok(Archive::new(tar))
    }
}

impl PartitionStore for ArchiveStore {
    fn read(&mut self, slot: &PartitionSlot) -> Result<Option<Vec<u8>>> {
        let dump_name = slot.dump_name();
        let mut archive = self.open()?;

        for entry in archive
            .entries()
            .context("Accessing the backup archive failed.")?
        {
            let mut entry = entry.context("Reading the backup archive failed.")?;

            let matches = entry
                .path()
                .context("Invalid path within backup archive.")?
                .file_name()
                .map_or(false, |name| name == dump_name.as_str());

            if matches && entry.header().entry_type().is_file() {
                let size = entry.size();
                let mut bytes = Vec::with_capacity(size.min(MAX_PREALLOCATION) as usize);
                entry
                    .read_to_end(&mut bytes)
                    .with_context(|| format!("Failed to extract {dump_name} from archive."))?;

                if bytes.len() as u64 != size {
                    return Err(anyhow!(
                        "{dump_name} is truncated in archive {} ({} of {size} bytes).",
                        self.path.display(),
                        bytes.len()
                    ));
                }

                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Open the store matching the given path.
///
/// Directories are treated as backup directories, files as backup archives.
pub fn open_store<P: AsRef<Path>>(path: P) -> Box<dyn PartitionStore> {
    if path.as_ref().is_dir() {
        Box::new(DirectoryStore::new(path))
    } else {
        Box::new(ArchiveStore::new(path))
    }
}

/// Pack all partition dumps of a backup directory into a gzip compressed tar archive.
///
/// Returns the number of archived dumps.
pub fn archive_backup<P, Q>(dir: P, output: Q) -> Result<usize>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let store = DirectoryStore::new(dir);
    let mut archived = 0;

    write_atomic(output.as_ref(), |writer| {
        let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));

        for slot in FLASH_MAP.iter() {
            let path = store.dump_path(slot);
            if !path.is_file() {
                continue;
            }

            log::debug!("Archiving {}.", path.display());
            builder
                .append_path_with_name(&path, slot.dump_name())
                .with_context(|| format!("Failed to archive {}.", path.display()))?;
            archived += 1;
        }

        builder.into_inner()?.finish()?;
        Ok(())
    })?;

    log::info!(
        "Archived {archived} partitions to {}.",
        output.as_ref().display()
    );

    Ok(archived)
}

/// Upper bound of the buffer reserved up front for an archived dump
const MAX_PREALLOCATION: u64 = 64 << 20;

/// Checks if the stream is gzip compressed.
///
/// Returns true if the first two bytes of the given stream
/// match the two bytes 0x1F and 0x8B, which is the header
/// of a gzip compressed file.
fn is_gzipped<R>(reader: &mut R) -> io::Result<bool>
where
    R: ?Sized + BufRead,
{
    // fill_buf does not consume the read bytes, which is perfect for this test
    Ok(reader.fill_buf()?.starts_with(&[0x1f, 0x8b]))
}
