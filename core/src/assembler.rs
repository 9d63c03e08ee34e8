// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use std::{fmt, io::Write, path::Path};

use crate::{
    error::ImageError,
    output::write_atomic,
    partitions::{PartitionSlot, FLASH_MAP},
    store::PartitionStore,
};

/// Raw content of a single flash partition.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionBuffer {
    pub slot: PartitionSlot,
    pub bytes: Vec<u8>,
}

/// Position of a partition within a restore image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutEntry {
    pub slot: PartitionSlot,
    pub offset: u64,
    pub size: u64,
}

impl fmt::Display for LayoutEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} bytes at {:#010x}",
            self.slot.dump_name(),
            self.size,
            self.offset
        )
    }
}

/// Full flash image to be written from sector 0.
///
/// The image consists of the partitions in ascending slot order starting
/// with the bootloader, concatenated without any padding or alignment.
#[derive(Debug)]
pub struct RestoreImage {
    partitions: Vec<PartitionBuffer>,
    total_size: u64,
}

impl RestoreImage {
    pub fn partitions(&self) -> &[PartitionBuffer] {
        &self.partitions
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns offset and size of every included partition.
    pub fn layout(&self) -> Vec<LayoutEntry> {
        let mut offset = 0;

        self.partitions
            .iter()
            .map(|partition| {
                let entry = LayoutEntry {
                    slot: partition.slot,
                    offset,
                    size: partition.bytes.len() as u64,
                };
                offset += entry.size;
                entry
            })
            .collect()
    }

    /// Write the concatenated partitions to the given writer.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        for (partition, entry) in self.partitions.iter().zip(self.layout()) {
            writer.write_all(&partition.bytes).with_context(|| {
                format!(
                    "Failed to write {} at offset {:#x}.",
                    entry.slot.dump_name(),
                    entry.offset
                )
            })?;
        }

        Ok(())
    }

    /// Write the image to a file.
    ///
    /// The layout is logged before any data is written, so failures can
    /// be attributed to an offset within the image.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        log::info!("Found {} mtdblock files:", self.partitions.len());
        for entry in self.layout() {
            log::info!("  {entry}");
        }
        log::info!("Total size: {} bytes", self.total_size);

        log::info!("Creating {}.", path.as_ref().display());
        write_atomic(path.as_ref(), |writer| self.write(writer))
            .with_context(|| format!("Failed to create {}.", path.as_ref().display()))
    }

    /// Returns the image content as one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_size as usize);
        for partition in &self.partitions {
            bytes.extend_from_slice(&partition.bytes);
        }
        bytes
    }
}

/// Assemble a restore image from partition dumps given in slot order.
///
/// The bootloader (slot 0) is mandatory. Following partitions are included
/// as long as each one is the direct successor of the previous one, the
/// assembly stops silently at the first gap, later partitions are dropped
/// even if present.
///
/// # Error
///
/// Returns `ImageError::MissingPartition` if the first partition is not slot 0.
pub fn assemble(partitions: Vec<PartitionBuffer>) -> Result<RestoreImage> {
    let mut partitions = partitions.into_iter();

    let first = match partitions.next() {
        Some(partition) if partition.slot.index == 0 => partition,
        _ => {
            return Err(ImageError::MissingPartition {
                location: "the requested partition list".to_string(),
            }
            .into())
        }
    };

    let mut total_size = first.bytes.len() as u64;
    let mut included = vec![first];

    for partition in partitions {
        let expected = included.last().map_or(0, |last| last.slot.index + 1);

        if partition.slot.index != expected {
            log::debug!(
                "mtdblock{expected} missing, stopping before {}.",
                partition.slot.dump_name()
            );
            break;
        }

        total_size += partition.bytes.len() as u64;
        included.push(partition);
    }

    Ok(RestoreImage {
        partitions: included,
        total_size,
    })
}

/// Read the partitions 0 up to `last_slot` from a store.
///
/// Reading stops at the first absent partition, later ones are not read at all.
///
/// # Error
///
/// Returns `ImageError::MissingPartition` if mtdblock0 is absent or an
/// error variant if reading a present dump fails.
pub fn load_partitions(
    store: &mut dyn PartitionStore,
    last_slot: u8,
) -> Result<Vec<PartitionBuffer>> {
    let mut partitions = Vec::new();

    for slot in FLASH_MAP.iter().take(last_slot as usize + 1) {
        match store.read(slot)? {
            Some(bytes) => {
                log::debug!("Loaded {} ({} bytes).", slot, bytes.len());
                partitions.push(PartitionBuffer { slot: *slot, bytes });
            }
            None if slot.index == 0 => {
                return Err(ImageError::MissingPartition {
                    location: store.describe(),
                }
                .into());
            }
            None => break,
        }
    }

    Ok(partitions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{partitions::slot, store::DirectoryStore};
    use std::fs;

    fn buffer(index: u8, byte: u8, len: usize) -> PartitionBuffer {
        PartitionBuffer {
            slot: slot(index).unwrap(),
            bytes: vec![byte; len],
        }
    }

    fn is_missing_partition(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ImageError>(),
            Some(ImageError::MissingPartition { .. })
        )
    }

    #[test]
    fn test_assemble_empty() {
        assert!(is_missing_partition(&assemble(vec![]).unwrap_err()));
    }

    #[test]
    fn test_assemble_without_bootloader() {
        let err = assemble(vec![buffer(1, 0xBB, 4), buffer(2, 0xCC, 4)]).unwrap_err();

        assert!(is_missing_partition(&err));
    }

    #[test]
    fn test_assemble_concatenates() {
        let image = assemble(vec![buffer(0, 0xAA, 4), buffer(1, 0xBB, 4)]).unwrap();

        assert_eq!(image.total_size(), 8);
        assert_eq!(
            image.to_bytes(),
            vec![0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]
        );
    }

    /// Partitions behind the first gap are dropped even if present.
    #[test]
    fn test_assemble_stops_at_gap() {
        for gap in 1..8u8 {
            let partitions: Vec<PartitionBuffer> = (0..8u8)
                .filter(|&i| i != gap)
                .map(|i| buffer(i, i, i as usize + 1))
                .collect();

            let image = assemble(partitions).unwrap();
            let included: Vec<u8> = image.partitions().iter().map(|p| p.slot.index).collect();

            assert_eq!(included, (0..gap).collect::<Vec<u8>>());
        }
    }

    #[test]
    fn test_layout() {
        let image = assemble(vec![
            buffer(0, 0x00, 0x10),
            buffer(1, 0x01, 0x20),
            buffer(2, 0x02, 0x30),
        ])
        .unwrap();

        let layout: Vec<(u64, u64)> = image
            .layout()
            .iter()
            .map(|entry| (entry.offset, entry.size))
            .collect();

        assert_eq!(layout, vec![(0x00, 0x10), (0x10, 0x20), (0x30, 0x30)]);
        assert_eq!(image.total_size(), 0x60);
    }

    #[test]
    fn test_load_partitions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mtdblock0"), [0xAA; 4]).unwrap();
        fs::write(dir.path().join("mtdblock1"), [0xBB; 4]).unwrap();
        fs::write(dir.path().join("mtdblock3"), [0xDD; 4]).unwrap();

        let mut store = DirectoryStore::new(dir.path());
        let partitions = load_partitions(&mut store, 7).unwrap();
        let image = assemble(partitions).unwrap();

        assert_eq!(
            image.to_bytes(),
            vec![0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]
        );

        let out = dir.path().join("full_restore_v1.0.bin");
        image.write_file(&out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), image.to_bytes());
    }

    #[test]
    fn test_load_partitions_last_slot() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            fs::write(dir.path().join(format!("mtdblock{i}")), [i as u8]).unwrap();
        }

        let mut store = DirectoryStore::new(dir.path());

        assert_eq!(load_partitions(&mut store, 6).unwrap().len(), 7);
        assert_eq!(load_partitions(&mut store, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_load_partitions_missing_bootloader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mtdblock1"), [0xBB; 4]).unwrap();

        let mut store = DirectoryStore::new(dir.path());
        let err = load_partitions(&mut store, 7).unwrap_err();

        assert!(is_missing_partition(&err));
    }
}
