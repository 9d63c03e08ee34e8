// SPDX-License-Identifier: MIT
use std::fmt;

/// Number of flash partitions of the device
pub const NUM_SLOTS: usize = 8;
/// Size of the boot and shutdown logo partitions
pub const LOGO_PARTITION_SIZE: usize = 0x20000;
/// SPI flash offset of the system filesystem partition (used by FEL flashing)
pub const SYSTEM_FLASH_OFFSET: u64 = 0x2C0000;
/// Prefix of the raw partition dumps and device nodes
pub static MTDBLOCK_PREFIX: &str = "mtdblock";
/// Directory holding the partition device nodes on the device
pub static DEVICE_BLOCK_DIR: &str = "/dev/block";

/// Logical content of a flash partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionRole {
    /// U-Boot
    Bootloader,
    /// Android style boot image holding kernel and ramdisk
    BootImage,
    /// Read-only squashfs system
    SystemFilesystem,
    /// jffs2 user data
    UserData,
    /// JPEG shown while booting
    BootLogo,
    /// JPEG shown while shutting down
    ShutdownLogo,
    /// Unused or vendor specific
    Reserved,
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootloader => write!(f, "uboot"),
            Self::BootImage => write!(f, "boot.img"),
            Self::SystemFilesystem => write!(f, "squashfs system"),
            Self::UserData => write!(f, "jffs2 data"),
            Self::BootLogo => write!(f, "boot logo"),
            Self::ShutdownLogo => write!(f, "shutdown logo"),
            Self::Reserved => write!(f, "reserved"),
        }
    }
}

/// A single entry of the device flash map.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionSlot {
    /// mtdblock index
    pub index: u8,
    /// Content of the partition
    pub role: PartitionRole,
    /// Size contract of the partition, if any
    pub fixed_size: Option<usize>,
}

impl PartitionSlot {
    const fn new(index: u8, role: PartitionRole, fixed_size: Option<usize>) -> Self {
        Self {
            index,
            role,
            fixed_size,
        }
    }

    /// File name of the raw dump of this partition within a backup (eg. mtdblock2).
    pub fn dump_name(&self) -> String {
        format!("{}{}", MTDBLOCK_PREFIX, self.index)
    }

    /// Device node of this partition on the camera.
    pub fn device_path(&self) -> String {
        format!("{}/{}", DEVICE_BLOCK_DIR, self.dump_name())
    }

    /// Name of the artifact an extracted dump is stored as.
    ///
    /// Logos return their base name only, as the extension depends on
    /// whether a JPEG could be found within the dump.
    pub fn artifact_name(&self) -> Option<&'static str> {
        match self.role {
            PartitionRole::Bootloader => Some("uboot.bin"),
            PartitionRole::BootImage => Some("boot.img"),
            PartitionRole::SystemFilesystem => Some("system.squashfs"),
            PartitionRole::UserData => Some("data.jffs2"),
            PartitionRole::BootLogo => Some("boot_logo"),
            PartitionRole::ShutdownLogo => Some("shutdown_logo"),
            PartitionRole::Reserved => None,
        }
    }
}

impl fmt::Display for PartitionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.dump_name(), self.role)
    }
}

/// Flash layout of the camera, indexed by mtdblock number.
pub static FLASH_MAP: [PartitionSlot; NUM_SLOTS] = [
    PartitionSlot::new(0, PartitionRole::Bootloader, None),
    PartitionSlot::new(1, PartitionRole::BootImage, None),
    PartitionSlot::new(2, PartitionRole::SystemFilesystem, None),
    PartitionSlot::new(3, PartitionRole::UserData, None),
    PartitionSlot::new(4, PartitionRole::BootLogo, Some(LOGO_PARTITION_SIZE)),
    PartitionSlot::new(5, PartitionRole::ShutdownLogo, Some(LOGO_PARTITION_SIZE)),
    PartitionSlot::new(6, PartitionRole::Reserved, None),
    PartitionSlot::new(7, PartitionRole::Reserved, None),
];

/// Look up the slot holding the given content.
///
/// Roles occurring more than once (reserved) resolve to the lowest index.
pub fn slot_for_role(role: PartitionRole) -> PartitionSlot {
    let index = match role {
        PartitionRole::Bootloader => 0,
        PartitionRole::BootImage => 1,
        PartitionRole::SystemFilesystem => 2,
        PartitionRole::UserData => 3,
        PartitionRole::BootLogo => 4,
        PartitionRole::ShutdownLogo => 5,
        PartitionRole::Reserved => 6,
    };

    FLASH_MAP[index]
}

/// Look up the role of the given mtdblock index.
pub fn role_for_slot(index: u8) -> Option<PartitionRole> {
    slot(index).map(|slot| slot.role)
}

/// Look up the slot of the given mtdblock index.
pub fn slot(index: u8) -> Option<PartitionSlot> {
    FLASH_MAP.get(index as usize).copied()
}
