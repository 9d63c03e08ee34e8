// SPDX-License-Identifier: MIT
pub mod assembler;
pub mod customize;
pub mod device;
pub mod error;
pub mod extract;
pub mod hash_sum;
pub mod logo;
pub mod output;
pub mod partitions;
pub mod patcher;
pub mod rom;
pub mod scanner;
pub mod store;
pub mod tools;

pub use assembler::{assemble, load_partitions, PartitionBuffer, RestoreImage};
pub use customize::Customization;
pub use error::ImageError;
pub use partitions::{PartitionRole, PartitionSlot, FLASH_MAP};
pub use store::{open_store, PartitionStore};
