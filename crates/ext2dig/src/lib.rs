#![forbid(unsafe_code)]
//! ext2dig public API facade.
//!
//! Re-exports the scan engine together with the device, error and on-disk
//! types its signatures mention. The CLI and the harness depend on this
//! crate only.

pub use dig_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use dig_error::{DigError, Result};
pub use dig_ondisk::{Ext2GroupDesc, Ext2Inode, Ext2Superblock, InodeKind};
pub use dig_scan::*;
pub use dig_types::{GroupNumber, InodeNumber};
