//! Geometry derived once from the superblock.

use crate::parse_error_to_dig;
use dig_error::Result;
use dig_ondisk::Ext2Superblock;
use dig_types::{GroupNumber, InodeNumber, inode_index_in_group, inode_to_group};
use serde::{Deserialize, Serialize};

/// Pre-computed ext2 geometry.
///
/// Computed at session open so that the component scanners never re-derive
/// these values per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Geometry {
    /// Block size in bytes.
    pub block_size: u32,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    /// On-disk inode record size (128 on revision 0).
    pub inode_size: u16,
    /// First non-reserved inode (11 on revision 0).
    pub first_ino: u32,
    /// `ceil(blocks_count / blocks_per_group)`.
    pub groups_count: u32,
    /// `blocks_count % blocks_per_group`; zero when the last group is full.
    pub block_remainder: u32,
    /// `inodes_count % inodes_per_group`; zero when the last group is full.
    pub inode_remainder: u32,
}

impl Ext2Geometry {
    /// Derive geometry from a parsed superblock.
    ///
    /// Fails when the geometry would make the scan divide by zero.
    pub fn from_superblock(sb: &Ext2Superblock) -> Result<Self> {
        sb.validate_geometry().map_err(|e| parse_error_to_dig(&e))?;
        Ok(Self {
            block_size: sb.block_size,
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            inode_size: sb.effective_inode_size(),
            first_ino: sb.effective_first_ino(),
            groups_count: sb.blocks_count.div_ceil(sb.blocks_per_group),
            block_remainder: sb.blocks_count % sb.blocks_per_group,
            inode_remainder: sb.inodes_count % sb.inodes_per_group,
        })
    }

    #[must_use]
    pub fn is_last_group(&self, group: GroupNumber) -> bool {
        group.0.checked_add(1) == Some(self.groups_count)
    }

    /// Effective block count of one group.
    ///
    /// Only the last group takes the remainder, and only when it is non-zero.
    #[must_use]
    pub fn blocks_in_group(&self, group: GroupNumber) -> u32 {
        if self.is_last_group(group) && self.block_remainder != 0 {
            self.block_remainder
        } else {
            self.blocks_per_group
        }
    }

    /// Effective inode count of one group (same rule as blocks).
    #[must_use]
    pub fn inodes_in_group(&self, group: GroupNumber) -> u32 {
        if self.is_last_group(group) && self.inode_remainder != 0 {
            self.inode_remainder
        } else {
            self.inodes_per_group
        }
    }

    /// Byte offset of a block.
    #[must_use]
    pub fn block_offset(&self, block: u32) -> u64 {
        u64::from(block) * u64::from(self.block_size)
    }

    /// Number of 4-byte pointers in one indirect block.
    #[must_use]
    pub fn pointers_per_block(&self) -> u32 {
        self.block_size / 4
    }

    /// Owning group and index within that group's inode table.
    #[must_use]
    pub fn inode_location(&self, ino: InodeNumber) -> (GroupNumber, u32) {
        (
            inode_to_group(ino, self.inodes_per_group),
            inode_index_in_group(ino, self.inodes_per_group),
        )
    }

    /// Byte offset of an inode record given its group's inode table block.
    #[must_use]
    pub fn inode_offset(&self, inode_table: u32, index: u32) -> u64 {
        self.block_offset(inode_table) + u64::from(index) * u64::from(self.inode_size)
    }

    /// Logical block offsets covered by the single, double and triple
    /// indirect slots: `12`, `12 + P`, `12 + P + P²`.
    #[must_use]
    pub fn indirect_bases(&self) -> [u64; 3] {
        let p = u64::from(self.pointers_per_block());
        let single = dig_types::EXT2_NDIR_BLOCKS as u64;
        let double = single + p;
        let triple = double + p * p;
        [single, double, triple]
    }
}
