//! Scan session: superblock and group descriptor table, read once.

use crate::bitmap::scan_bitmaps;
use crate::geometry::Ext2Geometry;
use crate::inode::walk_inodes;
use crate::record::{GroupRecord, Record, SuperblockRecord};
use crate::sink::RecordSink;
use crate::{ScanOptions, parse_error_to_dig};
use dig_block::{ByteDevice, FileByteDevice};
use dig_error::{DigError, Result};
use dig_ondisk::{Ext2GroupDesc, Ext2Superblock, parse_group_desc_table};
use dig_types::{EXT2_GROUP_DESC_SIZE, GroupNumber};
use std::path::Path;
use tracing::{debug, info};

/// An opened ext2 image, ready to scan.
///
/// Opening reads the superblock and the whole group descriptor table; any
/// failure there is fatal. The session then holds both for its lifetime and
/// never reads them again.
///
/// ```ignore
/// let session = ScanSession::open_path("disk.img", ScanOptions::default())?;
/// let mut streams = RecordStreams::new();
/// session.scan(&mut streams)?;
/// ```
pub struct ScanSession<D: ByteDevice> {
    dev: D,
    superblock: Ext2Superblock,
    geometry: Ext2Geometry,
    groups: Vec<Ext2GroupDesc>,
    options: ScanOptions,
}

impl<D: ByteDevice> std::fmt::Debug for ScanSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("geometry", &self.geometry)
            .field("groups", &self.groups.len())
            .field("options", &self.options)
            .field("dev_len", &self.dev.len_bytes())
            .finish_non_exhaustive()
    }
}

impl ScanSession<FileByteDevice> {
    /// Open the image at `path` read-only.
    pub fn open_path(path: impl AsRef<Path>, options: ScanOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path)?;
        Self::open(dev, options)
    }
}

impl<D: ByteDevice> ScanSession<D> {
    /// Read the superblock and group descriptor table from `dev`.
    pub fn open(dev: D, options: ScanOptions) -> Result<Self> {
        let region = dig_block::read_ext2_superblock_region(&dev)?;
        let superblock =
            Ext2Superblock::parse_superblock_region(&region).map_err(|e| parse_error_to_dig(&e))?;
        if !options.skip_validation {
            superblock
                .validate_format()
                .map_err(|e| parse_error_to_dig(&e))?;
        }
        let geometry = Ext2Geometry::from_superblock(&superblock)?;
        let groups = read_group_table(&dev, &superblock, &geometry)?;

        info!(
            block_size = geometry.block_size,
            blocks = geometry.blocks_count,
            inodes = geometry.inodes_count,
            groups = geometry.groups_count,
            "opened ext2 image"
        );
        Ok(Self {
            dev,
            superblock,
            geometry,
            groups,
            options,
        })
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn geometry(&self) -> &Ext2Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn groups(&self) -> &[Ext2GroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// The SUPERBLOCK row.
    #[must_use]
    pub fn superblock_record(&self) -> SuperblockRecord {
        SuperblockRecord {
            blocks_count: self.geometry.blocks_count,
            inodes_count: self.geometry.inodes_count,
            block_size: self.geometry.block_size,
            inode_size: self.geometry.inode_size,
            blocks_per_group: self.geometry.blocks_per_group,
            inodes_per_group: self.geometry.inodes_per_group,
            first_ino: self.geometry.first_ino,
        }
    }

    /// One GROUP row per descriptor, with remainder-adjusted counts.
    #[must_use]
    pub fn group_records(&self) -> Vec<GroupRecord> {
        (0_u32..)
            .zip(&self.groups)
            .map(|(index, desc)| GroupRecord {
                group: index,
                blocks_in_group: self.geometry.blocks_in_group(GroupNumber(index)),
                inodes_in_group: self.geometry.inodes_in_group(GroupNumber(index)),
                free_blocks: desc.free_blocks_count,
                free_inodes: desc.free_inodes_count,
                block_bitmap: desc.block_bitmap,
                inode_bitmap: desc.inode_bitmap,
                inode_table: desc.inode_table,
            })
            .collect()
    }

    /// Emit the SUPERBLOCK row and every GROUP row.
    pub fn emit_summary(&self, sink: &mut dyn RecordSink) -> Result<()> {
        sink.accept(Record::Superblock(self.superblock_record()))?;
        for group in self.group_records() {
            sink.accept(Record::Group(group))?;
        }
        Ok(())
    }

    /// Emit every BFREE row, then every IFREE row.
    pub fn scan_bitmaps(&self, sink: &mut dyn RecordSink) -> Result<()> {
        scan_bitmaps(&self.dev, &self.geometry, &self.groups, sink)
    }

    /// Emit INODE rows, each followed by its DIRENT and INDIRECT rows.
    pub fn walk_inodes(&self, sink: &mut dyn RecordSink) -> Result<()> {
        walk_inodes(&self.dev, &self.geometry, &self.groups, &self.options, sink)
    }

    /// Run the whole extraction in scan order.
    pub fn scan(&self, sink: &mut dyn RecordSink) -> Result<()> {
        self.emit_summary(sink)?;
        self.scan_bitmaps(sink)?;
        self.walk_inodes(sink)?;
        debug!("scan complete");
        Ok(())
    }
}

/// Read the packed descriptor table that follows the superblock's block.
fn read_group_table(
    dev: &dyn ByteDevice,
    superblock: &Ext2Superblock,
    geometry: &Ext2Geometry,
) -> Result<Vec<Ext2GroupDesc>> {
    let count = usize::try_from(geometry.groups_count)
        .map_err(|_| DigError::InvalidGeometry(format!("groups_count {}", geometry.groups_count)))?;
    let offset = superblock
        .group_desc_table_offset()
        .ok_or_else(|| DigError::InvalidGeometry("group descriptor table offset overflow".into()))?;
    let len = count
        .checked_mul(EXT2_GROUP_DESC_SIZE)
        .ok_or_else(|| DigError::InvalidGeometry(format!("groups_count {count} overflows table size")))?;

    // Bound the allocation by the image before reading.
    let image_len = dev.len_bytes();
    let fits = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .is_some_and(|end| end <= image_len);
    if !fits {
        return Err(DigError::Truncated {
            offset,
            len,
            image_len,
        });
    }

    let table = dig_block::read_vec_at(dev, offset, len)?;
    debug!(offset, groups = count, "read group descriptor table");
    parse_group_desc_table(&table, count).map_err(|e| parse_error_to_dig(&e))
}
