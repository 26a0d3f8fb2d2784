//! Directory entry extraction from a directory inode's direct blocks.

use crate::TombstonePolicy;
use crate::geometry::Ext2Geometry;
use crate::read_block;
use crate::record::{DirentRecord, Record};
use crate::sink::RecordSink;
use dig_block::ByteDevice;
use dig_error::Result;
use dig_ondisk::{DirBlockWalker, DirWalkEnd, Ext2Inode};
use dig_types::InodeNumber;
use tracing::{trace, warn};

/// Bytes of directory block `index` that lie inside the directory's size.
fn walk_limit(block_size: u32, dir_size: u64, index: u64) -> usize {
    let block_size = u64::from(block_size);
    let consumed = index.saturating_mul(block_size);
    let limit = block_size.min(dir_size.saturating_sub(consumed));
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Emit DIRENT rows for one directory block.
pub fn parse_dir_block(
    parent: InodeNumber,
    block_no: u32,
    block: &[u8],
    limit: usize,
    policy: TombstonePolicy,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    let mut walker = DirBlockWalker::new(block, limit);
    for entry in walker.by_ref() {
        if entry.is_tombstone() {
            match policy {
                TombstonePolicy::Stop => {
                    trace!(parent = parent.0, block = block_no, offset = entry.offset, "tombstone ends block");
                    return Ok(());
                }
                TombstonePolicy::Skip => continue,
            }
        }

        sink.accept(Record::Dirent(DirentRecord {
            parent: parent.0,
            offset: u32::try_from(entry.offset).unwrap_or(u32::MAX),
            inode: entry.inode,
            rec_len: entry.rec_len,
            name_len: entry.name_len,
            name: entry.name.to_vec(),
        }))?;
    }

    match walker.end() {
        Some(DirWalkEnd::ZeroRecLen { offset }) => {
            warn!(parent = parent.0, block = block_no, offset, "zero rec_len, abandoning block");
        }
        Some(DirWalkEnd::CrossesBlock { offset }) => {
            warn!(parent = parent.0, block = block_no, offset, "entry crosses block end, abandoning block");
        }
        Some(DirWalkEnd::Limit) | None => {}
    }
    Ok(())
}

/// Emit DIRENT rows for every direct block of a directory inode.
///
/// Stops at the first zero direct pointer. Blocks that cannot be read are
/// logged and skipped.
pub fn parse_directory(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    policy: TombstonePolicy,
    parent: InodeNumber,
    inode: &Ext2Inode,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    let size = inode.size();
    for (index, &block_no) in (0_u64..).zip(inode.direct_blocks()) {
        if block_no == 0 {
            break;
        }
        let limit = walk_limit(geometry.block_size, size, index);
        if limit == 0 {
            break;
        }

        let block = match read_block(dev, geometry, block_no) {
            Ok(block) => block,
            Err(err) => {
                warn!(parent = parent.0, block = block_no, error = %err, "directory block unreadable, skipping");
                continue;
            }
        };
        parse_dir_block(parent, block_no, &block, limit, policy, sink)?;
    }
    Ok(())
}
