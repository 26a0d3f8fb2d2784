//! Inode table walk.

use crate::ScanOptions;
use crate::dirent::parse_directory;
use crate::geometry::Ext2Geometry;
use crate::indirect::resolve_indirect;
use crate::record::{InodeRecord, Record};
use crate::sink::RecordSink;
use dig_block::ByteDevice;
use dig_error::Result;
use dig_ondisk::{EXT2_INODE_CORE_SIZE, Ext2GroupDesc, Ext2Inode};
use dig_types::InodeNumber;
use tracing::{debug, warn};

/// Build the INODE row for a live inode.
#[must_use]
pub fn inode_record(ino: InodeNumber, inode: &Ext2Inode) -> InodeRecord {
    InodeRecord {
        inode: ino.0,
        file_type: inode.kind().tag(),
        perm: inode.permission_bits(),
        uid: inode.uid,
        gid: inode.gid,
        links: inode.links_count,
        ctime: inode.ctime,
        mtime: inode.mtime,
        atime: inode.atime,
        size: inode.size(),
        blocks: inode.blocks,
        block: inode.block,
    }
}

/// Read and decode one inode record, or log why it cannot be.
fn read_inode(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    desc: &Ext2GroupDesc,
    ino: InodeNumber,
    index: u32,
) -> Option<Ext2Inode> {
    let offset = geometry.inode_offset(desc.inode_table, index);
    let raw = match dig_block::read_vec_at(dev, offset, EXT2_INODE_CORE_SIZE) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(inode = ino.0, offset, error = %err, "inode unreadable, skipping");
            return None;
        }
    };
    match Ext2Inode::parse_from_bytes(&raw) {
        Ok(inode) => Some(inode),
        Err(err) => {
            warn!(inode = ino.0, offset, error = %err, "inode undecodable, skipping");
            None
        }
    }
}

/// Emit the rows for one live inode: INODE, then DIRENT rows for a
/// directory, then INDIRECT rows for each non-zero indirect slot.
pub fn emit_inode(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    options: &ScanOptions,
    ino: InodeNumber,
    inode: &Ext2Inode,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    sink.accept(Record::Inode(inode_record(ino, inode)))?;

    if inode.is_dir() {
        parse_directory(dev, geometry, options.tombstone_policy, ino, inode, sink)?;
    }

    if !options.inline_symlink_pointers && inode.is_fast_symlink() {
        return Ok(());
    }

    let bases = geometry.indirect_bases();
    for ((&root, base), level) in inode.indirect_blocks().iter().zip(bases).zip(1_u8..) {
        if root != 0 {
            resolve_indirect(dev, geometry, ino, root, base, level, sink)?;
        }
    }
    Ok(())
}

/// Walk inode numbers `1..inodes_count`, emitting rows for each live inode.
pub fn walk_inodes(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    groups: &[Ext2GroupDesc],
    options: &ScanOptions,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    let mut live = 0_u64;
    for n in 1..u64::from(geometry.inodes_count) {
        let ino = InodeNumber(n);
        let (group, index) = geometry.inode_location(ino);
        let Some(desc) = usize::try_from(group.0).ok().and_then(|g| groups.get(g)) else {
            // Group numbers only grow from here on.
            warn!(inode = n, group = group.0, groups = groups.len(), "inode beyond descriptor table, stopping walk");
            break;
        };

        let Some(inode) = read_inode(dev, geometry, desc, ino, index) else {
            continue;
        };
        if !inode.is_live() {
            continue;
        }

        live += 1;
        emit_inode(dev, geometry, options, ino, &inode, sink)?;
    }
    debug!(live, "inode walk complete");
    Ok(())
}
