//! Indirect block pointer resolution.
//!
//! Walks single, double and triple indirect trees with an explicit stack
//! bounded by the indirection depth. Rows come out in depth-first order:
//! a pointer's own row is emitted before the rows of the block it points to.

use crate::geometry::Ext2Geometry;
use crate::read_block;
use crate::record::{IndirectRecord, Record};
use crate::sink::RecordSink;
use dig_block::ByteDevice;
use dig_error::Result;
use dig_ondisk::nonzero_pointers;
use dig_types::InodeNumber;
use tracing::{trace, warn};

/// Deepest indirection ext2 supports (triple indirect).
pub const MAX_INDIRECT_LEVEL: u8 = 3;

/// One pointer block being walked.
#[derive(Debug)]
struct Frame {
    block: u32,
    level: u8,
    base: u64,
    /// Non-zero `(index, pointer)` pairs of this block.
    pointers: Vec<(u32, u32)>,
    next: usize,
}

/// Read a pointer block into a frame, or log and return `None`.
fn load_frame(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    owner: InodeNumber,
    block: u32,
    level: u8,
    base: u64,
) -> Option<Frame> {
    match read_block(dev, geometry, block) {
        Ok(bytes) => Some(Frame {
            block,
            level,
            base,
            pointers: nonzero_pointers(&bytes).collect(),
            next: 0,
        }),
        Err(err) => {
            warn!(inode = owner.0, block, level, error = %err, "pointer block unreadable, skipping");
            None
        }
    }
}

/// Emit INDIRECT rows for the tree rooted at `root`.
///
/// For each non-zero pointer at index `i` of a level-`L` block, the row
/// carries logical offset `base + i`; when `L > 1` the pointed-to block is
/// walked next as level `L - 1` with base `base + i`.
pub fn resolve_indirect(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    owner: InodeNumber,
    root: u32,
    base: u64,
    level: u8,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    let level = level.clamp(1, MAX_INDIRECT_LEVEL);
    let mut stack: Vec<Frame> = Vec::with_capacity(usize::from(MAX_INDIRECT_LEVEL));
    stack.extend(load_frame(dev, geometry, owner, root, level, base));

    while let Some(frame) = stack.last_mut() {
        let Some(&(index, pointer)) = frame.pointers.get(frame.next) else {
            stack.pop();
            continue;
        };
        frame.next += 1;

        let logical_offset = frame.base + u64::from(index);
        let (containing_block, frame_level) = (frame.block, frame.level);
        sink.accept(Record::Indirect(IndirectRecord {
            inode: owner.0,
            level: frame_level,
            logical_offset,
            containing_block,
            pointer,
        }))?;

        if frame_level > 1 {
            trace!(inode = owner.0, from = containing_block, to = pointer, "descending");
            let child = load_frame(dev, geometry, owner, pointer, frame_level - 1, logical_offset);
            stack.extend(child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dig_block::MemByteDevice;

    fn geometry(blocks: u32) -> Ext2Geometry {
        Ext2Geometry {
            block_size: 1024,
            blocks_count: blocks,
            inodes_count: 16,
            blocks_per_group: 8192,
            inodes_per_group: 16,
            inode_size: 128,
            first_ino: 11,
            groups_count: 1,
            block_remainder: blocks,
            inode_remainder: 0,
        }
    }

    fn set_ptr(image: &mut [u8], block: usize, index: usize, ptr: u32) {
        let at = block * 1024 + index * 4;
        image[at..at + 4].copy_from_slice(&ptr.to_le_bytes());
    }

    fn rows(records: &[Record]) -> Vec<(u8, u64, u32, u32)> {
        records
            .iter()
            .map(|r| match r {
                Record::Indirect(i) => (i.level, i.logical_offset, i.containing_block, i.pointer),
                other => panic!("unexpected record {other:?}"),
            })
            .collect()
    }

    #[test]
    fn double_indirect_example() {
        let mut image = vec![0_u8; 64 * 1024];
        // Block 20 is the double indirect block; its index 3 points at 30,
        // whose index 0 holds data block 999.
        set_ptr(&mut image, 20, 3, 30);
        set_ptr(&mut image, 30, 0, 999);
        let dev = MemByteDevice::new(image);
        let geo = geometry(64);
        let base = geo.indirect_bases()[1];
        assert_eq!(base, 12 + 256);

        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geo, InodeNumber(13), 20, base, 2, &mut records).unwrap();
        assert_eq!(
            rows(&records),
            vec![(2, 12 + 256 + 3, 20, 30), (1, 12 + 256 + 3, 30, 999)]
        );
    }

    #[test]
    fn depth_first_order_matches_recursion() {
        let mut image = vec![0_u8; 64 * 1024];
        set_ptr(&mut image, 10, 0, 11);
        set_ptr(&mut image, 10, 5, 12);
        set_ptr(&mut image, 11, 1, 100);
        set_ptr(&mut image, 11, 2, 101);
        set_ptr(&mut image, 12, 0, 102);
        let dev = MemByteDevice::new(image);

        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geometry(64), InodeNumber(14), 10, 268, 2, &mut records).unwrap();
        assert_eq!(
            rows(&records),
            vec![
                (2, 268, 10, 11),
                (1, 269, 11, 100),
                (1, 270, 11, 101),
                (2, 273, 10, 12),
                (1, 273, 12, 102),
            ]
        );
    }

    #[test]
    fn triple_indirect_reaches_level_one() {
        let mut image = vec![0_u8; 64 * 1024];
        set_ptr(&mut image, 40, 0, 41);
        set_ptr(&mut image, 41, 0, 42);
        set_ptr(&mut image, 42, 7, 500);
        let dev = MemByteDevice::new(image);
        let geo = geometry(64);
        let base = geo.indirect_bases()[2];

        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geo, InodeNumber(15), 40, base, 3, &mut records).unwrap();
        assert_eq!(
            rows(&records),
            vec![(3, base, 40, 41), (2, base, 41, 42), (1, base + 7, 42, 500)]
        );
    }

    #[test]
    fn unreadable_child_keeps_siblings() {
        let mut image = vec![0_u8; 64 * 1024];
        // Index 0 points outside the image; index 1 is fine.
        set_ptr(&mut image, 10, 0, 5000);
        set_ptr(&mut image, 10, 1, 11);
        set_ptr(&mut image, 11, 0, 77);
        let dev = MemByteDevice::new(image);

        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geometry(64), InodeNumber(13), 10, 268, 2, &mut records).unwrap();
        assert_eq!(
            rows(&records),
            vec![(2, 268, 10, 5000), (2, 269, 10, 11), (1, 269, 11, 77)]
        );
    }

    #[test]
    fn unreadable_root_emits_nothing() {
        let dev = MemByteDevice::new(vec![0_u8; 4 * 1024]);
        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geometry(4), InodeNumber(13), 99, 12, 1, &mut records).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn zero_pointers_are_neither_emitted_nor_followed() {
        let mut image = vec![0_u8; 16 * 1024];
        set_ptr(&mut image, 3, 255, 9);
        let dev = MemByteDevice::new(image);

        let mut records: Vec<Record> = Vec::new();
        resolve_indirect(&dev, &geometry(16), InodeNumber(12), 3, 12, 1, &mut records).unwrap();
        assert_eq!(rows(&records), vec![(1, 12 + 255, 3, 9)]);
    }
}
