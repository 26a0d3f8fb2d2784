//! Free block and free inode enumeration from the allocation bitmaps.

use crate::geometry::Ext2Geometry;
use crate::read_block;
use crate::record::Record;
use crate::sink::RecordSink;
use dig_block::ByteDevice;
use dig_error::Result;
use dig_ondisk::Ext2GroupDesc;
use tracing::{debug, warn};

/// Entity numbers of the zero bits in one bitmap block.
///
/// Bit `k` of byte `j` in group `group` maps to
/// `group * per_group + j * 8 + k + 1`. Every byte of the block is
/// examined, so padding bits past a short group read as free.
pub fn free_entries(bitmap: &[u8], group: u32, per_group: u32) -> impl Iterator<Item = u64> + '_ {
    let group_base = u64::from(group) * u64::from(per_group);
    bitmap
        .iter()
        .zip(0_u64..)
        .flat_map(move |(&byte, j)| {
            (0_u64..8)
                .filter(move |&k| (byte >> k) & 1 == 0)
                .map(move |k| group_base + j * 8 + k + 1)
        })
}

/// Which bitmap of a group descriptor to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitmapKind {
    Block,
    Inode,
}

/// Emit every BFREE row, then every IFREE row.
pub fn scan_bitmaps(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    groups: &[Ext2GroupDesc],
    sink: &mut dyn RecordSink,
) -> Result<()> {
    scan_one_kind(dev, geometry, groups, BitmapKind::Block, sink)?;
    scan_one_kind(dev, geometry, groups, BitmapKind::Inode, sink)
}

fn scan_one_kind(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    groups: &[Ext2GroupDesc],
    kind: BitmapKind,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    for (group, desc) in (0_u32..).zip(groups) {
        let (bitmap_block, per_group) = match kind {
            BitmapKind::Block => (desc.block_bitmap, geometry.blocks_per_group),
            BitmapKind::Inode => (desc.inode_bitmap, geometry.inodes_per_group),
        };

        let bitmap = match read_block(dev, geometry, bitmap_block) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                warn!(group, block = bitmap_block, ?kind, error = %err, "bitmap unreadable, skipping group");
                continue;
            }
        };

        let mut free = 0_u64;
        for number in free_entries(&bitmap, group, per_group) {
            let record = match kind {
                BitmapKind::Block => Record::Bfree { block: number },
                BitmapKind::Inode => Record::Ifree { inode: number },
            };
            sink.accept(record)?;
            free += 1;
        }
        debug!(group, ?kind, free, "scanned bitmap");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dig_block::MemByteDevice;

    fn geometry() -> Ext2Geometry {
        Ext2Geometry {
            block_size: 1024,
            blocks_count: 1024,
            inodes_count: 128,
            blocks_per_group: 512,
            inodes_per_group: 64,
            inode_size: 128,
            first_ino: 11,
            groups_count: 2,
            block_remainder: 0,
            inode_remainder: 0,
        }
    }

    fn desc(block_bitmap: u32, inode_bitmap: u32) -> Ext2GroupDesc {
        Ext2GroupDesc {
            block_bitmap,
            inode_bitmap,
            inode_table: 0,
            free_blocks_count: 0,
            free_inodes_count: 0,
            used_dirs_count: 0,
        }
    }

    #[test]
    fn full_byte_yields_nothing_and_empty_byte_yields_eight() {
        let bitmap = [0xFF_u8, 0x00];
        let free: Vec<_> = free_entries(&bitmap, 0, 512).collect();
        assert_eq!(free, (9..=16).collect::<Vec<_>>());

        let bitmap = [0x00_u8, 0xFF];
        let free: Vec<_> = free_entries(&bitmap, 0, 512).collect();
        assert_eq!(free, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn bits_are_tested_low_to_high_with_group_base() {
        // Bits 0 and 2 set, so bits 1, 3..=7 are free.
        let bitmap = [0b0000_0101_u8];
        let free: Vec<_> = free_entries(&bitmap, 1, 512).collect();
        assert_eq!(free, vec![514, 516, 517, 518, 519, 520]);
    }

    #[test]
    fn all_bfree_rows_precede_all_ifree_rows() {
        let mut image = vec![0xFF_u8; 8 * 1024];
        // Group 0: block bitmap at 3, inode bitmap at 4.
        image[3 * 1024] = 0xFE; // block 1 free
        image[4 * 1024] = 0x7F; // inode 8 free
        // Group 1: block bitmap at 5, inode bitmap at 6.
        image[5 * 1024 + 1] = 0xFD; // block 512 + 8 + 1 + 1
        image[6 * 1024] = 0xFE; // inode 65 free
        let dev = MemByteDevice::new(image);

        let mut records: Vec<Record> = Vec::new();
        scan_bitmaps(&dev, &geometry(), &[desc(3, 4), desc(5, 6)], &mut records).unwrap();
        assert_eq!(
            records,
            vec![
                Record::Bfree { block: 1 },
                Record::Bfree { block: 522 },
                Record::Ifree { inode: 8 },
                Record::Ifree { inode: 65 },
            ]
        );
    }

    #[test]
    fn unreadable_bitmap_skips_only_that_group() {
        let mut image = vec![0xFF_u8; 4 * 1024];
        image[3 * 1024] = 0xFE;
        let dev = MemByteDevice::new(image);

        let mut records: Vec<Record> = Vec::new();
        // Group 1's bitmaps point past the end of the image.
        scan_bitmaps(&dev, &geometry(), &[desc(3, 3), desc(900, 901)], &mut records).unwrap();
        assert_eq!(
            records,
            vec![Record::Bfree { block: 1 }, Record::Ifree { inode: 1 }]
        );
    }
}
