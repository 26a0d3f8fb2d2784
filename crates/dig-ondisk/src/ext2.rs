#![forbid(unsafe_code)]

use dig_types::{
    EXT2_DIR_ENTRY_HEADER_LEN, EXT2_FAST_SYMLINK_MAX, EXT2_GOOD_OLD_FIRST_INO,
    EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_GROUP_DESC_SIZE, EXT2_IND_BLOCK,
    EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_SIZE,
    ParseError, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, S_IPERM, ensure_slice,
    ext2_block_size_from_log, read_fixed, read_le_u16, read_le_u32, read_u8, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    /// Raw `s_inode_size`; undefined on revision 0 images.
    pub inode_size: u16,
    /// Raw `s_first_ino`; undefined on revision 0 images.
    pub first_ino: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub volume_name: String,

    // ── Revision & state ─────────────────────────────────────────────────
    pub rev_level: u32,
    pub state: u16,
    pub mtime: u32,
    pub wtime: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from the 1024-byte superblock region.
    ///
    /// Only structural decoding happens here. Magic and block-size checks
    /// live in [`validate_format`](Self::validate_format) so that damaged
    /// images can still be inspected on request.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let Some(block_size) = ext2_block_size_from_log(log_block_size) else {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift",
            });
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size: read_le_u16(region, 0x58)?,
            first_ino: read_le_u32(region, 0x54)?,

            magic: read_le_u16(region, 0x38)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),

            rev_level: read_le_u32(region, 0x4C)?,
            state: read_le_u16(region, 0x3A)?,
            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,

            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat: read_le_u32(region, 0x60)?,
            feature_ro_compat: read_le_u32(region, 0x64)?,
        })
    }

    /// Inode record size, honouring the revision 0 default.
    #[must_use]
    pub fn effective_inode_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// First non-reserved inode, honouring the revision 0 default.
    #[must_use]
    pub fn effective_first_ino(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }

    /// Checks without which the scan cannot do arithmetic at all.
    ///
    /// These are never skippable: a zero divisor would panic the walker.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "must be non-zero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "must be non-zero",
            });
        }
        if self.effective_inode_size() == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }

    /// Format checks: ext2 magic and a block size in the 1K/2K/4K family.
    pub fn validate_format(&self) -> Result<(), ParseError> {
        if self.magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(self.magic),
            });
        }
        if !matches!(self.block_size, 1024 | 2048 | 4096) {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "unsupported block size",
            });
        }
        Ok(())
    }

    /// Byte offset of the group descriptor table.
    ///
    /// The table occupies the block after the one holding the superblock:
    /// block 2 for 1 KiB blocks, block 1 otherwise.
    #[must_use]
    pub fn group_desc_table_offset(&self) -> Option<u64> {
        let gdt_start_block = if self.block_size == 1024 {
            2_u64
        } else {
            1_u64
        };
        gdt_start_block.checked_mul(u64::from(self.block_size))
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

/// Decode a packed descriptor table of `count` entries.
pub fn parse_group_desc_table(table: &[u8], count: usize) -> Result<Vec<Ext2GroupDesc>, ParseError> {
    (0..count)
        .map(|i| {
            let offset = i
                .checked_mul(EXT2_GROUP_DESC_SIZE)
                .ok_or(ParseError::InvalidField {
                    field: "group_desc_offset",
                    reason: "overflow",
                })?;
            Ext2GroupDesc::parse_from_bytes(ensure_slice(table, offset, EXT2_GROUP_DESC_SIZE)?)
        })
        .collect()
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Inode classification by the format bits of `i_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl InodeKind {
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    /// Single-character tag used in INODE rows.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Self::Regular => 'f',
            Self::Directory => 'd',
            Self::Symlink => 's',
            Self::Other => '?',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size_lo: u32,
    /// `i_size_high` for regular files, `i_dir_acl` for directories.
    pub size_high: u32,
    pub links_count: u16,
    /// 512-byte sectors.
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    pub block: [u32; EXT2_N_BLOCKS],
}

/// Size of the fields common to every ext2 inode revision.
pub const EXT2_INODE_CORE_SIZE: usize = EXT2_GOOD_OLD_INODE_SIZE as usize;

impl Ext2Inode {
    /// Parse an ext2 inode from raw bytes (at least 128).
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_INODE_CORE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_INODE_CORE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        // Linux osd2 layout: uid/gid high halves at 0x78/0x7A.
        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (slot, ptr) in block.iter_mut().enumerate() {
            *ptr = read_le_u32(bytes, 0x28 + slot * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size_lo: read_le_u32(bytes, 0x04)?,
            size_high: read_le_u32(bytes, 0x6C)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            block,
        })
    }

    /// An inode slot is live only with a non-zero mode and link count.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.mode != 0 && self.links_count != 0
    }

    #[must_use]
    pub fn kind(&self) -> InodeKind {
        InodeKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & S_IPERM
    }

    /// Logical size in bytes.
    ///
    /// The high word only extends regular files; on directories the same
    /// field is `i_dir_acl`.
    #[must_use]
    pub fn size(&self) -> u64 {
        let lo = u64::from(self.size_lo);
        if self.kind() == InodeKind::Regular {
            lo | (u64::from(self.size_high) << 32)
        } else {
            lo
        }
    }

    /// Whether the symlink target lives in the pointer slots instead of a block.
    #[must_use]
    pub fn is_fast_symlink(&self) -> bool {
        self.kind() == InodeKind::Symlink && self.size() < EXT2_FAST_SYMLINK_MAX
    }

    #[must_use]
    pub fn direct_blocks(&self) -> &[u32] {
        &self.block[..EXT2_NDIR_BLOCKS]
    }

    /// Single, double and triple indirect slots, in that order.
    #[must_use]
    pub fn indirect_blocks(&self) -> &[u32] {
        &self.block[EXT2_IND_BLOCK..]
    }
}

// ── Directory entry walking ─────────────────────────────────────────────────

/// A directory entry borrowed from a block buffer (`ext2_dir_entry_2`).
///
/// Tombstones (`inode == 0`) are yielded too; callers decide what they mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    /// Byte offset of the entry inside its block.
    pub offset: usize,
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
    pub name: &'a [u8],
}

impl Ext2DirEntryRef<'_> {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.inode == 0
    }
}

/// Why a [`DirBlockWalker`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirWalkEnd {
    /// Position reached the walk limit (block end or the directory's size).
    Limit,
    /// An entry declared `rec_len == 0`.
    ZeroRecLen { offset: usize },
    /// An entry header or name runs past the end of the block.
    CrossesBlock { offset: usize },
}

/// Walks packed directory entries in one block up to a logical limit.
///
/// The limit is clamped to the block length. Walking ends at the limit,
/// at a zero `rec_len`, or at an entry that would overrun the block; call
/// [`end`](Self::end) afterwards to learn which.
#[derive(Debug, Clone)]
pub struct DirBlockWalker<'a> {
    block: &'a [u8],
    limit: usize,
    offset: usize,
    end: Option<DirWalkEnd>,
}

impl<'a> DirBlockWalker<'a> {
    #[must_use]
    pub fn new(block: &'a [u8], limit: usize) -> Self {
        Self {
            block,
            limit: limit.min(block.len()),
            offset: 0,
            end: None,
        }
    }

    /// Reason the walk ended, once the iterator is exhausted.
    #[must_use]
    pub fn end(&self) -> Option<DirWalkEnd> {
        self.end
    }

    fn finish(&mut self, end: DirWalkEnd) -> Option<Ext2DirEntryRef<'a>> {
        self.end = Some(end);
        None
    }
}

impl<'a> Iterator for DirBlockWalker<'a> {
    type Item = Ext2DirEntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        if self.offset >= self.limit {
            return self.finish(DirWalkEnd::Limit);
        }

        let offset = self.offset;
        let header_end = offset + EXT2_DIR_ENTRY_HEADER_LEN;
        if header_end > self.block.len() {
            return self.finish(DirWalkEnd::CrossesBlock { offset });
        }

        // The header fits, so these reads cannot fail.
        let (Ok(inode), Ok(rec_len), Ok(name_len), Ok(file_type)) = (
            read_le_u32(self.block, offset),
            read_le_u16(self.block, offset + 4),
            read_u8(self.block, offset + 6),
            read_u8(self.block, offset + 7),
        ) else {
            return self.finish(DirWalkEnd::CrossesBlock { offset });
        };

        if rec_len == 0 {
            return self.finish(DirWalkEnd::ZeroRecLen { offset });
        }

        let name_end = header_end + usize::from(name_len);
        if name_end > self.block.len() {
            return self.finish(DirWalkEnd::CrossesBlock { offset });
        }

        self.offset = offset + usize::from(rec_len);
        Some(Ext2DirEntryRef {
            offset,
            inode,
            rec_len,
            name_len,
            file_type,
            name: &self.block[header_end..name_end],
        })
    }
}

// ── Indirect pointer blocks ─────────────────────────────────────────────────

/// Iterate the non-zero pointers of an indirect block as `(index, block)`.
///
/// A trailing partial pointer (block length not a multiple of 4) is ignored.
pub fn nonzero_pointers(block: &[u8]) -> impl Iterator<Item = (u32, u32)> + '_ {
    block
        .chunks_exact(4)
        .zip(0_u32..)
        .filter_map(|(raw, index)| {
            let ptr = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            (ptr != 0).then_some((index, ptr))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal revision 1 superblock with 1K blocks.
    fn make_valid_sb() -> [u8; EXT2_SUPERBLOCK_SIZE] {
        let mut sb = [0_u8; EXT2_SUPERBLOCK_SIZE];
        sb[0x00..0x04].copy_from_slice(&128_u32.to_le_bytes()); // inodes_count
        sb[0x04..0x08].copy_from_slice(&1024_u32.to_le_bytes()); // blocks_count
        sb[0x0C..0x10].copy_from_slice(&900_u32.to_le_bytes()); // free_blocks
        sb[0x10..0x14].copy_from_slice(&117_u32.to_le_bytes()); // free_inodes
        sb[0x14..0x18].copy_from_slice(&1_u32.to_le_bytes()); // first_data_block
        sb[0x18..0x1C].copy_from_slice(&0_u32.to_le_bytes()); // log_block_size -> 1K
        sb[0x20..0x24].copy_from_slice(&512_u32.to_le_bytes()); // blocks_per_group
        sb[0x28..0x2C].copy_from_slice(&64_u32.to_le_bytes()); // inodes_per_group
        sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes()); // rev_level
        sb[0x54..0x58].copy_from_slice(&11_u32.to_le_bytes()); // first_ino
        sb[0x58..0x5A].copy_from_slice(&128_u16.to_le_bytes()); // inode_size
        sb[0x78..0x7E].copy_from_slice(b"relics");
        sb
    }

    #[test]
    fn parse_superblock_region_smoke() {
        let parsed = Ext2Superblock::parse_superblock_region(&make_valid_sb()).expect("parse");
        assert_eq!(parsed.inodes_count, 128);
        assert_eq!(parsed.blocks_count, 1024);
        assert_eq!(parsed.block_size, 1024);
        assert_eq!(parsed.blocks_per_group, 512);
        assert_eq!(parsed.inodes_per_group, 64);
        assert_eq!(parsed.effective_inode_size(), 128);
        assert_eq!(parsed.effective_first_ino(), 11);
        assert_eq!(parsed.volume_name, "relics");
        parsed.validate_geometry().expect("geometry");
        parsed.validate_format().expect("format");
    }

    #[test]
    fn parse_superblock_region_rejects_short_region() {
        let err = Ext2Superblock::parse_superblock_region(&[0_u8; 512]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: 512,
            }
        );
    }

    #[test]
    fn parse_superblock_region_rejects_overflowing_shift() {
        let mut sb = make_valid_sb();
        sb[0x18..0x1C].copy_from_slice(&40_u32.to_le_bytes());
        let err = Ext2Superblock::parse_superblock_region(&sb).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift"
            }
        ));
    }

    #[test]
    fn revision_zero_uses_good_old_defaults() {
        let mut sb = make_valid_sb();
        sb[0x4C..0x50].copy_from_slice(&0_u32.to_le_bytes());
        sb[0x54..0x58].copy_from_slice(&0_u32.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&0_u16.to_le_bytes());
        let parsed = Ext2Superblock::parse_superblock_region(&sb).unwrap();
        assert_eq!(parsed.inode_size, 0);
        assert_eq!(parsed.effective_inode_size(), 128);
        assert_eq!(parsed.effective_first_ino(), 11);
        parsed.validate_geometry().expect("rev 0 geometry is fine");
    }

    #[test]
    fn validate_format_catches_bad_magic_and_block_size() {
        let mut sb = make_valid_sb();
        sb[0x38..0x3A].copy_from_slice(&0x1234_u16.to_le_bytes());
        let parsed = Ext2Superblock::parse_superblock_region(&sb).unwrap();
        assert_eq!(
            parsed.validate_format(),
            Err(ParseError::InvalidMagic {
                expected: 0xEF53,
                actual: 0x1234,
            })
        );

        let mut sb = make_valid_sb();
        sb[0x18..0x1C].copy_from_slice(&3_u32.to_le_bytes()); // 8K
        let parsed = Ext2Superblock::parse_superblock_region(&sb).unwrap();
        assert_eq!(parsed.block_size, 8192);
        assert!(matches!(
            parsed.validate_format(),
            Err(ParseError::InvalidField {
                field: "s_log_block_size",
                ..
            })
        ));
    }

    #[test]
    fn validate_geometry_catches_zero_divisors() {
        let mut bad = make_valid_sb();
        bad[0x20..0x24].copy_from_slice(&0_u32.to_le_bytes());
        let p = Ext2Superblock::parse_superblock_region(&bad).unwrap();
        assert!(matches!(
            p.validate_geometry(),
            Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                ..
            })
        ));

        let mut bad = make_valid_sb();
        bad[0x28..0x2C].copy_from_slice(&0_u32.to_le_bytes());
        let p = Ext2Superblock::parse_superblock_region(&bad).unwrap();
        assert!(matches!(
            p.validate_geometry(),
            Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                ..
            })
        ));

        let mut bad = make_valid_sb();
        bad[0x58..0x5A].copy_from_slice(&0_u16.to_le_bytes());
        let p = Ext2Superblock::parse_superblock_region(&bad).unwrap();
        assert!(p.validate_geometry().is_err());
    }

    #[test]
    fn group_desc_table_follows_superblock_block() {
        let sb = Ext2Superblock::parse_superblock_region(&make_valid_sb()).unwrap();
        assert_eq!(sb.group_desc_table_offset(), Some(2048));

        let mut raw = make_valid_sb();
        raw[0x18..0x1C].copy_from_slice(&2_u32.to_le_bytes()); // 4K
        let sb4k = Ext2Superblock::parse_superblock_region(&raw).unwrap();
        assert_eq!(sb4k.group_desc_table_offset(), Some(4096));

        raw[0x18..0x1C].copy_from_slice(&1_u32.to_le_bytes()); // 2K
        let sb2k = Ext2Superblock::parse_superblock_region(&raw).unwrap();
        assert_eq!(sb2k.group_desc_table_offset(), Some(2048));
    }

    #[test]
    fn parse_group_desc() {
        let mut gd = [0_u8; 32];
        gd[0x00..0x04].copy_from_slice(&3_u32.to_le_bytes());
        gd[0x04..0x08].copy_from_slice(&4_u32.to_le_bytes());
        gd[0x08..0x0C].copy_from_slice(&5_u32.to_le_bytes());
        gd[0x0C..0x0E].copy_from_slice(&200_u16.to_le_bytes());
        gd[0x0E..0x10].copy_from_slice(&50_u16.to_le_bytes());
        gd[0x10..0x12].copy_from_slice(&2_u16.to_le_bytes());

        let parsed = Ext2GroupDesc::parse_from_bytes(&gd).unwrap();
        assert_eq!(parsed.block_bitmap, 3);
        assert_eq!(parsed.inode_bitmap, 4);
        assert_eq!(parsed.inode_table, 5);
        assert_eq!(parsed.free_blocks_count, 200);
        assert_eq!(parsed.free_inodes_count, 50);
        assert_eq!(parsed.used_dirs_count, 2);

        assert!(Ext2GroupDesc::parse_from_bytes(&gd[..20]).is_err());
    }

    #[test]
    fn parse_group_desc_table_needs_every_entry() {
        let mut table = vec![0_u8; 64];
        table[32..36].copy_from_slice(&9_u32.to_le_bytes());
        let descs = parse_group_desc_table(&table, 2).unwrap();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[1].block_bitmap, 9);

        assert!(matches!(
            parse_group_desc_table(&table, 3),
            Err(ParseError::InsufficientData { .. })
        ));
    }

    fn make_inode(mode: u16, links: u16) -> [u8; 128] {
        let mut raw = [0_u8; 128];
        raw[0x00..0x02].copy_from_slice(&mode.to_le_bytes());
        raw[0x02..0x04].copy_from_slice(&1000_u16.to_le_bytes());
        raw[0x04..0x08].copy_from_slice(&4096_u32.to_le_bytes());
        raw[0x08..0x0C].copy_from_slice(&1_000_000_u32.to_le_bytes());
        raw[0x0C..0x10].copy_from_slice(&2_000_000_u32.to_le_bytes());
        raw[0x10..0x14].copy_from_slice(&3_000_000_u32.to_le_bytes());
        raw[0x18..0x1A].copy_from_slice(&100_u16.to_le_bytes());
        raw[0x1A..0x1C].copy_from_slice(&links.to_le_bytes());
        raw[0x1C..0x20].copy_from_slice(&8_u32.to_le_bytes());
        for slot in 0..EXT2_N_BLOCKS {
            let ptr = u32::try_from(slot).unwrap() + 20;
            raw[0x28 + slot * 4..0x2C + slot * 4].copy_from_slice(&ptr.to_le_bytes());
        }
        raw
    }

    #[test]
    fn parse_inode_core_fields() {
        let mut raw = make_inode(S_IFREG | 0o644, 1);
        raw[0x78..0x7A].copy_from_slice(&1_u16.to_le_bytes()); // uid high
        let inode = Ext2Inode::parse_from_bytes(&raw).unwrap();
        assert!(inode.is_live());
        assert_eq!(inode.kind(), InodeKind::Regular);
        assert_eq!(inode.permission_bits(), 0o644);
        assert_eq!(inode.uid, 1000 + (1 << 16));
        assert_eq!(inode.gid, 100);
        assert_eq!(inode.size(), 4096);
        assert_eq!(inode.blocks, 8);
        assert_eq!(inode.atime, 1_000_000);
        assert_eq!(inode.ctime, 2_000_000);
        assert_eq!(inode.mtime, 3_000_000);
        assert_eq!(inode.direct_blocks().len(), 12);
        assert_eq!(inode.direct_blocks()[0], 20);
        assert_eq!(inode.indirect_blocks(), &[32, 33, 34]);

        assert!(Ext2Inode::parse_from_bytes(&raw[..100]).is_err());
    }

    #[test]
    fn inode_size_high_only_extends_regular_files() {
        let mut file = make_inode(S_IFREG | 0o600, 1);
        file[0x6C..0x70].copy_from_slice(&1_u32.to_le_bytes());
        assert_eq!(Ext2Inode::parse_from_bytes(&file).unwrap().size(), (1 << 32) + 4096);

        let mut dir = make_inode(S_IFDIR | 0o755, 2);
        dir[0x6C..0x70].copy_from_slice(&1_u32.to_le_bytes());
        assert_eq!(Ext2Inode::parse_from_bytes(&dir).unwrap().size(), 4096);
    }

    #[test]
    fn inode_liveness_needs_mode_and_links() {
        assert!(!Ext2Inode::parse_from_bytes(&make_inode(0, 1)).unwrap().is_live());
        assert!(
            !Ext2Inode::parse_from_bytes(&make_inode(S_IFREG, 0))
                .unwrap()
                .is_live()
        );
    }

    #[test]
    fn inode_kind_uses_format_bits_not_single_bits() {
        assert_eq!(InodeKind::from_mode(S_IFREG | 0o755), InodeKind::Regular);
        assert_eq!(InodeKind::from_mode(S_IFDIR | 0o755), InodeKind::Directory);
        // 0o120000 shares the 0o100000 bit with regular files.
        assert_eq!(InodeKind::from_mode(S_IFLNK | 0o777), InodeKind::Symlink);
        assert_eq!(InodeKind::from_mode(0o060_000), InodeKind::Other);
        assert_eq!(InodeKind::from_mode(0o140_000), InodeKind::Other);
        assert_eq!(InodeKind::Symlink.tag(), 's');
        assert_eq!(InodeKind::Other.tag(), '?');
    }

    #[test]
    fn fast_symlink_detection() {
        let mut raw = make_inode(S_IFLNK | 0o777, 1);
        raw[0x04..0x08].copy_from_slice(&11_u32.to_le_bytes());
        assert!(Ext2Inode::parse_from_bytes(&raw).unwrap().is_fast_symlink());

        raw[0x04..0x08].copy_from_slice(&200_u32.to_le_bytes());
        assert!(!Ext2Inode::parse_from_bytes(&raw).unwrap().is_fast_symlink());
    }

    fn put_entry(block: &mut [u8], offset: usize, inode: u32, rec_len: u16, name: &[u8]) {
        block[offset..offset + 4].copy_from_slice(&inode.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&rec_len.to_le_bytes());
        block[offset + 6] = u8::try_from(name.len()).unwrap();
        block[offset + 7] = 1;
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
    }

    #[test]
    fn walker_yields_entries_and_tombstones() {
        let mut block = vec![0_u8; 1024];
        put_entry(&mut block, 0, 2, 12, b".");
        put_entry(&mut block, 12, 0, 12, b"");
        put_entry(&mut block, 24, 11, 1000, b"lost+found");

        let mut walker = DirBlockWalker::new(&block, 1024);
        let entries: Vec<_> = walker.by_ref().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, b".");
        assert!(entries[1].is_tombstone());
        assert_eq!(entries[2].offset, 24);
        assert_eq!(entries[2].name, b"lost+found");
        assert_eq!(walker.end(), Some(DirWalkEnd::Limit));
    }

    #[test]
    fn walker_stops_on_zero_rec_len() {
        let mut block = vec![0_u8; 64];
        put_entry(&mut block, 0, 2, 12, b".");
        put_entry(&mut block, 12, 3, 0, b"x");

        let mut walker = DirBlockWalker::new(&block, 64);
        assert_eq!(walker.by_ref().count(), 1);
        assert_eq!(walker.end(), Some(DirWalkEnd::ZeroRecLen { offset: 12 }));
    }

    #[test]
    fn walker_respects_logical_limit() {
        let mut block = vec![0_u8; 64];
        put_entry(&mut block, 0, 2, 12, b".");
        put_entry(&mut block, 12, 3, 52, b"beyond");

        let mut walker = DirBlockWalker::new(&block, 12);
        assert_eq!(walker.by_ref().count(), 1);
        assert_eq!(walker.end(), Some(DirWalkEnd::Limit));

        // A limit larger than the block is clamped.
        let walker = DirBlockWalker::new(&block, 10_000);
        assert_eq!(walker.count(), 2);
    }

    #[test]
    fn walker_stops_when_name_crosses_block() {
        let mut block = vec![0_u8; 16];
        block[0..4].copy_from_slice(&5_u32.to_le_bytes());
        block[4..6].copy_from_slice(&16_u16.to_le_bytes());
        block[6] = 200; // name_len far beyond the block

        let mut walker = DirBlockWalker::new(&block, 16);
        assert_eq!(walker.next(), None);
        assert_eq!(walker.end(), Some(DirWalkEnd::CrossesBlock { offset: 0 }));
    }

    #[test]
    fn walker_stops_when_header_crosses_block() {
        let mut block = vec![0_u8; 20];
        put_entry(&mut block, 0, 2, 16, b".");

        let mut walker = DirBlockWalker::new(&block, 20);
        assert_eq!(walker.by_ref().count(), 1);
        assert_eq!(walker.end(), Some(DirWalkEnd::CrossesBlock { offset: 16 }));
    }

    #[test]
    fn nonzero_pointers_skips_holes() {
        let mut block = vec![0_u8; 1024];
        block[12..16].copy_from_slice(&999_u32.to_le_bytes());
        block[1020..1024].copy_from_slice(&7_u32.to_le_bytes());
        let ptrs: Vec<_> = nonzero_pointers(&block).collect();
        assert_eq!(ptrs, vec![(3, 999), (255, 7)]);

        assert_eq!(nonzero_pointers(&block[..3]).count(), 0);
    }
}
