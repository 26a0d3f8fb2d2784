//! Synthetic ext2 image builder.
//!
//! Lays out a classic ext2 filesystem (superblock, single-block descriptor
//! table, per-group bitmaps and inode table) and lets tests place inodes,
//! directories and data blocks in it. Bitmaps, free counts and the
//! descriptor table are written by [`ImageBuilder::finish`].

use anyhow::{Context, Result, bail, ensure};
use dig_types::{
    EXT2_DIND_BLOCK, EXT2_DIR_ENTRY_HEADER_LEN, EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_REV,
    EXT2_GROUP_DESC_SIZE, EXT2_IND_BLOCK, EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC,
    EXT2_SUPERBLOCK_OFFSET, S_IFDIR, S_IFLNK, S_IFREG,
};

/// Timestamp stamped on every synthetic inode (2023-11-14 22:13:20 UTC).
pub const SAMPLE_EPOCH: u32 = 1_700_000_000;

/// `ext2_dir_entry_2` file type codes.
pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub block_size: u32,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub rev_level: u32,
    pub volume_name: String,
}

impl ImageSpec {
    /// 1 MiB image, 1K blocks, two full groups of 512 blocks and 64 inodes.
    #[must_use]
    pub fn tiny_1k() -> Self {
        Self {
            block_size: 1024,
            blocks_count: 1024,
            inodes_count: 128,
            blocks_per_group: 512,
            inodes_per_group: 64,
            inode_size: 128,
            rev_level: 1,
            volume_name: "ext2dig".to_owned(),
        }
    }

    fn first_data_block(&self) -> u32 {
        u32::from(self.block_size == 1024)
    }

    fn groups_count(&self) -> u32 {
        self.blocks_count.div_ceil(self.blocks_per_group)
    }

    fn inode_table_blocks(&self) -> u32 {
        (self.inodes_per_group * u32::from(self.inode_size)).div_ceil(self.block_size)
    }
}

/// Raw inode contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeSpec {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub links: u16,
    pub size: u64,
    /// 512-byte sectors.
    pub blocks: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub block: [u32; EXT2_N_BLOCKS],
}

impl Default for InodeSpec {
    fn default() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            links: 0,
            size: 0,
            blocks: 0,
            atime: SAMPLE_EPOCH,
            ctime: SAMPLE_EPOCH,
            mtime: SAMPLE_EPOCH,
            dtime: 0,
            block: [0; EXT2_N_BLOCKS],
        }
    }
}

impl InodeSpec {
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, inode_size: u16) -> Vec<u8> {
        let mut raw = vec![0_u8; usize::from(inode_size)];
        let put16 = |raw: &mut [u8], at: usize, v: u16| raw[at..at + 2].copy_from_slice(&v.to_le_bytes());
        let put32 = |raw: &mut [u8], at: usize, v: u32| raw[at..at + 4].copy_from_slice(&v.to_le_bytes());

        let [uid_lo, uid_hi] = split_u32(self.uid);
        let [gid_lo, gid_hi] = split_u32(self.gid);
        let size_lo = (self.size & u64::from(u32::MAX)) as u32;
        let size_hi = (self.size >> 32) as u32;

        put16(&mut raw, 0x00, self.mode);
        put16(&mut raw, 0x02, uid_lo);
        put32(&mut raw, 0x04, size_lo);
        put32(&mut raw, 0x08, self.atime);
        put32(&mut raw, 0x0C, self.ctime);
        put32(&mut raw, 0x10, self.mtime);
        put32(&mut raw, 0x14, self.dtime);
        put16(&mut raw, 0x18, gid_lo);
        put16(&mut raw, 0x1A, self.links);
        put32(&mut raw, 0x1C, self.blocks);
        for (slot, ptr) in self.block.iter().enumerate() {
            put32(&mut raw, 0x28 + slot * 4, *ptr);
        }
        put32(&mut raw, 0x6C, size_hi);
        put16(&mut raw, 0x78, uid_hi);
        put16(&mut raw, 0x7A, gid_hi);
        raw
    }
}

#[allow(clippy::cast_possible_truncation)]
fn split_u32(v: u32) -> [u16; 2] {
    [v as u16, (v >> 16) as u16]
}

/// One directory entry to pack into a directory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntrySpec {
    pub inode: u32,
    pub name: String,
    pub file_type: u8,
}

impl DirEntrySpec {
    #[must_use]
    pub fn new(inode: u32, name: &str, file_type: u8) -> Self {
        Self {
            inode,
            name: name.to_owned(),
            file_type,
        }
    }

    fn min_rec_len(&self) -> usize {
        (EXT2_DIR_ENTRY_HEADER_LEN + self.name.len()).next_multiple_of(4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupLayout {
    start: u32,
    block_bitmap: u32,
    inode_bitmap: u32,
    inode_table: u32,
    used_dirs: u16,
}

/// Builder for a synthetic ext2 image held in memory.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    spec: ImageSpec,
    groups: Vec<GroupLayout>,
    image: Vec<u8>,
    block_used: Vec<bool>,
    inode_used: Vec<bool>,
    cursor: u32,
}

impl ImageBuilder {
    pub fn new(spec: ImageSpec) -> Result<Self> {
        ensure!(
            matches!(spec.block_size, 1024 | 2048 | 4096),
            "unsupported block size {}",
            spec.block_size
        );
        let bits = spec.block_size * 8;
        ensure!(
            spec.blocks_per_group > 0 && spec.blocks_per_group <= bits,
            "blocks_per_group must be in 1..={bits}"
        );
        ensure!(
            spec.inodes_per_group > 0 && spec.inodes_per_group <= bits,
            "inodes_per_group must be in 1..={bits}"
        );
        ensure!(spec.inode_size >= 128, "inode_size must be at least 128");
        let groups_count = spec.groups_count();
        ensure!(
            groups_count as usize * EXT2_GROUP_DESC_SIZE <= spec.block_size as usize,
            "descriptor table must fit one block"
        );
        ensure!(
            spec.inodes_count <= groups_count * spec.inodes_per_group,
            "inodes_count exceeds group capacity"
        );

        let first_data_block = spec.first_data_block();
        let table_blocks = spec.inode_table_blocks();
        let mut groups = Vec::with_capacity(groups_count as usize);
        for g in 0..groups_count {
            let start = first_data_block + g * spec.blocks_per_group;
            // Group 0 also holds the superblock and the descriptor table.
            let meta = if g == 0 { start + 2 } else { start };
            groups.push(GroupLayout {
                start,
                block_bitmap: meta,
                inode_bitmap: meta + 1,
                inode_table: meta + 2,
                used_dirs: 0,
            });
            ensure!(
                meta + 2 + table_blocks <= spec.blocks_count,
                "group {g} metadata does not fit in the image"
            );
        }

        let image_len = spec.blocks_count as usize * spec.block_size as usize;
        let mut builder = Self {
            image: vec![0_u8; image_len],
            block_used: vec![false; spec.blocks_count as usize],
            inode_used: vec![false; spec.inodes_count as usize],
            cursor: first_data_block,
            groups,
            spec,
        };

        for block in 0..first_data_block + 2 {
            builder.block_used[block as usize] = true;
        }
        for layout in builder.groups.clone() {
            for block in layout.block_bitmap..layout.inode_table + table_blocks {
                builder.block_used[block as usize] = true;
            }
        }
        // Inodes below the first non-reserved one are always allocated.
        for ino in 1..EXT2_GOOD_OLD_FIRST_INO.min(builder.spec.inodes_count + 1) {
            builder.inode_used[ino as usize - 1] = true;
        }
        Ok(builder)
    }

    #[must_use]
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    /// `(block_bitmap, inode_bitmap, inode_table)` of a group.
    #[must_use]
    pub fn group_layout(&self, group: usize) -> Option<(u32, u32, u32)> {
        self.groups
            .get(group)
            .map(|g| (g.block_bitmap, g.inode_bitmap, g.inode_table))
    }

    /// Allocate the next free block.
    pub fn alloc_block(&mut self) -> Result<u32> {
        while self.cursor < self.spec.blocks_count {
            let block = self.cursor;
            self.cursor += 1;
            if !self.block_used[block as usize] {
                self.block_used[block as usize] = true;
                return Ok(block);
            }
        }
        bail!("image is full")
    }

    /// Copy `data` to the start of `block`.
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        ensure!(data.len() <= self.spec.block_size as usize, "data larger than a block");
        ensure!(block < self.spec.blocks_count, "block {block} outside image");
        let at = block as usize * self.spec.block_size as usize;
        self.image[at..at + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Write raw bytes anywhere in the image (for corruption tests).
    pub fn poke(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).context("poke overflow")?;
        ensure!(end <= self.image.len(), "poke outside image");
        self.image[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Write an inode record and mark it allocated.
    pub fn set_inode(&mut self, ino: u32, inode: &InodeSpec) -> Result<()> {
        ensure!(
            ino >= 1 && ino <= self.spec.inodes_count,
            "inode {ino} out of range"
        );
        let ipg = self.spec.inodes_per_group;
        let group = ((ino - 1) / ipg) as usize;
        let index = (ino - 1) % ipg;
        let table = self.groups[group].inode_table;
        let offset = table as usize * self.spec.block_size as usize
            + index as usize * usize::from(self.spec.inode_size);
        let raw = inode.encode(self.spec.inode_size);
        self.image[offset..offset + raw.len()].copy_from_slice(&raw);

        self.inode_used[ino as usize - 1] = true;
        if inode.mode & dig_types::S_IFMT == S_IFDIR {
            self.groups[group].used_dirs += 1;
        }
        Ok(())
    }

    /// Pack entries into a freshly allocated directory block.
    ///
    /// The last entry's `rec_len` runs to the end of the block.
    pub fn add_dir_block(&mut self, entries: &[DirEntrySpec]) -> Result<u32> {
        let bs = self.spec.block_size as usize;
        let mut data = vec![0_u8; bs];
        let mut offset = 0_usize;
        for (i, entry) in entries.iter().enumerate() {
            let rec_len = if i + 1 == entries.len() {
                bs - offset
            } else {
                entry.min_rec_len()
            };
            ensure!(
                offset + entry.min_rec_len() <= bs,
                "directory entries overflow one block"
            );
            let name_len = u8::try_from(entry.name.len()).context("name too long")?;
            data[offset..offset + 4].copy_from_slice(&entry.inode.to_le_bytes());
            data[offset + 4..offset + 6]
                .copy_from_slice(&u16::try_from(rec_len).context("rec_len")?.to_le_bytes());
            data[offset + 6] = name_len;
            data[offset + 7] = entry.file_type;
            data[offset + 8..offset + 8 + entry.name.len()].copy_from_slice(entry.name.as_bytes());
            offset += rec_len;
        }
        let block = self.alloc_block()?;
        self.write_block(block, &data)?;
        Ok(block)
    }

    /// Allocate `count` data blocks and the indirect blocks addressing them.
    ///
    /// Returns the 15 pointer slots and the total number of blocks used.
    pub fn alloc_file_blocks(&mut self, count: u32) -> Result<([u32; EXT2_N_BLOCKS], u32)> {
        let per_block = self.spec.block_size / 4;
        ensure!(
            count <= EXT2_NDIR_BLOCKS as u32 + per_block + per_block * per_block,
            "file too large for double indirect addressing"
        );

        let mut slots = [0_u32; EXT2_N_BLOCKS];
        let mut used = 0_u32;
        let mut remaining = count;

        for slot in slots.iter_mut().take(EXT2_NDIR_BLOCKS) {
            if remaining == 0 {
                break;
            }
            *slot = self.alloc_block()?;
            used += 1;
            remaining -= 1;
        }

        if remaining > 0 {
            let take = remaining.min(per_block);
            let (ind, n) = self.alloc_pointer_block(take)?;
            slots[EXT2_IND_BLOCK] = ind;
            used += n;
            remaining -= take;
        }

        if remaining > 0 {
            let dind = self.alloc_block()?;
            used += 1;
            let mut pointers = Vec::new();
            while remaining > 0 {
                let take = remaining.min(per_block);
                let (ind, n) = self.alloc_pointer_block(take)?;
                pointers.push(ind);
                used += n;
                remaining -= take;
            }
            self.write_pointers(dind, &pointers)?;
            slots[EXT2_DIND_BLOCK] = dind;
        }

        Ok((slots, used))
    }

    /// One indirect block holding `count` fresh data pointers.
    fn alloc_pointer_block(&mut self, count: u32) -> Result<(u32, u32)> {
        let ind = self.alloc_block()?;
        let pointers = (0..count)
            .map(|_| self.alloc_block())
            .collect::<Result<Vec<_>>>()?;
        self.write_pointers(ind, &pointers)?;
        Ok((ind, count + 1))
    }

    fn write_pointers(&mut self, block: u32, pointers: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.write_block(block, &bytes)
    }

    fn sectors(&self, blocks: u32) -> u32 {
        blocks * (self.spec.block_size / 512)
    }

    /// A regular file of `size` bytes backed by `data_blocks` blocks.
    pub fn add_file(&mut self, ino: u32, perm: u16, size: u64, data_blocks: u32) -> Result<()> {
        let (block, used) = self.alloc_file_blocks(data_blocks)?;
        let inode = InodeSpec {
            mode: S_IFREG | perm,
            uid: 1000,
            gid: 1000,
            links: 1,
            size,
            blocks: self.sectors(used),
            block,
            ..InodeSpec::default()
        };
        self.set_inode(ino, &inode)
    }

    /// A one-block directory holding `.`, `..` and `children`.
    pub fn add_directory(
        &mut self,
        ino: u32,
        parent: u32,
        perm: u16,
        children: &[DirEntrySpec],
    ) -> Result<()> {
        let mut entries = vec![
            DirEntrySpec::new(ino, ".", FT_DIR),
            DirEntrySpec::new(parent, "..", FT_DIR),
        ];
        entries.extend_from_slice(children);
        let dir_block = self.add_dir_block(&entries)?;

        let subdirs = children.iter().filter(|c| c.file_type == FT_DIR).count();
        let mut block = [0_u32; EXT2_N_BLOCKS];
        block[0] = dir_block;
        let inode = InodeSpec {
            mode: S_IFDIR | perm,
            links: 2 + u16::try_from(subdirs).context("too many subdirectories")?,
            size: u64::from(self.spec.block_size),
            blocks: self.sectors(1),
            block,
            ..InodeSpec::default()
        };
        self.set_inode(ino, &inode)
    }

    /// A symlink whose target lives in the pointer slots.
    pub fn add_fast_symlink(&mut self, ino: u32, target: &str) -> Result<()> {
        ensure!(target.len() < 60, "fast symlink target must be under 60 bytes");
        let mut raw = [0_u8; EXT2_N_BLOCKS * 4];
        raw[..target.len()].copy_from_slice(target.as_bytes());
        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (slot, chunk) in block.iter_mut().zip(raw.chunks_exact(4)) {
            *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let inode = InodeSpec {
            mode: S_IFLNK | 0o777,
            uid: 1000,
            gid: 1000,
            links: 1,
            size: target.len() as u64,
            block,
            ..InodeSpec::default()
        };
        self.set_inode(ino, &inode)
    }

    /// Write bitmaps, descriptors and superblock; return the image bytes.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let bs = self.spec.block_size as usize;
        let bits = self.spec.block_size * 8;
        let mut free_blocks_total = 0_u32;
        let mut free_inodes_total = 0_u32;
        let mut descriptors = Vec::with_capacity(self.groups.len() * EXT2_GROUP_DESC_SIZE);

        for (g, layout) in (0_u32..).zip(self.groups.clone()) {
            let real_blocks = self
                .spec
                .blocks_count
                .saturating_sub(layout.start)
                .min(self.spec.blocks_per_group);
            let mut block_bitmap = vec![0_u8; bs];
            let mut free_blocks = 0_u32;
            for bit in 0..bits {
                let used = bit >= real_blocks || self.block_used[(layout.start + bit) as usize];
                if used {
                    block_bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
                } else {
                    free_blocks += 1;
                }
            }

            let first_ino = g * self.spec.inodes_per_group + 1;
            let real_inodes = (self.spec.inodes_count + 1)
                .saturating_sub(first_ino)
                .min(self.spec.inodes_per_group);
            let mut inode_bitmap = vec![0_u8; bs];
            let mut free_inodes = 0_u32;
            for bit in 0..bits {
                let used = bit >= real_inodes || self.inode_used[(first_ino + bit - 1) as usize];
                if used {
                    inode_bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
                } else {
                    free_inodes += 1;
                }
            }

            let at = layout.block_bitmap as usize * bs;
            self.image[at..at + bs].copy_from_slice(&block_bitmap);
            let at = layout.inode_bitmap as usize * bs;
            self.image[at..at + bs].copy_from_slice(&inode_bitmap);

            let mut desc = [0_u8; EXT2_GROUP_DESC_SIZE];
            desc[0x00..0x04].copy_from_slice(&layout.block_bitmap.to_le_bytes());
            desc[0x04..0x08].copy_from_slice(&layout.inode_bitmap.to_le_bytes());
            desc[0x08..0x0C].copy_from_slice(&layout.inode_table.to_le_bytes());
            desc[0x0C..0x0E].copy_from_slice(&saturate_u16(free_blocks).to_le_bytes());
            desc[0x0E..0x10].copy_from_slice(&saturate_u16(free_inodes).to_le_bytes());
            desc[0x10..0x12].copy_from_slice(&layout.used_dirs.to_le_bytes());
            descriptors.extend_from_slice(&desc);

            free_blocks_total += free_blocks;
            free_inodes_total += free_inodes;
        }

        let gdt_at = (self.spec.first_data_block() + 1) as usize * bs;
        self.image[gdt_at..gdt_at + descriptors.len()].copy_from_slice(&descriptors);

        let sb = self.encode_superblock(free_blocks_total, free_inodes_total);
        self.image[EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + sb.len()].copy_from_slice(&sb);
        self.image
    }

    fn encode_superblock(&self, free_blocks: u32, free_inodes: u32) -> Vec<u8> {
        let s = &self.spec;
        let mut sb = vec![0_u8; dig_types::EXT2_SUPERBLOCK_SIZE];
        let mut put32 = |at: usize, v: u32| sb[at..at + 4].copy_from_slice(&v.to_le_bytes());
        put32(0x00, s.inodes_count);
        put32(0x04, s.blocks_count);
        put32(0x08, 0);
        put32(0x0C, free_blocks);
        put32(0x10, free_inodes);
        put32(0x14, s.first_data_block());
        put32(0x18, s.block_size.trailing_zeros() - 10);
        put32(0x1C, s.block_size.trailing_zeros() - 10);
        put32(0x20, s.blocks_per_group);
        put32(0x24, s.blocks_per_group);
        put32(0x28, s.inodes_per_group);
        put32(0x2C, SAMPLE_EPOCH);
        put32(0x30, SAMPLE_EPOCH);
        put32(0x4C, s.rev_level);
        if s.rev_level != EXT2_GOOD_OLD_REV {
            put32(0x54, EXT2_GOOD_OLD_FIRST_INO);
        }

        sb[0x38..0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
        sb[0x3A..0x3C].copy_from_slice(&1_u16.to_le_bytes()); // clean
        sb[0x3C..0x3E].copy_from_slice(&1_u16.to_le_bytes()); // errors: continue
        if s.rev_level != EXT2_GOOD_OLD_REV {
            sb[0x58..0x5A].copy_from_slice(&s.inode_size.to_le_bytes());
        }
        let name = s.volume_name.as_bytes();
        let n = name.len().min(16);
        sb[0x78..0x78 + n].copy_from_slice(&name[..n]);
        sb
    }
}

fn saturate_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

/// Build the sample image used by `mkimage`, the benches and the e2e tests.
///
/// ```text
/// /            inode 2
/// ├── lost+found   11
/// ├── hello.txt    12  one block
/// ├── big.bin      13  300 blocks: direct, single and double indirect
/// ├── link         14  fast symlink -> hello.txt
/// └── docs         15
///     ├── readme   16  one block
///     └── far.txt  65  one block, inode in group 1
/// ```
pub fn sample_image() -> Result<Vec<u8>> {
    let mut b = ImageBuilder::new(ImageSpec::tiny_1k())?;

    b.add_directory(
        2,
        2,
        0o755,
        &[
            DirEntrySpec::new(11, "lost+found", FT_DIR),
            DirEntrySpec::new(12, "hello.txt", FT_REG_FILE),
            DirEntrySpec::new(13, "big.bin", FT_REG_FILE),
            DirEntrySpec::new(14, "link", FT_SYMLINK),
            DirEntrySpec::new(15, "docs", FT_DIR),
        ],
    )?;
    b.add_directory(11, 2, 0o700, &[])?;
    b.add_file(12, 0o644, 13, 1)?;
    b.add_file(13, 0o600, 300 * 1024, 300)?;
    b.add_fast_symlink(14, "hello.txt")?;
    b.add_directory(
        15,
        2,
        0o750,
        &[
            DirEntrySpec::new(16, "readme", FT_REG_FILE),
            DirEntrySpec::new(65, "far.txt", FT_REG_FILE),
        ],
    )?;
    b.add_file(16, 0o444, 100, 1)?;
    b.add_file(65, 0o640, 2000, 2)?;
    Ok(b.finish())
}
