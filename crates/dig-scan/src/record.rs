//! Output records, one per discovered entity.
//!
//! [`Record::write_row`] renders the comma-separated row form consumed by
//! downstream checkers, copying directory entry names byte for byte.
//! `Display` renders the same row with names decoded lossily, and
//! `Serialize` renders the data tagged by `kind`.

use crate::time::format_timestamp;
use dig_types::EXT2_N_BLOCKS;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{self, Write};

/// Record kinds in canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Superblock,
    Group,
    Bfree,
    Ifree,
    Inode,
    Dirent,
    Indirect,
}

impl RecordKind {
    pub const ALL: [Self; 7] = [
        Self::Superblock,
        Self::Group,
        Self::Bfree,
        Self::Ifree,
        Self::Inode,
        Self::Dirent,
        Self::Indirect,
    ];

    /// Leading tag of the row.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Superblock => "SUPERBLOCK",
            Self::Group => "GROUP",
            Self::Bfree => "BFREE",
            Self::Ifree => "IFREE",
            Self::Inode => "INODE",
            Self::Dirent => "DIRENT",
            Self::Indirect => "INDIRECT",
        }
    }

    /// Per-kind CSV file name used by `--out-dir`.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Superblock => "superblock.csv",
            Self::Group => "group.csv",
            Self::Bfree => "bfree.csv",
            Self::Ifree => "ifree.csv",
            Self::Inode => "inode.csv",
            Self::Dirent => "dirent.csv",
            Self::Indirect => "indirect.csv",
        }
    }

    /// Position in [`RecordKind::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuperblockRecord {
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub block_size: u32,
    pub inode_size: u16,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub first_ino: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub group: u32,
    pub blocks_in_group: u32,
    pub inodes_in_group: u32,
    pub free_blocks: u16,
    pub free_inodes: u16,
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeRecord {
    pub inode: u64,
    /// `f`, `d`, `s` or `?`.
    pub file_type: char,
    /// `mode & 0o7777`, rendered in octal in rows.
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub links: u16,
    /// Epoch seconds; rows render `MM/DD/YY HH:MM:SS` UTC.
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub size: u64,
    pub blocks: u32,
    pub block: [u32; EXT2_N_BLOCKS],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirentRecord {
    pub parent: u64,
    /// Byte offset of the entry within its directory block.
    pub offset: u32,
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    /// Exactly `name_len` on-disk bytes; not necessarily UTF-8.
    #[serde(serialize_with = "serialize_name_lossy")]
    pub name: Vec<u8>,
}

fn serialize_name_lossy<S: Serializer>(name: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndirectRecord {
    pub inode: u64,
    /// Indirection level of the block holding the pointer (1..=3).
    pub level: u8,
    /// Logical block offset the pointer covers.
    pub logical_offset: u64,
    pub containing_block: u32,
    pub pointer: u32,
}

/// One extracted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    Superblock(SuperblockRecord),
    Group(GroupRecord),
    Bfree { block: u64 },
    Ifree { inode: u64 },
    Inode(InodeRecord),
    Dirent(DirentRecord),
    Indirect(IndirectRecord),
}

impl Record {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Superblock(_) => RecordKind::Superblock,
            Self::Group(_) => RecordKind::Group,
            Self::Bfree { .. } => RecordKind::Bfree,
            Self::Ifree { .. } => RecordKind::Ifree,
            Self::Inode(_) => RecordKind::Inode,
            Self::Dirent(_) => RecordKind::Dirent,
            Self::Indirect(_) => RecordKind::Indirect,
        }
    }

    /// Write the row and its newline to `out`.
    ///
    /// Unlike `Display`, DIRENT names are written as raw bytes.
    pub fn write_row(&self, out: &mut impl Write) -> io::Result<()> {
        match self {
            Self::Dirent(d) => {
                write!(
                    out,
                    "{},{},{},{},{},{},'",
                    RecordKind::Dirent.tag(),
                    d.parent,
                    d.offset,
                    d.inode,
                    d.rec_len,
                    d.name_len
                )?;
                out.write_all(&d.name)?;
                out.write_all(b"'\n")
            }
            other => writeln!(out, "{other}"),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.kind().tag();
        match self {
            Self::Superblock(sb) => write!(
                f,
                "{tag},{},{},{},{},{},{},{}",
                sb.blocks_count,
                sb.inodes_count,
                sb.block_size,
                sb.inode_size,
                sb.blocks_per_group,
                sb.inodes_per_group,
                sb.first_ino
            ),
            Self::Group(g) => write!(
                f,
                "{tag},{},{},{},{},{},{},{},{}",
                g.group,
                g.blocks_in_group,
                g.inodes_in_group,
                g.free_blocks,
                g.free_inodes,
                g.block_bitmap,
                g.inode_bitmap,
                g.inode_table
            ),
            Self::Bfree { block } => write!(f, "{tag},{block}"),
            Self::Ifree { inode } => write!(f, "{tag},{inode}"),
            Self::Inode(ino) => {
                write!(
                    f,
                    "{tag},{},{},{:o},{},{},{},{},{},{},{},{}",
                    ino.inode,
                    ino.file_type,
                    ino.perm,
                    ino.uid,
                    ino.gid,
                    ino.links,
                    format_timestamp(ino.ctime),
                    format_timestamp(ino.mtime),
                    format_timestamp(ino.atime),
                    ino.size,
                    ino.blocks
                )?;
                for ptr in &ino.block {
                    write!(f, ",{ptr}")?;
                }
                Ok(())
            }
            Self::Dirent(d) => write!(
                f,
                "{tag},{},{},{},{},{},'{}'",
                d.parent,
                d.offset,
                d.inode,
                d.rec_len,
                d.name_len,
                String::from_utf8_lossy(&d.name)
            ),
            Self::Indirect(ind) => write!(
                f,
                "{tag},{},{},{},{},{}",
                ind.inode, ind.level, ind.logical_offset, ind.containing_block, ind.pointer
            ),
        }
    }
}
