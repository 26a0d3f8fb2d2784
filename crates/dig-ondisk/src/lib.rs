#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate: no I/O, no side effects. Turns byte slices into typed
//! superblocks, group descriptors, inodes, directory entries, and indirect
//! pointer lists.

pub mod ext2;

pub use ext2::{
    DirBlockWalker, DirWalkEnd, EXT2_INODE_CORE_SIZE, Ext2DirEntryRef, Ext2GroupDesc, Ext2Inode,
    Ext2Superblock, InodeKind, nonzero_pointers, parse_group_desc_table,
};
