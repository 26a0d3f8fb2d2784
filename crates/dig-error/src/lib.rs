#![forbid(unsafe_code)]
//! Error types for ext2dig.
//!
//! # Error Taxonomy
//!
//! ext2dig uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `dig-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `DigError` | `dig-error` (this crate) | Errors surfaced by the scan engine and the CLI |
//!
//! ## Mapping Policy: ParseError → DigError
//!
//! `dig-error` does not depend on `dig-types`. The conversion from
//! `ParseError` to `DigError` lives in `dig-scan`, which depends on both:
//!
//! | ParseError Variant | DigError Variant |
//! |--------------------|------------------|
//! | `InsufficientData` | `Corruption { block, detail }` |
//! | `InvalidMagic` | `Format(detail)` |
//! | `InvalidField` | `Format` / `InvalidGeometry` / `UnsupportedBlockSize` |
//! | `IntegerConversion` | `Corruption { block, detail }` |
//!
//! ## Fatal vs. per-entity
//!
//! The error type itself does not decide severity. Errors raised while
//! reading the superblock or the group descriptor table abort the scan; the
//! same variants raised while reading one inode, directory block, bitmap
//! block, or pointer block are logged by the scanner and that entity is
//! skipped.
//!
//! ## CLI exit codes
//!
//! [`DigError::exit_code`] maps every variant to the process exit status:
//! `1` when the image itself could not be accessed, `2` when it was read but
//! is not a parseable ext2 filesystem.

use thiserror::Error;

/// Unified error type for ext2dig operations.
#[derive(Debug, Error)]
pub enum DigError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A positioned read extends past the end of the image.
    #[error("short read: need {len} bytes at offset {offset}, image is {image_len} bytes")]
    Truncated {
        offset: u64,
        len: usize,
        image_len: u64,
    },

    /// On-disk metadata corruption detected at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The image is not an ext2 filesystem (bad magic, unknown layout).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Superblock geometry that makes the scan arithmetically impossible.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Block size outside the 1K/2K/4K family.
    #[error("unsupported block size: {0}")]
    UnsupportedBlockSize(String),
}

impl DigError {
    /// Process exit status for this error.
    ///
    /// The mapping is exhaustive so a new variant must pick a status.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Truncated { .. }
            | Self::Corruption { .. }
            | Self::Format(_)
            | Self::InvalidGeometry(_)
            | Self::UnsupportedBlockSize(_) => 2,
        }
    }

    /// Whether this error came from a read that ran off the end of the image.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
            || matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result alias using `DigError`.
pub type Result<T> = std::result::Result<T, DigError>;
