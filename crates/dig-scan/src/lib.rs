#![forbid(unsafe_code)]
//! ext2 metadata extraction engine.
//!
//! A [`ScanSession`] reads the superblock and group descriptor table once,
//! then drives the component scanners in a fixed order:
//!
//! 1. superblock row, one group row per block group;
//! 2. free-block then free-inode rows from the allocation bitmaps;
//! 3. the inode table, with each live inode followed by its directory
//!    entries and indirect pointer rows.
//!
//! Every record is handed to a [`RecordSink`]. Nothing here writes to the
//! image.

pub mod bitmap;
pub mod dirent;
pub mod geometry;
pub mod indirect;
pub mod inode;
pub mod record;
pub mod session;
pub mod sink;
pub mod time;

use dig_block::ByteDevice;
use dig_error::{DigError, Result};
use dig_types::ParseError;
use serde::{Deserialize, Serialize};

pub use geometry::Ext2Geometry;
pub use record::{
    DirentRecord, GroupRecord, IndirectRecord, InodeRecord, Record, RecordKind, SuperblockRecord,
};
pub use session::ScanSession;
pub use sink::{CsvWriter, JsonLinesWriter, RecordSink, RecordStreams};
pub use time::format_timestamp;

/// What the directory parser does with an entry whose inode ref is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TombstonePolicy {
    /// End the current directory block at the first tombstone.
    #[default]
    Stop,
    /// Step over the tombstone and keep walking the block.
    Skip,
}

/// Options controlling a scan.
///
/// The defaults reproduce the classic extraction behaviour. Turn validation
/// off only when inspecting an image whose magic or block size is known to
/// be damaged.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Skip the magic and block-size checks.
    ///
    /// Geometry that would make the scan divide by zero is still rejected.
    pub skip_validation: bool,
    pub tombstone_policy: TombstonePolicy,
    /// Treat a fast symlink's pointer slots as block pointers.
    ///
    /// When `false`, symlinks shorter than 60 bytes get no indirect rows.
    pub inline_symlink_pointers: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            tombstone_policy: TombstonePolicy::Stop,
            inline_symlink_pointers: true,
        }
    }
}

/// Convert a `ParseError` into the appropriate `DigError` variant.
///
/// This is the crate-boundary conversion described in the `dig-error`
/// taxonomy. `InvalidField` is mapped on the field name so that geometry
/// and block-size problems keep their own variants.
#[must_use]
pub fn parse_error_to_dig(e: &ParseError) -> DigError {
    match e {
        ParseError::InvalidField { field, reason } => {
            if reason.contains("unsupported block size") {
                DigError::UnsupportedBlockSize(format!("{field}: {reason}"))
            } else if field.contains("log_block_size")
                || field.contains("blocks_per_group")
                || field.contains("inodes_per_group")
                || field.contains("inode_size")
            {
                DigError::InvalidGeometry(format!("{field}: {reason}"))
            } else {
                DigError::Format(e.to_string())
            }
        }
        ParseError::InvalidMagic { .. } => DigError::Format(e.to_string()),
        ParseError::InsufficientData { .. } | ParseError::IntegerConversion { .. } => {
            DigError::Corruption {
                block: 0,
                detail: e.to_string(),
            }
        }
    }
}

/// Read one whole filesystem block.
pub(crate) fn read_block(
    dev: &dyn ByteDevice,
    geometry: &Ext2Geometry,
    block: u32,
) -> Result<Vec<u8>> {
    let len = usize::try_from(geometry.block_size)
        .map_err(|_| DigError::InvalidGeometry(format!("block_size {}", geometry.block_size)))?;
    dig_block::read_vec_at(dev, geometry.block_offset(block), len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_classic_behaviour() {
        let opts = ScanOptions::default();
        assert!(!opts.skip_validation);
        assert_eq!(opts.tombstone_policy, TombstonePolicy::Stop);
        assert!(opts.inline_symlink_pointers);
    }

    #[test]
    fn parse_error_mapping() {
        let magic = ParseError::InvalidMagic {
            expected: 0xEF53,
            actual: 0,
        };
        assert!(matches!(parse_error_to_dig(&magic), DigError::Format(_)));

        let bs = ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "unsupported block size",
        };
        assert!(matches!(
            parse_error_to_dig(&bs),
            DigError::UnsupportedBlockSize(_)
        ));

        let shift = ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "invalid shift",
        };
        assert!(matches!(
            parse_error_to_dig(&shift),
            DigError::InvalidGeometry(_)
        ));

        let bpg = ParseError::InvalidField {
            field: "s_blocks_per_group",
            reason: "must be non-zero",
        };
        let mapped = parse_error_to_dig(&bpg);
        assert!(matches!(mapped, DigError::InvalidGeometry(_)));
        assert_eq!(mapped.exit_code(), 2);

        let short = ParseError::InsufficientData {
            needed: 128,
            offset: 0,
            actual: 64,
        };
        assert!(matches!(
            parse_error_to_dig(&short),
            DigError::Corruption { block: 0, .. }
        ));
    }
}
