#![forbid(unsafe_code)]
//! Test harness for ext2dig: synthetic images and sparse JSON fixtures.

pub mod image;

pub use image::{DirEntrySpec, ImageBuilder, ImageSpec, InodeSpec, sample_image};

use anyhow::{Context, Result, bail};
use dig_ondisk::{Ext2GroupDesc, Ext2Superblock};
use dig_types::{EXT2_GROUP_DESC_SIZE, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Chunk granularity used when capturing an image as a sparse fixture.
pub const FIXTURE_CHUNK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Capture every non-zero `chunk`-byte run of `image`.
    ///
    /// Adjacent non-zero chunks are merged into a single write.
    #[must_use]
    pub fn from_image(image: &[u8], chunk: usize) -> Self {
        let chunk = chunk.max(1);
        let mut writes: Vec<FixtureWrite> = Vec::new();
        let mut run: Option<(usize, usize)> = None;

        for (index, piece) in image.chunks(chunk).enumerate() {
            let offset = index * chunk;
            if piece.iter().any(|b| *b != 0) {
                run = Some(match run {
                    Some((start, _)) => (start, offset + piece.len()),
                    None => (offset, offset + piece.len()),
                });
            } else if let Some((start, end)) = run.take() {
                writes.push(FixtureWrite {
                    offset: start,
                    hex: hex::encode(&image[start..end]),
                });
            }
        }
        if let Some((start, end)) = run {
            writes.push(FixtureWrite {
                offset: start,
                hex: hex::encode(&image[start..end]),
            });
        }

        Self {
            size: image.len(),
            writes,
        }
    }

    /// Materialize the fixture into a zero-filled buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;

            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }

            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.to_bytes()
}

/// Decode the superblock of a fixture image.
pub fn validate_superblock_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    let region = data
        .get(EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE)
        .with_context(|| format!("fixture {} too small for a superblock", path.display()))?;
    Ext2Superblock::parse_superblock_region(region)
        .with_context(|| format!("failed ext2 parse for fixture {}", path.display()))
}

/// Decode the first group descriptor of a fixture image.
pub fn validate_group_desc_fixture(path: &Path) -> Result<Ext2GroupDesc> {
    let sb = validate_superblock_fixture(path)?;
    let data = load_sparse_fixture(path)?;
    let offset = sb
        .group_desc_table_offset()
        .and_then(|o| usize::try_from(o).ok())
        .context("descriptor table offset overflow")?;
    let raw = data
        .get(offset..offset + EXT2_GROUP_DESC_SIZE)
        .context("fixture too small for a group descriptor")?;
    Ext2GroupDesc::parse_from_bytes(raw)
        .with_context(|| format!("failed group descriptor parse for {}", path.display()))
}
