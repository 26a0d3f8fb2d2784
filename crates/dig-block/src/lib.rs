#![forbid(unsafe_code)]
//! Positioned-read access to filesystem images.
//!
//! Provides the `ByteDevice` trait (pread semantics, no shared cursor), a
//! read-only file-backed implementation, and an in-memory implementation
//! used by tests and the harness. Nothing in this crate ever writes.

use dig_error::{DigError, Result};
use dig_types::{EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Byte-addressed, read-only device for fixed-offset I/O.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// A range that runs past the end of the device is
    /// [`DigError::Truncated`]; nothing is read in that case.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<D: ByteDevice + ?Sized> ByteDevice for &D {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Check that `[offset, offset + len)` lies inside a device of `image_len` bytes.
fn check_range(offset: u64, len: usize, image_len: u64) -> Result<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len));
    match end {
        Some(end) if end <= image_len => Ok(()),
        _ => Err(DigError::Truncated {
            offset,
            len,
            image_len,
        }),
    }
}

/// File-backed byte device using `pread` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position. The file is opened read-only.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(path = %path.as_ref().display(), len, "opened image");
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device over an owned image buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemByteDevice {
    bytes: Vec<u8>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        // check_range proved offset + len <= bytes.len(), so offset fits usize.
        let start = usize::try_from(offset).map_err(|_| DigError::Truncated {
            offset,
            len: buf.len(),
            image_len: self.len_bytes(),
        })?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Read the ext2 superblock region (1024 bytes at offset 1024).
pub fn read_ext2_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    let offset = u64::try_from(EXT2_SUPERBLOCK_OFFSET)
        .map_err(|_| DigError::Format("ext2 superblock offset does not fit u64".to_owned()))?;
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub fn read_vec_at(dev: &dyn ByteDevice, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; len];
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}
