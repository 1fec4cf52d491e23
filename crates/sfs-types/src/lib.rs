#![forbid(unsafe_code)]
//! Shared types for SuccinctFS.
//!
//! Newtypes for block and extent identifiers, little-endian codec helpers,
//! and the [`DiskImage`] contract every persisted component implements.

use serde::{Deserialize, Serialize};
use sfs_error::{Result, SfsError};
use std::fmt;

/// Default block size for filesystem images.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Block index on a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Identity of an allocated extent: the index of its first block.
///
/// Handle 0 is never a valid extent — block 0 holds the filesystem header.
/// A zero handle therefore doubles as "nothing allocated yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ExtentHandle(pub u64);

impl ExtentHandle {
    pub const NONE: Self = Self(0);

    /// Whether this handle refers to an allocated extent.
    #[must_use]
    pub fn is_allocated(self) -> bool {
        self.0 != 0
    }

    /// Byte offset of the extent's first block.
    #[must_use]
    pub fn byte_offset(self, block_size: u32) -> u64 {
        self.0 * u64::from(block_size)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ExtentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of whole blocks needed to hold `size` bytes.
#[must_use]
pub fn blocks_for(size: u64, block_size: u32) -> u64 {
    size.div_ceil(u64::from(block_size))
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u32 = 0o170_000;
/// Directory.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file.
pub const S_IFREG: u32 = 0o100_000;

// ── Byte-level codec ────────────────────────────────────────────────────────
//
// The on-disk format is explicit little-endian throughout. These helpers are
// the only place the encoding is spelled out.

/// Sequential reader over a serialized blob.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `len` bytes, advancing the cursor.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                SfsError::InvalidImage(format!(
                    "truncated blob: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Read a `u64` length prefix and narrow it to `usize`.
    pub fn read_len(&mut self, field: &'static str) -> Result<usize> {
        let raw = self.read_u64()?;
        usize::try_from(raw)
            .map_err(|_| SfsError::InvalidImage(format!("{field} length {raw} overflows usize")))
    }
}

/// Append a `usize` length as a `u64` prefix.
pub fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

/// Uniform encode/decode contract for every persisted component.
///
/// `serialized_size` must return exactly `serialize_into`'s output length
/// without performing the encoding, and `deserialize` must consume exactly
/// that many bytes.
pub trait DiskImage: Sized {
    /// Byte count of the serialized form.
    fn serialized_size(&self) -> usize;

    /// Append the serialized form to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>);

    /// Decode from a cursor, consuming exactly the serialized length.
    fn deserialize(cursor: &mut ByteCursor<'_>) -> Result<Self>;

    /// Convenience: serialize into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut out);
        out
    }
}
