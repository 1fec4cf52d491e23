//! Indexed sequence of variable-length byte strings.
//!
//! Holds the file and directory names of the filesystem, addressed by the
//! same positions as the other FLOUDS sequences. Two representations:
//!
//! - `Flat` — a plain `Vec<Vec<u8>>`. Reference/testing.
//! - `Concat` — one contiguous byte buffer plus a boundary bitvector in
//!   which bit `j` is set iff byte `j` starts a name. Keeps the per-name
//!   metadata succinct; production default.
//!
//! Both serialize to the concatenated form, so images are representation
//! independent. Names must be non-empty: an empty name has no boundary bit
//! to carry it.

use crate::bitvec::{BitVectorKind, DynamicBitVector};
use sfs_error::{Result, SfsError};
use sfs_types::{ByteCursor, DiskImage, put_len};

/// Representation chosen at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSequenceKind {
    /// Plain vector of owned names. Reference/testing.
    Flat,
    /// Concatenated bytes + boundary bitvector. Production.
    Concat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConcatNames {
    bytes: Vec<u8>,
    boundaries: DynamicBitVector,
}

impl ConcatNames {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            boundaries: DynamicBitVector::new(BitVectorKind::Tree, 0),
        }
    }

    fn len(&self) -> usize {
        if self.boundaries.is_empty() {
            0
        } else {
            // Every name contributes exactly one boundary bit.
            self.boundaries
                .rank1(self.boundaries.len() - 1)
                .unwrap_or(0)
        }
    }

    /// Byte range `[start, end)` of the name at `position` (`< len`).
    fn span(&self, position: usize) -> Result<(usize, usize)> {
        let start = self.boundaries.select1(position + 1)?;
        let end = if position + 1 == self.len() {
            self.bytes.len()
        } else {
            self.boundaries.select1(position + 2)?
        };
        Ok((start, end))
    }

    fn access(&self, position: usize) -> Result<&[u8]> {
        let (start, end) = self.span(position)?;
        Ok(&self.bytes[start..end])
    }

    fn insert(&mut self, position: usize, name: &[u8]) -> Result<()> {
        let char_pos = if position == 0 {
            0
        } else if position == self.len() {
            self.bytes.len()
        } else {
            self.boundaries.select1(position + 1)?
        };
        self.bytes.splice(char_pos..char_pos, name.iter().copied());
        for j in 0..name.len() {
            self.boundaries.insert(char_pos + j, j == 0)?;
        }
        Ok(())
    }

    fn delete(&mut self, position: usize) -> Result<()> {
        let (start, end) = self.span(position)?;
        self.bytes.drain(start..end);
        for _ in start..end {
            self.boundaries.delete(start)?;
        }
        Ok(())
    }
}

/// Ordered sequence of names with positional access and updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSequence {
    Flat(Vec<Vec<u8>>),
    Concat(ConcatNamesSeq),
}

/// Public wrapper keeping the concat internals private.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatNamesSeq(ConcatNames);

impl NameSequence {
    /// Create an empty sequence with the given representation.
    #[must_use]
    pub fn new(kind: NameSequenceKind) -> Self {
        match kind {
            NameSequenceKind::Flat => Self::Flat(Vec::new()),
            NameSequenceKind::Concat => Self::Concat(ConcatNamesSeq(ConcatNames::new())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> NameSequenceKind {
        match self {
            Self::Flat(_) => NameSequenceKind::Flat,
            Self::Concat(_) => NameSequenceKind::Concat,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(names) => names.len(),
            Self::Concat(seq) => seq.0.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name at `position`.
    pub fn access(&self, position: usize) -> Result<&[u8]> {
        if position >= self.len() {
            return Err(SfsError::out_of_range("name access", position, self.len()));
        }
        match self {
            Self::Flat(names) => Ok(&names[position]),
            Self::Concat(seq) => seq.0.access(position),
        }
    }

    /// Insert `name` at `position <= len`, shifting later names right.
    pub fn insert(&mut self, position: usize, name: &[u8]) -> Result<()> {
        if position > self.len() {
            return Err(SfsError::out_of_range("name insert", position, self.len()));
        }
        if name.is_empty() {
            return Err(SfsError::InvariantViolation(
                "empty name has no boundary bit".to_owned(),
            ));
        }
        match self {
            Self::Flat(names) => {
                names.insert(position, name.to_vec());
                Ok(())
            }
            Self::Concat(seq) => seq.0.insert(position, name),
        }
    }

    /// Remove the name at `position`, shifting later names left.
    pub fn delete(&mut self, position: usize) -> Result<()> {
        if position >= self.len() {
            return Err(SfsError::out_of_range("name delete", position, self.len()));
        }
        match self {
            Self::Flat(names) => {
                names.remove(position);
                Ok(())
            }
            Self::Concat(seq) => seq.0.delete(position),
        }
    }

    /// Replace the name at `position`.
    pub fn set(&mut self, position: usize, name: &[u8]) -> Result<()> {
        if position >= self.len() {
            return Err(SfsError::out_of_range("name set", position, self.len()));
        }
        if name.is_empty() {
            return Err(SfsError::InvariantViolation(
                "empty name has no boundary bit".to_owned(),
            ));
        }
        match self {
            Self::Flat(names) => {
                names[position] = name.to_vec();
                Ok(())
            }
            Self::Concat(seq) => {
                // Insert before deleting: a failed insert leaves the old
                // name in place instead of losing it.
                seq.0.insert(position, name)?;
                seq.0.delete(position + 1)
            }
        }
    }

    /// Decode a blob into the given representation.
    pub fn deserialize_with(kind: NameSequenceKind, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let byte_len = cursor.read_len("name bytes")?;
        let bytes = cursor.take(byte_len)?.to_vec();
        let boundaries = DynamicBitVector::deserialize_with(BitVectorKind::Tree, cursor)?;
        if boundaries.len() != bytes.len() {
            return Err(SfsError::InvalidImage(format!(
                "name boundary bitvector has {} bits for {} bytes",
                boundaries.len(),
                bytes.len()
            )));
        }
        if !bytes.is_empty() && !boundaries.access(0)? {
            return Err(SfsError::InvalidImage(
                "name byte stream does not start on a boundary".to_owned(),
            ));
        }
        let concat = ConcatNames { bytes, boundaries };
        match kind {
            NameSequenceKind::Concat => Ok(Self::Concat(ConcatNamesSeq(concat))),
            NameSequenceKind::Flat => {
                let mut names = Vec::with_capacity(concat.len());
                for i in 0..concat.len() {
                    names.push(concat.access(i)?.to_vec());
                }
                Ok(Self::Flat(names))
            }
        }
    }

    fn concat_view(&self) -> (Vec<u8>, DynamicBitVector) {
        match self {
            Self::Concat(seq) => (seq.0.bytes.clone(), seq.0.boundaries.clone()),
            Self::Flat(names) => {
                let total: usize = names.iter().map(Vec::len).sum();
                let mut bytes = Vec::with_capacity(total);
                let mut words = vec![0_u64; total.div_ceil(64)];
                for name in names {
                    let start = bytes.len();
                    words[start / 64] |= 1 << (start % 64);
                    bytes.extend_from_slice(name);
                }
                (
                    bytes,
                    DynamicBitVector::from_words(BitVectorKind::Word, words, total),
                )
            }
        }
    }
}

impl DiskImage for NameSequence {
    fn serialized_size(&self) -> usize {
        let (bytes, boundaries) = self.concat_view();
        8 + bytes.len() + boundaries.serialized_size()
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        let (bytes, boundaries) = self.concat_view();
        put_len(out, bytes.len());
        out.extend_from_slice(&bytes);
        boundaries.serialize_into(out);
    }

    fn deserialize(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Self::deserialize_with(NameSequenceKind::Concat, cursor)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
