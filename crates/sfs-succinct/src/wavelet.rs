//! Balanced two-bit wavelet tree.
//!
//! A sequence over the alphabet {0,1,2,3}, layered on three dynamic
//! bitvectors: `root` holds the high bit of every symbol; `left` holds the
//! low bits of symbols with high bit 0 (in original order), `right` those
//! with high bit 1. The children are partitioned, so
//! `left.len() + right.len() == root.len()` and every operation touches a
//! constant number of bitvector calls.
//!
//! Rank is inclusive and select is 1-indexed, matching the bitvectors.

use crate::bitvec::{BitVectorKind, DynamicBitVector};
use sfs_error::{Result, SfsError};
use sfs_types::{ByteCursor, DiskImage};

/// Largest valid symbol.
pub const MAX_SYMBOL: u8 = 3;

/// Decompose a symbol into (high, low) bits, rejecting values outside the
/// alphabet.
fn split_symbol(symbol: u8) -> Result<(bool, bool)> {
    if symbol > MAX_SYMBOL {
        return Err(SfsError::InvalidSymbol { symbol });
    }
    Ok((symbol >= 2, symbol & 1 == 1))
}

/// Sequence of 2-bit symbols with rank/select/insert/delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoBitWaveletTree {
    root: DynamicBitVector,
    left: DynamicBitVector,
    right: DynamicBitVector,
}

impl TwoBitWaveletTree {
    /// Create an empty sequence with the given bitvector representation.
    #[must_use]
    pub fn new(kind: BitVectorKind) -> Self {
        Self {
            root: DynamicBitVector::new(kind, 0),
            left: DynamicBitVector::new(kind, 0),
            right: DynamicBitVector::new(kind, 0),
        }
    }

    /// Build from a symbol slice, partitioning in a single pass.
    pub fn from_symbols(kind: BitVectorKind, symbols: &[u8]) -> Result<Self> {
        let mut tree = Self::new(kind);
        for (i, &symbol) in symbols.iter().enumerate() {
            tree.insert(i, symbol)?;
        }
        Ok(tree)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn check(&self, op: &'static str, i: usize) -> Result<()> {
        if i >= self.len() {
            return Err(SfsError::out_of_range(op, i, self.len()));
        }
        Ok(())
    }

    fn child(&self, high: bool) -> &DynamicBitVector {
        if high { &self.right } else { &self.left }
    }

    fn child_mut(&mut self, high: bool) -> &mut DynamicBitVector {
        if high { &mut self.right } else { &mut self.left }
    }

    /// Occurrences of `high` in `root[0..=i]`; always >= 1 when `root[i]`
    /// carries that bit.
    fn root_rank(&self, high: bool, i: usize) -> Result<usize> {
        if high {
            self.root.rank1(i)
        } else {
            self.root.rank0(i)
        }
    }

    /// Symbol at position `i`.
    pub fn access(&self, i: usize) -> Result<u8> {
        self.check("wavelet access", i)?;
        let high = self.root.access(i)?;
        let child_pos = self.root_rank(high, i)? - 1;
        let low = self.child(high).access(child_pos)?;
        Ok(u8::from(high) * 2 + u8::from(low))
    }

    /// Replace the symbol at `i`, migrating the low bit between children
    /// when the high bit flips.
    pub fn set(&mut self, i: usize, symbol: u8) -> Result<()> {
        let (high, low) = split_symbol(symbol)?;
        self.check("wavelet set", i)?;
        let old = self.access(i)?;
        if old == symbol {
            return Ok(());
        }
        let old_high = old >= 2;
        if old_high == high {
            let child_pos = self.root_rank(high, i)? - 1;
            self.child_mut(high).set(child_pos, low)?;
        } else {
            let old_pos = self.root_rank(old_high, i)? - 1;
            self.child_mut(old_high).delete(old_pos)?;
            self.root.set(i, high)?;
            let new_pos = self.root_rank(high, i)? - 1;
            self.child_mut(high).insert(new_pos, low)?;
        }
        Ok(())
    }

    /// Occurrences of `symbol` in `W[0..=i]` (inclusive).
    pub fn rank(&self, symbol: u8, i: usize) -> Result<usize> {
        let (high, low) = split_symbol(symbol)?;
        self.check("wavelet rank", i)?;
        let r = self.root_rank(high, i)?;
        if r == 0 {
            return Ok(0);
        }
        let child = self.child(high);
        if low {
            child.rank1(r - 1)
        } else {
            child.rank0(r - 1)
        }
    }

    /// Position of the k-th (1-based) occurrence of `symbol`.
    pub fn select(&self, symbol: u8, k: usize) -> Result<usize> {
        let (high, low) = split_symbol(symbol)?;
        let child = self.child(high);
        let child_pos = if low {
            child.select1(k)?
        } else {
            child.select0(k)?
        };
        if high {
            self.root.select1(child_pos + 1)
        } else {
            self.root.select0(child_pos + 1)
        }
    }

    /// Insert `symbol` at `i <= len`, shifting the sequence right.
    pub fn insert(&mut self, i: usize, symbol: u8) -> Result<()> {
        let (high, low) = split_symbol(symbol)?;
        if i > self.len() {
            return Err(SfsError::out_of_range("wavelet insert", i, self.len()));
        }
        let child_pos = if i == 0 {
            0
        } else {
            self.root_rank(high, i - 1)?
        };
        self.root.insert(i, high)?;
        self.child_mut(high).insert(child_pos, low)?;
        Ok(())
    }

    /// Delete the symbol at `i < len`, shifting the sequence left.
    pub fn delete(&mut self, i: usize) -> Result<()> {
        self.check("wavelet delete", i)?;
        let high = self.root.access(i)?;
        let child_pos = self.root_rank(high, i)? - 1;
        self.root.delete(i)?;
        self.child_mut(high).delete(child_pos)?;
        Ok(())
    }

    /// Decode a blob into the given bitvector representation.
    pub fn deserialize_with(kind: BitVectorKind, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let root = DynamicBitVector::deserialize_with(kind, cursor)?;
        let left = DynamicBitVector::deserialize_with(kind, cursor)?;
        let right = DynamicBitVector::deserialize_with(kind, cursor)?;
        if left.len() + right.len() != root.len() || root.count_ones() != right.len() {
            return Err(SfsError::InvalidImage(format!(
                "wavelet partition mismatch: root {} bits ({} high), left {}, right {}",
                root.len(),
                root.count_ones(),
                left.len(),
                right.len()
            )));
        }
        Ok(Self { root, left, right })
    }
}

impl DiskImage for TwoBitWaveletTree {
    fn serialized_size(&self) -> usize {
        self.root.serialized_size() + self.left.serialized_size() + self.right.serialized_size()
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        self.root.serialize_into(out);
        self.left.serialize_into(out);
        self.right.serialize_into(out);
    }

    fn deserialize(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Self::deserialize_with(BitVectorKind::Tree, cursor)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
