#![forbid(unsafe_code)]
//! Inode records and table.
//!
//! The inode at index `v` is the metadata of tree node `v`; the table and
//! the FLOUDS sequences move in lockstep on insert and remove, so a node
//! position doubles as its inode number.

use sfs_error::{Result, SfsError};
use sfs_types::{ByteCursor, DiskImage, ExtentHandle, put_len};

/// On-disk size of one inode record:
/// `u64 handle, u64 size, u32 mode, i64 mtime, i64 atime, i64 ctime`.
pub const INODE_RECORD_SIZE: usize = 44;

/// Fixed-size metadata record for one tree node.
///
/// `extent` is the node's data extent ([`ExtentHandle::NONE`] until the
/// first allocation); timestamps are Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inode {
    pub extent: ExtentHandle,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

impl Inode {
    fn write_record(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.extent.0.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.atime.to_le_bytes());
        out.extend_from_slice(&self.ctime.to_le_bytes());
    }

    fn read_record(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(Self {
            extent: ExtentHandle(cursor.read_u64()?),
            size: cursor.read_u64()?,
            mode: cursor.read_u32()?,
            mtime: cursor.read_i64()?,
            atime: cursor.read_i64()?,
            ctime: cursor.read_i64()?,
        })
    }
}

/// Sequence of inode records indexed by tree position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InodeTable {
    inodes: Vec<Inode>,
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self { inodes: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    fn check(&self, op: &'static str, index: usize) -> Result<()> {
        if index >= self.inodes.len() {
            return Err(SfsError::out_of_range(op, index, self.inodes.len()));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&Inode> {
        self.check("inode get", index)?;
        Ok(&self.inodes[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Inode> {
        self.check("inode get", index)?;
        Ok(&mut self.inodes[index])
    }

    /// Insert a zero-filled record at `index`, shifting later records.
    pub fn insert(&mut self, index: usize) -> Result<&mut Inode> {
        if index > self.inodes.len() {
            return Err(SfsError::out_of_range(
                "inode insert",
                index,
                self.inodes.len(),
            ));
        }
        self.inodes.insert(index, Inode::default());
        Ok(&mut self.inodes[index])
    }

    /// Remove the record at `index`, shifting later records.
    pub fn remove(&mut self, index: usize) -> Result<Inode> {
        self.check("inode remove", index)?;
        Ok(self.inodes.remove(index))
    }
}

impl DiskImage for InodeTable {
    fn serialized_size(&self) -> usize {
        8 + self.inodes.len() * INODE_RECORD_SIZE
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        put_len(out, self.inodes.len());
        for inode in &self.inodes {
            inode.write_record(out);
        }
    }

    fn deserialize(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let count = cursor.read_len("inode table")?;
        let mut inodes = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            inodes.push(Inode::read_record(cursor)?);
        }
        Ok(Self { inodes })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_zero_filled_and_positional() {
        let mut table = InodeTable::new();
        table.insert(0).unwrap().mode = 0o755;
        table.insert(1).unwrap().mode = 0o644;
        // A sibling inserted in front shifts the others right.
        table.insert(1).unwrap().mode = 0o600;

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0).unwrap().mode, 0o755);
        assert_eq!(table.get(1).unwrap().mode, 0o600);
        assert_eq!(table.get(2).unwrap().mode, 0o644);
        assert_eq!(table.get(1).unwrap().size, 0);
        assert_eq!(table.get(1).unwrap().extent, ExtentHandle::NONE);
        assert!(table.insert(5).is_err());
    }

    #[test]
    fn remove_shifts_left() {
        let mut table = InodeTable::new();
        for i in 0..3 {
            table.insert(i).unwrap().size = i as u64 * 10;
        }
        let gone = table.remove(1).unwrap();
        assert_eq!(gone.size, 10);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().size, 20);
        assert!(table.remove(2).is_err());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut table = InodeTable::new();
        table.insert(0).unwrap();
        {
            let inode = table.get_mut(0).unwrap();
            inode.size = 4096;
            inode.mtime = 1_700_000_000;
        }
        assert_eq!(table.get(0).unwrap().size, 4096);
        assert_eq!(table.get(0).unwrap().mtime, 1_700_000_000);
        assert!(table.get(1).is_err());
    }

    #[test]
    fn record_layout_is_44_bytes_le() {
        let mut table = InodeTable::new();
        {
            let inode = table.insert(0).unwrap();
            inode.extent = ExtentHandle(7);
            inode.size = 0x0102_0304;
            inode.mode = 0o100_644;
            inode.mtime = -1;
            inode.atime = 2;
            inode.ctime = 3;
        }
        let blob = table.to_bytes();
        assert_eq!(blob.len(), 8 + INODE_RECORD_SIZE);
        assert_eq!(&blob[0..8], &1_u64.to_le_bytes());
        assert_eq!(&blob[8..16], &7_u64.to_le_bytes());
        assert_eq!(&blob[16..24], &0x0102_0304_u64.to_le_bytes());
        assert_eq!(&blob[24..28], &0o100_644_u32.to_le_bytes());
        assert_eq!(&blob[28..36], &(-1_i64).to_le_bytes());
        assert_eq!(&blob[36..44], &2_i64.to_le_bytes());
        assert_eq!(&blob[44..52], &3_i64.to_le_bytes());
    }

    #[test]
    fn serialization_roundtrip() {
        let mut table = InodeTable::new();
        for i in 0..5 {
            let inode = table.insert(i).unwrap();
            inode.extent = ExtentHandle(i as u64 + 1);
            inode.size = i as u64 * 1000;
            inode.mode = 0o100_600 + i as u32;
            inode.mtime = 1_700_000_000 + i as i64;
        }
        let blob = table.to_bytes();
        assert_eq!(blob.len(), table.serialized_size());

        let mut cursor = ByteCursor::new(&blob);
        let back = InodeTable::deserialize(&mut cursor).unwrap();
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(back, table);
    }

    #[test]
    fn deserialize_rejects_truncated_records() {
        let mut blob = Vec::new();
        put_len(&mut blob, 2);
        blob.extend_from_slice(&[0_u8; INODE_RECORD_SIZE]); // only one record
        let mut cursor = ByteCursor::new(&blob);
        assert!(InodeTable::deserialize(&mut cursor).is_err());
    }
}
