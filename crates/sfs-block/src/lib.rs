#![forbid(unsafe_code)]
//! Block device abstraction.
//!
//! Fixed-size block reads and writes against a backing file, plus an
//! in-memory device for tests and tooling. Block 0 is reserved for the
//! filesystem header by the layers above; this crate does not enforce it.

use sfs_error::{Result, SfsError};
use sfs_types::BlockNumber;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::trace;

/// Block-addressed I/O interface.
///
/// Reads past the end of the backing store yield zero-filled blocks; writes
/// extend it. All I/O is synchronous.
pub trait BlockDevice: std::fmt::Debug + Send {
    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Read one block into `buf`. `buf.len()` must equal `block_size()`.
    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()>;

    /// Write one block from `buf`. `buf.len()` must equal `block_size()`.
    fn write_block(&self, block: BlockNumber, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn check_buf_len(op: &'static str, buf_len: usize, block_size: u32) -> Result<()> {
    if buf_len != block_size as usize {
        return Err(SfsError::InvariantViolation(format!(
            "{op}: buffer length {buf_len} does not match block size {block_size}"
        )));
    }
    Ok(())
}

/// File-backed block device using positioned I/O (`pread`/`pwrite`
/// semantics via `FileExt`), so no seek position is shared between calls.
#[derive(Debug)]
pub struct FileBlockDevice {
    file: std::fs::File,
    block_size: u32,
}

impl FileBlockDevice {
    /// Open (or create) an image file. A fresh image is extended to hold at
    /// least the header block.
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        if file.metadata()?.len() < u64::from(block_size) {
            file.set_len(u64::from(block_size))?;
        }
        Ok(Self { file, block_size })
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        check_buf_len("read_block", buf.len(), self.block_size)?;
        let offset = block.0 * u64::from(self.block_size);
        trace!(target: "sfs::block", block = block.0, "read");

        // Reads past EOF yield zeros: fill what exists, zero the rest.
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_block(&self, block: BlockNumber, buf: &[u8]) -> Result<()> {
        check_buf_len("write_block", buf.len(), self.block_size)?;
        let offset = block.0 * u64::from(self.block_size);
        trace!(target: "sfs::block", block = block.0, "write");
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory block device.
///
/// Backs unit and integration tests and tooling. Unwritten blocks read as
/// zeros.
#[derive(Debug)]
pub struct MemBlockDevice {
    blocks: RefCell<HashMap<u64, Vec<u8>>>,
    block_size: u32,
}

impl MemBlockDevice {
    #[must_use]
    pub fn new(block_size: u32) -> Self {
        Self {
            blocks: RefCell::new(HashMap::new()),
            block_size,
        }
    }

    /// Number of blocks that have been written at least once.
    #[must_use]
    pub fn written_blocks(&self) -> usize {
        self.blocks.borrow().len()
    }
}

impl BlockDevice for MemBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        check_buf_len("read_block", buf.len(), self.block_size)?;
        match self.blocks.borrow().get(&block.0) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, block: BlockNumber, buf: &[u8]) -> Result<()> {
        check_buf_len("write_block", buf.len(), self.block_size)?;
        self.blocks.borrow_mut().insert(block.0, buf.to_vec());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_device_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dev.img");
        let dev = FileBlockDevice::open(&path, 512).expect("open");

        let mut block = vec![0_u8; 512];
        block[0] = 0xAB;
        block[511] = 0xCD;
        dev.write_block(BlockNumber(3), &block).expect("write");

        let mut read = vec![0xFF_u8; 512];
        dev.read_block(BlockNumber(3), &mut read).expect("read");
        assert_eq!(read, block);
    }

    #[test]
    fn file_device_read_past_eof_is_zeros() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dev.img");
        let dev = FileBlockDevice::open(&path, 512).expect("open");

        let mut buf = vec![0xFF_u8; 512];
        dev.read_block(BlockNumber(100), &mut buf).expect("read");
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn file_device_reserves_header_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dev.img");
        let _dev = FileBlockDevice::open(&path, 4096).expect("open");
        let len = std::fs::metadata(&path).expect("metadata").len();
        assert!(len >= 4096);
    }

    #[test]
    fn file_device_reopen_preserves_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dev.img");
        {
            let dev = FileBlockDevice::open(&path, 512).expect("open");
            dev.write_block(BlockNumber(1), &vec![7_u8; 512]).expect("write");
            dev.sync().expect("sync");
        }
        let dev = FileBlockDevice::open(&path, 512).expect("reopen");
        let mut buf = vec![0_u8; 512];
        dev.read_block(BlockNumber(1), &mut buf).expect("read");
        assert!(buf.iter().all(|b| *b == 7));
    }

    #[test]
    fn mem_device_roundtrip_and_zero_fill() {
        let dev = MemBlockDevice::new(128);
        let mut buf = vec![0xEE_u8; 128];
        dev.read_block(BlockNumber(5), &mut buf).expect("read");
        assert!(buf.iter().all(|b| *b == 0));

        dev.write_block(BlockNumber(5), &vec![9_u8; 128]).expect("write");
        dev.read_block(BlockNumber(5), &mut buf).expect("read");
        assert!(buf.iter().all(|b| *b == 9));
        assert_eq!(dev.written_blocks(), 1);
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        let dev = MemBlockDevice::new(128);
        let mut short = vec![0_u8; 64];
        assert!(dev.read_block(BlockNumber(0), &mut short).is_err());
        assert!(dev.write_block(BlockNumber(0), &short).is_err());
    }
}
