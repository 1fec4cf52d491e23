#![forbid(unsafe_code)]
//! Filesystem manager.
//!
//! Owns the block device, the allocator, the FLOUDS tree, and the inode
//! table, and stitches them into a recoverable on-disk image:
//!
//! - `mount` probes block 0 and either loads an existing image or
//!   initializes a fresh one;
//! - `save` persists every component (the allocator last, through a
//!   fixpoint loop, because it must describe its own extent);
//! - node and file operations keep the tree and the inode table in
//!   lockstep, so a tree position doubles as an inode number.
//!
//! Single-threaded by design: callers that multiplex requests must
//! serialize externally.

use sfs_alloc::{BumpAllocator, extent_read};
use sfs_block::{BlockDevice, FileBlockDevice};
use sfs_error::{Result, SfsError};
use sfs_inode::{Inode, InodeTable};
use sfs_tree::FloudsTree;
use sfs_types::{
    BlockNumber, ByteCursor, DEFAULT_BLOCK_SIZE, DiskImage, ExtentHandle, S_IFDIR,
};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Magic string opening block 0.
pub const FLOUDS_MAGIC: &[u8; 6] = b"FLOUDS";

/// Location and length of one serialized component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtentRef {
    pub handle: ExtentHandle,
    pub size: u64,
}

/// Fixed-layout header stored in block 0.
///
/// ```text
/// offset 0..5   : ASCII "FLOUDS"
/// offset 6..13  : allocator handle (u64 LE)
/// offset 14..21 : allocator size  (u64 LE)
/// offset 22..29 : tree handle     (u64 LE)
/// offset 30..37 : tree size       (u64 LE)
/// offset 38..45 : inode handle    (u64 LE)
/// offset 46..53 : inode size      (u64 LE)
/// ```
///
/// Remaining header-block bytes are reserved and zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FloudsHeader {
    pub allocator: ExtentRef,
    pub tree: ExtentRef,
    pub inodes: ExtentRef,
}

impl FloudsHeader {
    /// Bytes occupied by the encoded header at the start of block 0.
    pub const ENCODED_LEN: usize = 54;

    /// Encode into the start of a (zeroed) header block.
    pub fn encode_into(&self, block: &mut [u8]) {
        block[0..6].copy_from_slice(FLOUDS_MAGIC);
        for (at, value) in [
            (6, self.allocator.handle.0),
            (14, self.allocator.size),
            (22, self.tree.handle.0),
            (30, self.tree.size),
            (38, self.inodes.handle.0),
            (46, self.inodes.size),
        ] {
            block[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Inspect a header block: a matching magic yields the decoded header,
    /// an untouched (all-zero) block yields `None` for fresh
    /// initialization, and anything else is a foreign image.
    pub fn probe(block: &[u8]) -> Result<Option<Self>> {
        if block.len() < Self::ENCODED_LEN {
            return Err(SfsError::InvalidImage(format!(
                "header block of {} bytes cannot hold a {}-byte header",
                block.len(),
                Self::ENCODED_LEN
            )));
        }
        if &block[0..6] == FLOUDS_MAGIC {
            let mut cursor = ByteCursor::new(&block[6..Self::ENCODED_LEN]);
            let read_ref = |cursor: &mut ByteCursor<'_>| -> Result<ExtentRef> {
                Ok(ExtentRef {
                    handle: ExtentHandle(cursor.read_u64()?),
                    size: cursor.read_u64()?,
                })
            };
            let allocator = read_ref(&mut cursor)?;
            let tree = read_ref(&mut cursor)?;
            let inodes = read_ref(&mut cursor)?;
            return Ok(Some(Self {
                allocator,
                tree,
                inodes,
            }));
        }
        if block.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        Err(SfsError::InvalidImage(
            "header magic mismatch on a non-empty image".to_owned(),
        ))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Pull one component's blob off disk and decode it, checking that the
/// stored length matches what the component reports about itself.
fn load_component<T: DiskImage>(
    dev: &dyn BlockDevice,
    extent: ExtentRef,
    what: &'static str,
) -> Result<T> {
    if !extent.handle.is_allocated() {
        return Err(SfsError::InvalidImage(format!(
            "{what} extent missing from header"
        )));
    }
    let size = usize::try_from(extent.size)
        .map_err(|_| SfsError::InvalidImage(format!("{what} extent size overflows usize")))?;
    let mut blob = vec![0_u8; size];
    extent_read(dev, extent.handle, 0, &mut blob)?;
    let mut cursor = ByteCursor::new(&blob);
    let value = T::deserialize(&mut cursor)?;
    if cursor.remaining() != 0 || value.serialized_size() != blob.len() {
        return Err(SfsError::InvalidImage(format!(
            "{what} extent length {} disagrees with component-reported size {}",
            blob.len(),
            value.serialized_size()
        )));
    }
    Ok(value)
}

/// Mount/save lifecycle and node/file operations over one image.
#[derive(Debug)]
pub struct FilesystemManager {
    device: Box<dyn BlockDevice>,
    allocator: BumpAllocator,
    tree: FloudsTree,
    inodes: InodeTable,
    header: FloudsHeader,
}

impl FilesystemManager {
    /// Open the image at `path` with the default block size.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        Self::mount_with_block_size(path, DEFAULT_BLOCK_SIZE)
    }

    /// Open the image at `path` with an explicit block size.
    pub fn mount_with_block_size(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let device = FileBlockDevice::open(path.as_ref(), block_size)?;
        info!(target: "sfs::core", path = %path.as_ref().display(), block_size, "mount");
        Self::mount_device(Box::new(device))
    }

    /// Mount over an already-open device.
    pub fn mount_device(device: Box<dyn BlockDevice>) -> Result<Self> {
        let block_size = device.block_size();
        let mut block0 = vec![0_u8; block_size as usize];
        device.read_block(BlockNumber(0), &mut block0)?;

        match FloudsHeader::probe(&block0)? {
            Some(header) => {
                let allocator: BumpAllocator =
                    load_component(&*device, header.allocator, "allocator")?;
                let tree: FloudsTree = load_component(&*device, header.tree, "tree")?;
                let inodes: InodeTable = load_component(&*device, header.inodes, "inode table")?;
                if inodes.len() != tree.len() {
                    return Err(SfsError::InvalidImage(format!(
                        "inode table holds {} records for {} tree nodes",
                        inodes.len(),
                        tree.len()
                    )));
                }
                info!(target: "sfs::core", nodes = tree.len(), "loaded existing image");
                Ok(Self {
                    device,
                    allocator,
                    tree,
                    inodes,
                    header,
                })
            }
            None => {
                let mut fs = Self {
                    device,
                    allocator: BumpAllocator::new(),
                    tree: FloudsTree::new(),
                    inodes: InodeTable::new(),
                    header: FloudsHeader::default(),
                };
                let now = unix_now();
                let root = fs.inodes.insert(0)?;
                root.mode = S_IFDIR | 0o755;
                root.mtime = now;
                root.atime = now;
                root.ctime = now;
                fs.save()?;
                info!(target: "sfs::core", "initialized fresh image");
                Ok(fs)
            }
        }
    }

    /// Persist everything and release the image.
    pub fn unmount(mut self) -> Result<()> {
        self.save()?;
        info!(target: "sfs::core", "unmount");
        Ok(())
    }

    /// Persist tree, inode table, allocator, and header, in that order.
    ///
    /// The allocator serializes its own state into an extent allocated from
    /// itself; the loop below re-measures until the size stabilizes. For
    /// the bump strategy the size is a constant 8 bytes, so the loop runs
    /// once — it is kept general for strategies whose encoding grows.
    pub fn save(&mut self) -> Result<()> {
        let block_size = self.device.block_size();

        let tree_ref = {
            let size = self.tree.serialized_size() as u64;
            let handle = if self.header.tree.handle.is_allocated() {
                self.allocator
                    .resize(self.header.tree.handle, self.header.tree.size, size, block_size)
            } else {
                self.allocator.allocate(size, block_size)
            };
            self.allocator
                .write(&*self.device, handle, 0, &self.tree.to_bytes())?;
            ExtentRef { handle, size }
        };

        let inode_ref = {
            let size = self.inodes.serialized_size() as u64;
            let handle = if self.header.inodes.handle.is_allocated() {
                self.allocator.resize(
                    self.header.inodes.handle,
                    self.header.inodes.size,
                    size,
                    block_size,
                )
            } else {
                self.allocator.allocate(size, block_size)
            };
            self.allocator
                .write(&*self.device, handle, 0, &self.inodes.to_bytes())?;
            ExtentRef { handle, size }
        };

        let alloc_ref = {
            let mut size = self.allocator.serialized_size() as u64;
            let mut handle = if self.header.allocator.handle.is_allocated() {
                self.allocator.resize(
                    self.header.allocator.handle,
                    self.header.allocator.size,
                    size,
                    block_size,
                )
            } else {
                self.allocator.allocate(size, block_size)
            };
            loop {
                let measured = self.allocator.serialized_size() as u64;
                if measured == size {
                    break;
                }
                handle = self.allocator.resize(handle, size, measured, block_size);
                size = measured;
            }
            self.allocator
                .write(&*self.device, handle, 0, &self.allocator.to_bytes())?;
            ExtentRef { handle, size }
        };

        self.header = FloudsHeader {
            allocator: alloc_ref,
            tree: tree_ref,
            inodes: inode_ref,
        };
        let mut block0 = vec![0_u8; block_size as usize];
        self.header.encode_into(&mut block0);
        self.device.write_block(BlockNumber(0), &block0)?;
        self.device.sync()?;
        debug!(
            target: "sfs::core",
            tree_handle = tree_ref.handle.0,
            inode_handle = inode_ref.handle.0,
            alloc_handle = alloc_ref.handle.0,
            "save"
        );
        Ok(())
    }

    /// Directory tree, for navigation.
    #[must_use]
    pub fn tree(&self) -> &FloudsTree {
        &self.tree
    }

    /// Metadata record of node `v`.
    pub fn inode(&self, v: usize) -> Result<&Inode> {
        self.inodes.get(v)
    }

    /// Create a child node of `parent`. Returns its position (= inode
    /// number).
    pub fn add_node(
        &mut self,
        parent: usize,
        name: &[u8],
        is_folder: bool,
        mode: u32,
    ) -> Result<usize> {
        let v = self.tree.insert(parent, name, is_folder)?;
        let now = unix_now();
        let inode = self.inodes.insert(v)?;
        inode.mode = mode;
        inode.mtime = now;
        inode.atime = now;
        inode.ctime = now;
        Ok(v)
    }

    /// Remove leaf node `v` and its metadata.
    pub fn remove_node(&mut self, v: usize) -> Result<()> {
        self.tree.remove(v)?;
        let inode = self.inodes.remove(v)?;
        self.allocator.free(inode.extent);
        Ok(())
    }

    /// Read up to `len` bytes of file `v` at `offset`, clamped to EOF.
    pub fn read_file(&self, v: usize, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inode = self.inodes.get(v)?;
        if offset >= inode.size {
            return Ok(Vec::new());
        }
        let end = inode.size.min(offset + len as u64);
        let mut buf = vec![0_u8; (end - offset) as usize];
        if buf.is_empty() {
            return Ok(buf);
        }
        if !inode.extent.is_allocated() {
            return Err(SfsError::InvariantViolation(format!(
                "node {v} reports {} bytes but owns no extent",
                inode.size
            )));
        }
        self.allocator
            .read(&*self.device, inode.extent, offset, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` into file `v` at `offset`, growing the file when the
    /// write extends past its current end. Updates mtime.
    pub fn write_file(&mut self, v: usize, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.inodes.get(v)?.size {
            self.set_file_size(v, end)?;
        }
        let extent = self.inodes.get(v)?.extent;
        if !data.is_empty() {
            self.allocator.write(&*self.device, extent, offset, data)?;
        }
        self.inodes.get_mut(v)?.mtime = unix_now();
        Ok(())
    }

    /// Resize file `v`. When the extent relocates, surviving bytes are
    /// copied over before the old extent is released.
    pub fn set_file_size(&mut self, v: usize, size: u64) -> Result<()> {
        let block_size = self.device.block_size();
        let old = *self.inodes.get(v)?;
        let handle = self
            .allocator
            .resize(old.extent, old.size, size, block_size);
        if handle != old.extent && old.extent.is_allocated() && old.size > 0 {
            let keep = usize::try_from(old.size.min(size)).map_err(|_| {
                SfsError::InvariantViolation("file size overflows usize".to_owned())
            })?;
            if keep > 0 {
                let mut buf = vec![0_u8; keep];
                self.allocator.read(&*self.device, old.extent, 0, &mut buf)?;
                self.allocator.write(&*self.device, handle, 0, &buf)?;
            }
            self.allocator.free(old.extent);
        }
        let inode = self.inodes.get_mut(v)?;
        inode.extent = handle;
        inode.size = size;
        inode.ctime = unix_now();
        Ok(())
    }

    /// Update permissions. Updates ctime.
    pub fn set_mode(&mut self, v: usize, mode: u32) -> Result<()> {
        let inode = self.inodes.get_mut(v)?;
        inode.mode = mode;
        inode.ctime = unix_now();
        Ok(())
    }

    /// Update timestamps selectively.
    pub fn set_times(&mut self, v: usize, atime: Option<i64>, mtime: Option<i64>) -> Result<()> {
        let inode = self.inodes.get_mut(v)?;
        if let Some(atime) = atime {
            inode.atime = atime;
        }
        if let Some(mtime) = mtime {
            inode.mtime = mtime;
        }
        inode.ctime = unix_now();
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
