#![forbid(unsafe_code)]
//! FUSE adapter for SuccinctFS.
//!
//! This crate is a thin translation layer: kernel FUSE requests arrive via
//! the `fuser` crate, get forwarded to the [`FilesystemManager`], and errors
//! are mapped through [`SfsError::to_errno()`].
//!
//! Inode-number convention: `fuse_ino = tree position + 1`, so the FUSE
//! root (ino 1) is tree position 0. Positions shift on mutation; the kernel
//! re-learns them through lookup, which is acceptable for a single-client
//! mount. Every mutation is followed by `save()`, so the image on disk
//! always reflects the last acknowledged request.

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use sfs_core::FilesystemManager;
use sfs_error::SfsError;
use sfs_types::{S_IFDIR, S_IFMT, S_IFREG};
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// TTL for cached attributes and entries.
///
/// Node positions shift on every mutation, so cached entries go stale fast;
/// keep the window short.
const ATTR_TTL: Duration = Duration::from_secs(1);

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Mount options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub read_only: bool,
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("succinctfs".to_owned()),
        MountOption::Subtype("sfs".to_owned()),
        MountOption::DefaultPermissions,
    ];
    if options.read_only {
        opts.push(MountOption::RO);
    }
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

// ── Conversions ─────────────────────────────────────────────────────────────

/// Tree position for a FUSE inode number. Ino 0 is never valid.
fn ino_to_node(ino: u64) -> Result<usize, SfsError> {
    let v = ino
        .checked_sub(1)
        .ok_or(SfsError::OutOfRange {
            op: "fuse ino",
            index: 0,
            len: 0,
        })?;
    usize::try_from(v).map_err(|_| SfsError::OutOfRange {
        op: "fuse ino",
        index: v,
        len: 0,
    })
}

fn node_to_ino(v: usize) -> u64 {
    v as u64 + 1
}

fn secs_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn time_or_now_to_secs(t: TimeOrNow) -> i64 {
    let time = match t {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    };
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

// ── FUSE filesystem adapter ─────────────────────────────────────────────────

/// FUSE adapter owning the mounted [`FilesystemManager`].
#[derive(Debug)]
pub struct SuccinctFuse {
    fs: FilesystemManager,
}

impl SuccinctFuse {
    #[must_use]
    pub fn new(fs: FilesystemManager) -> Self {
        Self { fs }
    }

    /// Build the reply attributes for node `v`.
    fn attr(&self, v: usize, uid: u32, gid: u32) -> Result<FileAttr, SfsError> {
        let is_folder = self.fs.tree().is_folder(v)?;
        let inode = self.fs.inode(v)?;
        #[expect(clippy::cast_possible_truncation)]
        let perm = (inode.mode & 0o7777) as u16;
        Ok(FileAttr {
            ino: node_to_ino(v),
            size: inode.size,
            blocks: inode.size.div_ceil(512),
            atime: secs_to_system_time(inode.atime),
            mtime: secs_to_system_time(inode.mtime),
            ctime: secs_to_system_time(inode.ctime),
            crtime: secs_to_system_time(inode.ctime),
            kind: if is_folder {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            perm,
            nlink: if is_folder { 2 } else { 1 },
            uid,
            gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        })
    }

    /// Persist after a mutation; failures surface as EIO on the request.
    fn save_after_mutation(&mut self) -> Result<(), SfsError> {
        self.fs.save()
    }

    fn check_new_name(&self, parent: usize, name: &OsStr) -> Result<(), c_int> {
        if !self.fs.tree().is_folder(parent).map_err(|e| e.to_errno())? {
            return Err(libc::ENOTDIR);
        }
        if self.fs.tree().child_by_name(parent, name.as_bytes()).is_ok() {
            return Err(libc::EEXIST);
        }
        Ok(())
    }
}

impl Filesystem for SuccinctFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.fs.save() {
            warn!(target: "sfs::fuse", error = %e, "save on destroy failed");
        }
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = ino_to_node(parent)
            .and_then(|p| self.fs.tree().child_by_name(p, name.as_bytes()))
            .and_then(|v| self.attr(v, req.uid(), req.gid()));
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                // Missing entries are routine; only unexpected errors log.
                if e.to_errno() != libc::ENOENT {
                    warn!(target: "sfs::fuse", parent, ?name, error = %e, "lookup failed");
                }
                reply.error(e.to_errno());
            }
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = ino_to_node(ino).and_then(|v| self.attr(v, req.uid(), req.gid()));
        match result {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => {
                warn!(target: "sfs::fuse", ino, error = %e, "getattr failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = (|| {
            let v = ino_to_node(ino)?;
            if let Some(mode) = mode {
                let old = self.fs.inode(v)?.mode;
                self.fs.set_mode(v, (old & S_IFMT) | (mode & !S_IFMT))?;
            }
            if let Some(size) = size {
                if self.fs.tree().is_folder(v)? {
                    return Err(SfsError::InvariantViolation(
                        "truncate of a folder".to_owned(),
                    ));
                }
                self.fs.set_file_size(v, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                self.fs.set_times(
                    v,
                    atime.map(time_or_now_to_secs),
                    mtime.map(time_or_now_to_secs),
                )?;
            }
            self.save_after_mutation()?;
            self.attr(v, req.uid(), req.gid())
        })();
        match result {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => {
                warn!(target: "sfs::fuse", ino, error = %e, "setattr failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        // Stateless open: no file handles are tracked.
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = (|| {
            let v = ino_to_node(ino)?;
            if self.fs.tree().is_folder(v)? {
                return Err(SfsError::InvariantViolation("read of a folder".to_owned()));
            }
            let offset = u64::try_from(offset).unwrap_or(0);
            self.fs.read_file(v, offset, size as usize)
        })();
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(target: "sfs::fuse", ino, offset, size, error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let result = (|| {
            let v = ino_to_node(ino)?;
            if self.fs.tree().is_folder(v)? {
                return Err(SfsError::InvariantViolation("write to a folder".to_owned()));
            }
            let offset = u64::try_from(offset).unwrap_or(0);
            self.fs.write_file(v, offset, data)?;
            self.save_after_mutation()?;
            Ok(())
        })();
        match result {
            #[expect(clippy::cast_possible_truncation)]
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => {
                warn!(target: "sfs::fuse", ino, offset, error = %e, "write failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let result = (|| {
            let v = ino_to_node(ino)?;
            if !self.fs.tree().is_folder(v)? {
                return Err(SfsError::NotFound("readdir of a non-folder".to_owned()));
            }
            let count = self.fs.tree().children_count(v)?;
            let parent = if v == 0 { 0 } else { self.fs.tree().parent(v)? };
            let offset = usize::try_from(offset).unwrap_or(0);

            // Entries 0 and 1 are "." and ".."; children follow.
            for idx in offset..count + 2 {
                let (ino, kind, name) = match idx {
                    0 => (node_to_ino(v), FileType::Directory, b".".to_vec()),
                    1 => (node_to_ino(parent), FileType::Directory, b"..".to_vec()),
                    _ => {
                        let child = self.fs.tree().child(v, idx - 2)?;
                        let kind = if self.fs.tree().is_folder(child)? {
                            FileType::Directory
                        } else {
                            FileType::RegularFile
                        };
                        (node_to_ino(child), kind, self.fs.tree().name(child)?.to_vec())
                    }
                };
                let next = i64::try_from(idx + 1).unwrap_or(i64::MAX);
                let full = reply.add(ino, next, kind, OsStr::from_bytes(&name));
                if full {
                    break;
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(target: "sfs::fuse", ino, offset, error = %e, "readdir failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let parent = match ino_to_node(parent) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        if let Err(errno) = self.check_new_name(parent, name) {
            return reply.error(errno);
        }
        let result = self
            .fs
            .add_node(parent, name.as_bytes(), true, S_IFDIR | (mode & !S_IFMT))
            .and_then(|v| {
                self.save_after_mutation()?;
                self.attr(v, req.uid(), req.gid())
            });
        match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(target: "sfs::fuse", parent, ?name, error = %e, "mkdir failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let parent = match ino_to_node(parent) {
            Ok(p) => p,
            Err(e) => return reply.error(e.to_errno()),
        };
        if let Err(errno) = self.check_new_name(parent, name) {
            return reply.error(errno);
        }
        let result = self
            .fs
            .add_node(parent, name.as_bytes(), false, S_IFREG | (mode & !S_IFMT))
            .and_then(|v| {
                self.save_after_mutation()?;
                self.attr(v, req.uid(), req.gid())
            });
        match result {
            Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, 0, 0),
            Err(e) => {
                warn!(target: "sfs::fuse", parent, ?name, error = %e, "create failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = (|| {
            let parent = ino_to_node(parent).map_err(|e| e.to_errno())?;
            let v = self
                .fs
                .tree()
                .child_by_name(parent, name.as_bytes())
                .map_err(|e| e.to_errno())?;
            if self.fs.tree().is_folder(v).map_err(|e| e.to_errno())? {
                return Err(libc::EISDIR);
            }
            self.fs.remove_node(v).map_err(|e| e.to_errno())?;
            self.save_after_mutation().map_err(|e| e.to_errno())
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = (|| {
            let parent = ino_to_node(parent).map_err(|e| e.to_errno())?;
            let v = self
                .fs
                .tree()
                .child_by_name(parent, name.as_bytes())
                .map_err(|e| e.to_errno())?;
            if !self.fs.tree().is_folder(v).map_err(|e| e.to_errno())? {
                return Err(libc::ENOTDIR);
            }
            if !self
                .fs
                .tree()
                .is_empty_folder(v)
                .map_err(|e| e.to_errno())?
            {
                return Err(libc::ENOTEMPTY);
            }
            self.fs.remove_node(v).map_err(|e| e.to_errno())?;
            self.save_after_mutation().map_err(|e| e.to_errno())
        })();
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}

// ── Mount entrypoints ───────────────────────────────────────────────────────

/// Mount at `mountpoint` and block until unmounted.
pub fn mount(
    fs: FilesystemManager,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<(), FuseError> {
    let mountpoint = mountpoint.as_ref();
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    fuser::mount2(SuccinctFuse::new(fs), mountpoint, &fuse_opts)?;
    Ok(())
}

/// Mount in the background; unmounts when the returned session drops.
pub fn mount_background(
    fs: FilesystemManager,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<fuser::BackgroundSession, FuseError> {
    let mountpoint = mountpoint.as_ref();
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    let session = fuser::spawn_mount2(SuccinctFuse::new(fs), mountpoint, &fuse_opts)?;
    Ok(session)
}

// ── Tests ───────────────────────────────────────────────────────────────────
