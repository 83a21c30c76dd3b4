//! The host mount binding named by spec.md §6, kept out of the core
//! crate's own modules: a `fuser::Filesystem` that translates
//! FUSE's inode-numbered protocol into calls against `EdfsCore`'s
//! path-based operation contracts, the way `edfuse.c` adapts libfuse's
//! path-based `fuse_operations` table onto `edfs-common.c`'s path-based
//! core API.
//!
//! `fuser` (unlike libfuse's legacy path-callback mode that `edfuse.c`
//! uses) speaks strictly in terms of numeric inodes, so this module keeps
//! a small inode-number ↔ path table. That table is host-binding
//! bookkeeping, not filesystem state: it is rebuilt from nothing on every
//! mount and never touches the disk image.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use log::{error, warn};

use crate::error::EdfsError;
use crate::ops::{Attributes, EdfsCore, FileKind};

/// How long the kernel may cache attributes/entries before re-asking.
/// EdFS does no caching of its own (spec.md's Non-goals), so this is kept
/// short rather than zero only to avoid pathological re-lookup storms.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Bijective inode-number ↔ absolute-path table. FUSE's reserved root
/// inode (`1`) always maps onto EdFS's `root_inumber`.
struct InodeTable {
    next_ino: u64,
    path_of: HashMap<u64, String>,
    ino_of: HashMap<String, u64>,
}

impl InodeTable {
    fn new() -> Self {
        let mut path_of = HashMap::new();
        let mut ino_of = HashMap::new();
        path_of.insert(fuser::FUSE_ROOT_ID, "/".to_string());
        ino_of.insert("/".to_string(), fuser::FUSE_ROOT_ID);
        InodeTable {
            next_ino: fuser::FUSE_ROOT_ID + 1,
            path_of,
            ino_of,
        }
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.path_of.get(&ino).map(String::as_str)
    }

    /// Returns the stable inode number for `path`, minting a fresh one if
    /// this is the first time the path has been seen this mount.
    fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.ino_of.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_of.insert(ino, path.to_string());
        self.ino_of.insert(path.to_string(), ino);
        ino
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.ino_of.remove(path) {
            self.path_of.remove(&ino);
        }
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

pub struct EdfsFuse {
    core: EdfsCore,
    inodes: InodeTable,
}

impl EdfsFuse {
    pub fn new(core: EdfsCore) -> Self {
        EdfsFuse {
            core,
            inodes: InodeTable::new(),
        }
    }

    fn attr_for(&self, ino: u64, attrs: &Attributes) -> FileAttr {
        let now = SystemTime::now();
        let (kind, perm, nlink) = match attrs.kind {
            FileKind::Directory => (FileType::Directory, 0o755, attrs.nlink),
            FileKind::File => (FileType::RegularFile, 0o644, attrs.nlink),
        };
        FileAttr {
            ino,
            size: attrs.size,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

fn errno(e: &EdfsError) -> i32 {
    let n = e.to_errno();
    warn!("edfs operation failed: {e}");
    n
}

impl Filesystem for EdfsFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);
        match self.core.getattr(&path) {
            Ok(attrs) => {
                let ino = self.inodes.intern(&path);
                reply.entry(&ATTR_TTL, &self.attr_for(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.getattr(&path) {
            Ok(attrs) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(mode) = mode {
            if let Err(e) = self.core.chmod(&path, mode) {
                reply.error(errno(&e));
                return;
            }
        }
        if uid.is_some() || gid.is_some() {
            if let Err(e) = self.core.chown(&path, uid.unwrap_or(0), gid.unwrap_or(0)) {
                reply.error(errno(&e));
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            if let Err(e) = self.core.utime(&path, 0, 0) {
                reply.error(errno(&e));
                return;
            }
        }
        if let Some(size) = size {
            if let Err(e) = self.core.truncate(&path, size as i64) {
                reply.error(errno(&e));
                return;
            }
        }
        match self.core.getattr(&path) {
            Ok(attrs) => reply.attr(&ATTR_TTL, &self.attr_for(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
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
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let names = match self.core.readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        for (i, name) in names.into_iter().enumerate().skip(offset as usize) {
            let entry_path = match name.as_str() {
                "." => path.clone(),
                ".." => path.clone(), // EdFS has no parent pointers; "" is unknowable without walking up.
                child => InodeTable::child_path(&path, child),
            };
            let entry_ino = if name == "." || name == ".." {
                ino
            } else {
                self.inodes.intern(&entry_path)
            };
            let kind = if name == "." || name == ".." {
                FileType::Directory
            } else {
                match self.core.getattr(&entry_path) {
                    Ok(a) if a.kind == FileKind::Directory => FileType::Directory,
                    _ => FileType::RegularFile,
                }
            };
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break; // reply buffer full; kernel will re-ask with a later offset
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.open_file(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.inodes.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);
        match self.core.create(&path) {
            Ok(attrs) => {
                let ino = self.inodes.intern(&path);
                reply.created(&ATTR_TTL, &self.attr_for(ino, &attrs), 0, 0, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.inodes.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);
        match self.core.mkdir(&path) {
            Ok(attrs) => {
                let ino = self.inodes.intern(&path);
                reply.entry(&ATTR_TTL, &self.attr_for(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);
        match self.core.unlink(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = InodeTable::child_path(&parent_path, name);
        match self.core.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
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
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.core.read(&path, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
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
        let Some(path) = self.inodes.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.core.write(&path, offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(errno(&e)),
        }
    }

    /// Accepted no-op: EdFS keeps no per-open file state (spec.md §4.7).
    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    /// Accepted no-op, for the same reason as `release`.
    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}

/// Mounts `core` at `mountpoint` and runs until unmounted. Uses FUSE's
/// single-threaded session loop, matching spec.md §5's "one operation runs
/// to completion before the next is dispatched" model end-to-end rather
/// than only at the core layer.
pub fn mount(core: EdfsCore, mountpoint: &std::path::Path, extra_options: &[String]) -> std::io::Result<()> {
    let mut options = vec![fuser::MountOption::FSName("edfs".to_string())];
    for opt in extra_options {
        options.push(match opt.as_str() {
            "ro" => fuser::MountOption::RO,
            "rw" => fuser::MountOption::RW,
            "allow_other" => fuser::MountOption::AllowOther,
            "allow_root" => fuser::MountOption::AllowRoot,
            "auto_unmount" => fuser::MountOption::AutoUnmount,
            other => fuser::MountOption::CUSTOM(other.to_string()),
        });
    }
    let fs = EdfsFuse::new(core);
    let result = fuser::mount2(fs, mountpoint, &options);
    if let Err(e) = &result {
        error!("mount failed: {e}");
    }
    result
}
