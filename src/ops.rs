//! Operation handlers (spec.md §4.7): the externally visible filesystem
//! interface, composing the path resolver, inode store, directory engine,
//! and block addressing layers. `EdfsCore` is the type a host mount
//! binding (see `fuse_host.rs`) drives.

use std::path::Path as FsPath;

use log::{debug, info, warn};

use crate::bitmap::BitmapAllocator;
use crate::block::BlockAddressing;
use crate::dir::DirEngine;
use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;
use crate::inode::{DiskInode, InodeKind, InodeStore};
use crate::path::PathResolver;

/// The type half of a file's attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Everything `getattr` reports (spec.md §4.7). Owner/permission/time
/// fields are intentionally absent: EdFS accepts and discards them
/// (spec.md §1, §9 open question 4).
#[derive(Copy, Clone, Debug)]
pub struct Attributes {
    pub inumber: u32,
    pub kind: FileKind,
    pub nlink: u32,
    pub size: u64,
}

/// The filesystem-operation state machine described in spec.md §4.7,
/// bound to one open image.
pub struct EdfsCore {
    image: ImageHandle,
}

impl EdfsCore {
    pub fn open(path: impl AsRef<FsPath>) -> EdfsResult<Self> {
        let image = ImageHandle::open(path, true)?;
        Ok(EdfsCore { image })
    }

    fn store(&self) -> InodeStore<'_> {
        InodeStore::new(&self.image)
    }

    fn dirs(&self) -> DirEngine<'_> {
        DirEngine::new(&self.image)
    }

    fn alloc(&self) -> BitmapAllocator<'_> {
        BitmapAllocator::new(&self.image)
    }

    fn blocks(&self) -> BlockAddressing<'_> {
        BlockAddressing::new(&self.image)
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.image)
    }

    fn attrs_of(&self, inumber: u32, inode: &DiskInode) -> Attributes {
        match inode.kind {
            InodeKind::Directory => Attributes {
                inumber,
                kind: FileKind::Directory,
                nlink: 2,
                size: inode.size as u64,
            },
            _ => Attributes {
                inumber,
                kind: FileKind::File,
                nlink: 1,
                size: inode.size as u64,
            },
        }
    }

    fn require_file(path: &str, inode: &DiskInode) -> EdfsResult<()> {
        if inode.kind != InodeKind::File {
            return Err(EdfsError::IsDirectory(path.to_string()));
        }
        Ok(())
    }

    fn require_directory(path: &str, inode: &DiskInode) -> EdfsResult<()> {
        if inode.kind != InodeKind::Directory {
            return Err(EdfsError::NotDirectory(path.to_string()));
        }
        Ok(())
    }

    /// Root `/` is special-cased to a directory without resolving through
    /// the path walker (spec.md §4.7).
    pub fn getattr(&self, path: &str) -> EdfsResult<Attributes> {
        if path == "/" {
            let root_inumber = self.image.super_block().root_inumber;
            let root = self.store().read(root_inumber)?;
            return Ok(self.attrs_of(root_inumber, &root));
        }
        let (inumber, inode) = self.resolver().find_inode(path)?;
        Ok(self.attrs_of(inumber, &inode))
    }

    /// Always emits `.` and `..` synthetically (EdFS never stores them on
    /// disk), then every non-empty directory entry's filename.
    pub fn readdir(&self, path: &str) -> EdfsResult<Vec<String>> {
        let (_, inode) = self.resolver().find_inode(path)?;
        Self::require_directory(path, &inode)?;
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(self.dirs().list(&inode)?.into_iter().map(|(name, _)| name));
        Ok(names)
    }

    /// Verifies the inode exists and is a file; no per-open state is kept.
    pub fn open_file(&self, path: &str) -> EdfsResult<()> {
        let (_, inode) = self.resolver().find_inode(path)?;
        Self::require_file(path, &inode)
    }

    pub fn create(&self, path: &str) -> EdfsResult<Attributes> {
        let (parent_inumber, mut parent, basename) =
            self.resolver().get_parent_and_basename(path)?;
        Self::require_directory(path, &parent)?;
        if self.dirs().lookup(&parent, basename)?.is_some() {
            return Err(EdfsError::AlreadyExists(path.to_string()));
        }

        let (inumber, inode) = self.store().new_inode(InodeKind::File)?;
        self.store().write(inumber, &inode)?;
        self.dirs().insert(
            &self.store(),
            &self.alloc(),
            parent_inumber,
            &mut parent,
            basename,
            inumber,
        )?;
        info!("created file {path} (inumber {inumber})");
        Ok(self.attrs_of(inumber, &inode))
    }

    /// Identical shape to `create` except the new inode is a directory and
    /// no default `.`/`..` entries are stored — `readdir` synthesizes them.
    pub fn mkdir(&self, path: &str) -> EdfsResult<Attributes> {
        let (parent_inumber, mut parent, basename) =
            self.resolver().get_parent_and_basename(path)?;
        Self::require_directory(path, &parent)?;
        if self.dirs().lookup(&parent, basename)?.is_some() {
            return Err(EdfsError::AlreadyExists(path.to_string()));
        }

        let (inumber, inode) = self.store().new_inode(InodeKind::Directory)?;
        self.store().write(inumber, &inode)?;
        self.dirs().insert(
            &self.store(),
            &self.alloc(),
            parent_inumber,
            &mut parent,
            basename,
            inumber,
        )?;
        info!("created directory {path} (inumber {inumber})");
        Ok(self.attrs_of(inumber, &inode))
    }

    /// Frees every allocated data block, removes the directory entry from
    /// the parent, then clears the inode. Per spec.md §5/§7, directory
    /// entry removal happens last so the name never outlives the data it
    /// points at; a crash between block-free and entry-removal would leave
    /// an orphan name pointing at a freed inode (spec.md §9 open question
    /// 3), but never a dangling pointer from a live name to live blocks
    /// gone missing.
    pub fn unlink(&self, path: &str) -> EdfsResult<()> {
        let (parent_inumber, parent, basename) = self.resolver().get_parent_and_basename(path)?;
        let inumber = self
            .dirs()
            .lookup(&parent, basename)?
            .ok_or_else(|| EdfsError::NotFound(path.to_string()))?;
        let inode = self.store().read(inumber)?;
        Self::require_file(path, &inode)?;

        self.blocks().free_all_blocks(&self.alloc(), &inode)?;
        self.dirs().remove_by_inumber(&parent, inumber)?;
        self.store().clear(inumber)?;
        debug!("unlinked {path} (inumber {inumber})");
        let _ = parent_inumber;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> EdfsResult<()> {
        let (parent_inumber, parent, basename) = self.resolver().get_parent_and_basename(path)?;
        let inumber = self
            .dirs()
            .lookup(&parent, basename)?
            .ok_or_else(|| EdfsError::NotFound(path.to_string()))?;
        let inode = self.store().read(inumber)?;
        Self::require_directory(path, &inode)?;
        if !self.dirs().is_empty(&inode)? {
            return Err(EdfsError::NotEmpty(path.to_string()));
        }

        self.blocks().free_all_blocks(&self.alloc(), &inode)?;
        self.dirs().remove_by_inumber(&parent, inumber)?;
        self.store().clear(inumber)?;
        debug!("removed directory {path} (inumber {inumber})");
        let _ = parent_inumber;
        Ok(())
    }

    /// Reads up to `len` bytes at `off`. Returns `0` once `off >= size`;
    /// never creates blocks.
    pub fn read(&self, path: &str, off: u64, len: u32) -> EdfsResult<Vec<u8>> {
        let (_, inode) = self.resolver().find_inode(path)?;
        Self::require_file(path, &inode)?;

        if off >= inode.size as u64 {
            return Ok(Vec::new());
        }
        let remaining_in_file = inode.size as u64 - off;
        let want = (len as u64).min(remaining_in_file) as u32;

        let block_size = self.image.super_block().block_size;
        let mut out = Vec::with_capacity(want as usize);
        let mut cursor = off as u32;
        let mut left = want;
        while left > 0 {
            let (block, in_block_off) = self.blocks().block_for_offset(&inode, cursor)?;
            let chunk = left.min(block_size - in_block_off);
            let mut buf = vec![0u8; chunk as usize];
            self.image
                .pread(self.image.super_block().block_offset(block) + in_block_off as u64, &mut buf)?;
            out.extend_from_slice(&buf);
            cursor += chunk;
            left -= chunk;
        }
        Ok(out)
    }

    /// Writes `data` at `off`, extending `size` (and allocating blocks
    /// through any hole in `[size, off)`) as needed. On a partial failure,
    /// the bytes from prior iterations remain written; the call returns
    /// the partial count when it is nonzero, the triggering error
    /// otherwise (spec.md §7).
    pub fn write(&self, path: &str, off: u64, data: &[u8]) -> EdfsResult<u32> {
        let (inumber, mut inode) = self.resolver().find_inode(path)?;
        Self::require_file(path, &inode)?;

        let block_size = self.image.super_block().block_size;
        let mut cursor = off as u32;
        let mut written = 0u32;
        let mut left = data.len() as u32;

        while left > 0 {
            let idx = cursor / block_size;
            let in_block_off = cursor % block_size;
            let block = match self.blocks().ensure_block(
                &self.store(),
                &self.alloc(),
                inumber,
                &mut inode,
                idx,
            ) {
                Ok(b) => b,
                Err(e) => {
                    warn!("write {path}: ensure_block failed after {written} bytes: {e}");
                    return if written > 0 { Ok(written) } else { Err(e) };
                }
            };
            let chunk = left.min(block_size - in_block_off);
            let start = (data.len() as u32 - left) as usize;
            let slice = &data[start..start + chunk as usize];
            self.image
                .pwrite(self.image.super_block().block_offset(block) + in_block_off as u64, slice)?;
            cursor += chunk;
            written += chunk;
            left -= chunk;
        }

        if cursor as u64 > inode.size as u64 {
            inode.size = cursor;
            self.store().write(inumber, &inode)?;
        }
        Ok(written)
    }

    /// Grows or shrinks a file. Growing ensures the tail block exists;
    /// shrinking frees every now-out-of-range data block. Indirect blocks
    /// that become empty are not released (spec.md §9 open question 1).
    pub fn truncate(&self, path: &str, new_size: i64) -> EdfsResult<()> {
        if new_size < 0 {
            return Err(EdfsError::InvalidArgument(format!(
                "negative size {new_size}"
            )));
        }
        let new_size = new_size as u32;
        let (inumber, mut inode) = self.resolver().find_inode(path)?;
        Self::require_file(path, &inode)?;

        let block_size = self.image.super_block().block_size;
        if new_size > inode.size {
            if new_size > 0 {
                let last_idx = (new_size - 1) / block_size;
                self.blocks()
                    .ensure_block(&self.store(), &self.alloc(), inumber, &mut inode, last_idx)?;
            }
        } else if new_size < inode.size {
            let old_last = div_ceil(inode.size, block_size);
            let new_last = div_ceil(new_size, block_size);
            for idx in new_last..old_last {
                self.blocks().free_logical_block(&self.alloc(), &mut inode, idx)?;
            }
        }

        inode.size = new_size;
        self.store().write(inumber, &inode)?;
        Ok(())
    }

    /// Accepted and ignored: EdFS does not track owner/permission/time
    /// bits beyond what `getattr` hard-codes (spec.md §4.7, §9 open
    /// question 4).
    pub fn chmod(&self, _path: &str, _mode: u32) -> EdfsResult<()> {
        Ok(())
    }

    pub fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> EdfsResult<()> {
        Ok(())
    }

    pub fn utime(&self, _path: &str, _atime: i64, _mtime: i64) -> EdfsResult<()> {
        Ok(())
    }
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}
