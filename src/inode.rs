//! Disk inode codec and the inode store (spec.md §3, §4.3).
//!
//! An inode is a fixed-size record: a type byte (carrying the `Free`/
//! `File`/`Directory` tag and, OR'd in, the `INDIRECT` layout flag), a
//! `u32` size, and `BLOCKS_PER_INODE` block-id slots. Meaning of the slots
//! depends on the `INDIRECT` flag: unset, each slot names a direct data
//! block; set, each slot names an indirect block whose own contents are an
//! array of `blocks_per_indirect` data block ids.

use bitflags::bitflags;
use log::trace;

use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;

/// Number of block-id slots in an inode's `blocks[]` array. Chosen the way
/// xv6/rv6 choose `NDIRECT`: a compile-time constant baked into the wire
/// format, not a super-block-configurable value.
pub const BLOCKS_PER_INODE: usize = 12;

/// Sentinel marking an unallocated block slot — "the maximum block-id
/// value", per spec.md §6.
pub const INVALID_BLOCK: u32 = u32::MAX;

/// Reserved inumber: 0 always means "empty slot" in a directory entry and
/// is never a live inode.
pub const RESERVED_INUMBER: u32 = 0;

/// `1 (type) + 4 (size) + BLOCKS_PER_INODE * 4 (blocks)`.
pub const DISK_INODE_WIRE_SIZE: usize = 1 + 4 + BLOCKS_PER_INODE * 4;

bitflags! {
    struct TypeByte: u8 {
        const FREE      = 0b000;
        const FILE      = 0b001;
        const DIRECTORY = 0b010;
        const INDIRECT  = 0b100;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InodeKind {
    Free,
    File,
    Directory,
}

/// In-memory decoding of a fixed disk-inode record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DiskInode {
    pub kind: InodeKind,
    pub indirect: bool,
    pub size: u32,
    pub blocks: [u32; BLOCKS_PER_INODE],
}

impl DiskInode {
    pub fn free() -> Self {
        DiskInode {
            kind: InodeKind::Free,
            indirect: false,
            size: 0,
            blocks: [INVALID_BLOCK; BLOCKS_PER_INODE],
        }
    }

    pub fn new(kind: InodeKind) -> Self {
        DiskInode {
            kind,
            indirect: false,
            size: 0,
            blocks: [INVALID_BLOCK; BLOCKS_PER_INODE],
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind == InodeKind::Free
    }

    pub(crate) fn to_bytes(self) -> [u8; DISK_INODE_WIRE_SIZE] {
        let mut buf = [0u8; DISK_INODE_WIRE_SIZE];
        let mut type_byte = match self.kind {
            InodeKind::Free => TypeByte::FREE,
            InodeKind::File => TypeByte::FILE,
            InodeKind::Directory => TypeByte::DIRECTORY,
        };
        if self.indirect {
            type_byte |= TypeByte::INDIRECT;
        }
        buf[0] = type_byte.bits();
        buf[1..5].copy_from_slice(&self.size.to_le_bytes());
        for (i, b) in self.blocks.iter().enumerate() {
            let off = 5 + i * 4;
            buf[off..off + 4].copy_from_slice(&b.to_le_bytes());
        }
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> EdfsResult<Self> {
        if buf.len() < DISK_INODE_WIRE_SIZE {
            return Err(EdfsError::Io("short read of inode record".into()));
        }
        let type_byte = TypeByte::from_bits_truncate(buf[0]);
        let indirect = type_byte.contains(TypeByte::INDIRECT);
        let base = type_byte & !TypeByte::INDIRECT;
        let kind = if base == TypeByte::FILE {
            InodeKind::File
        } else if base == TypeByte::DIRECTORY {
            InodeKind::Directory
        } else {
            InodeKind::Free
        };
        let size = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        let mut blocks = [INVALID_BLOCK; BLOCKS_PER_INODE];
        for (i, slot) in blocks.iter_mut().enumerate() {
            let off = 5 + i * 4;
            *slot = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        }
        Ok(DiskInode {
            kind,
            indirect,
            size,
            blocks,
        })
    }
}

/// Reads, writes, and allocates records in the inode table.
pub struct InodeStore<'a> {
    image: &'a ImageHandle,
}

impl<'a> InodeStore<'a> {
    pub fn new(image: &'a ImageHandle) -> Self {
        InodeStore { image }
    }

    fn offset(&self, inumber: u32) -> EdfsResult<u64> {
        let sb = self.image.super_block();
        if inumber >= sb.inode_table_n_inodes {
            return Err(EdfsError::NotFound(format!("inumber {inumber} out of range")));
        }
        Ok(sb.inode_table_start + (inumber as u64) * DISK_INODE_WIRE_SIZE as u64)
    }

    pub fn read(&self, inumber: u32) -> EdfsResult<DiskInode> {
        let offset = self.offset(inumber)?;
        let mut buf = [0u8; DISK_INODE_WIRE_SIZE];
        self.image.pread(offset, &mut buf)?;
        DiskInode::from_bytes(&buf)
    }

    pub fn write(&self, inumber: u32, inode: &DiskInode) -> EdfsResult<()> {
        let offset = self.offset(inumber)?;
        self.image.pwrite(offset, &inode.to_bytes())?;
        trace!("wrote inode {inumber} ({:?})", inode.kind);
        Ok(())
    }

    pub fn clear(&self, inumber: u32) -> EdfsResult<()> {
        self.write(inumber, &DiskInode::free())
    }

    /// Linear scan from inumber 1 upward for the first `Free` record.
    /// Returns `None` when the table is full; callers map that to
    /// `EdfsError::NoSpace`.
    pub fn find_free(&self) -> EdfsResult<Option<u32>> {
        let n = self.image.super_block().inode_table_n_inodes;
        for inumber in 1..n {
            if self.read(inumber)?.is_free() {
                return Ok(Some(inumber));
            }
        }
        Ok(None)
    }

    /// Composes `find_free` with in-memory initialization. The returned
    /// inode is NOT written to disk: it only becomes "allocated" once the
    /// caller writes it back with a non-`Free` kind (spec.md §4.3).
    pub fn new_inode(&self, kind: InodeKind) -> EdfsResult<(u32, DiskInode)> {
        let inumber = self.find_free()?.ok_or(EdfsError::NoSpace)?;
        Ok((inumber, DiskInode::new(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fresh_image;

    #[test]
    fn disk_inode_round_trips() {
        let mut inode = DiskInode::new(InodeKind::File);
        inode.size = 4096;
        inode.indirect = true;
        inode.blocks[0] = 7;
        let bytes = inode.to_bytes();
        let back = DiskInode::from_bytes(&bytes).unwrap();
        assert_eq!(inode, back);
    }

    #[test]
    fn find_free_skips_inumber_zero() {
        let (_tmp, img) = fresh_image(1024, 16, 8);
        let store = InodeStore::new(&img);
        // inumber 0 is reserved and inumber 1 is the root, already in use.
        let free = store.find_free().unwrap().unwrap();
        assert!(free >= 2);
    }

    #[test]
    fn new_inode_is_not_persisted_until_written() {
        let (_tmp, img) = fresh_image(1024, 16, 8);
        let store = InodeStore::new(&img);
        let (inumber, inode) = store.new_inode(InodeKind::File).unwrap();
        assert!(store.read(inumber).unwrap().is_free());
        store.write(inumber, &inode).unwrap();
        assert!(!store.read(inumber).unwrap().is_free());
    }
}
