//! The super block: the single fixed record that describes the rest of the
//! disk layout (spec.md §3). Written once by the (out-of-scope) offline
//! image-creation tool and treated as immutable afterward.

use static_assertions::const_assert_eq;

use crate::error::{EdfsError, EdfsResult};

/// Magic number stamped into every valid EdFS image.
pub const EDFS_MAGIC: u32 = 0xED_F5_0001;

/// Byte offset of the super block within the image. Fixed at 0, matching
/// the original EdFS layout (`EDFS_SUPER_BLOCK_OFFSET`).
pub const SUPER_BLOCK_OFFSET: u64 = 0;

/// On-disk wire size of [`SuperBlock`]: 4 * u32 + 3 * u64 + 1 * u32, but
/// written out explicitly rather than relied upon via `size_of`, since the
/// super block is serialized field-by-field (see [`SuperBlock::to_bytes`]).
pub const SUPERBLOCK_WIRE_SIZE: usize = 4 + 4 + 8 + 4 + 8 + 4 + 8 + 4;
const_assert_eq!(SUPERBLOCK_WIRE_SIZE, 44);

/// The super block, decoded into memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,
    /// Uniform size, in bytes, of data blocks, indirect blocks, and
    /// directory blocks.
    pub block_size: u32,
    /// Absolute byte offset of the first inode table record.
    pub inode_table_start: u64,
    pub inode_table_n_inodes: u32,
    /// Absolute byte offset of the first bitmap byte.
    pub bitmap_start: u64,
    /// Size of the bitmap, in bytes.
    pub bitmap_size: u32,
    /// Absolute byte offset of data block 0.
    pub data_block_start: u64,
    pub root_inumber: u32,
}

impl SuperBlock {
    /// Decode a super block from its fixed-size little-endian wire format.
    pub fn from_bytes(buf: &[u8]) -> EdfsResult<Self> {
        if buf.len() < SUPERBLOCK_WIRE_SIZE {
            return Err(EdfsError::Io("short read of super block".into()));
        }
        let mut off = 0;
        let magic = read_u32(buf, &mut off);
        let block_size = read_u32(buf, &mut off);
        let inode_table_start = read_u64(buf, &mut off);
        let inode_table_n_inodes = read_u32(buf, &mut off);
        let bitmap_start = read_u64(buf, &mut off);
        let bitmap_size = read_u32(buf, &mut off);
        let data_block_start = read_u64(buf, &mut off);
        let root_inumber = read_u32(buf, &mut off);

        if magic != EDFS_MAGIC {
            return Err(EdfsError::InvalidArgument(format!(
                "bad super block magic: {magic:#x}"
            )));
        }
        if block_size == 0 {
            return Err(EdfsError::InvalidArgument("block_size is zero".into()));
        }
        if root_inumber == 0 {
            return Err(EdfsError::InvalidArgument(
                "root_inumber must not be 0 (0 is the empty-slot marker)".into(),
            ));
        }

        Ok(SuperBlock {
            magic,
            block_size,
            inode_table_start,
            inode_table_n_inodes,
            bitmap_start,
            bitmap_size,
            data_block_start,
            root_inumber,
        })
    }

    /// Encode this super block to its fixed-size little-endian wire format.
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_WIRE_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_WIRE_SIZE];
        let mut off = 0;
        write_u32(&mut buf, &mut off, self.magic);
        write_u32(&mut buf, &mut off, self.block_size);
        write_u64(&mut buf, &mut off, self.inode_table_start);
        write_u32(&mut buf, &mut off, self.inode_table_n_inodes);
        write_u64(&mut buf, &mut off, self.bitmap_start);
        write_u32(&mut buf, &mut off, self.bitmap_size);
        write_u64(&mut buf, &mut off, self.data_block_start);
        write_u32(&mut buf, &mut off, self.root_inumber);
        buf
    }

    /// Absolute byte offset of data block `b`.
    pub const fn block_offset(&self, b: u32) -> u64 {
        self.data_block_start + (b as u64) * (self.block_size as u64)
    }

    /// Number of fixed-size directory entries that fit in one block.
    pub fn dir_entries_per_block(&self) -> u32 {
        self.block_size / crate::dir::DIR_ENTRY_WIRE_SIZE as u32
    }

    /// Number of `block_id` slots that fit in one indirect block.
    pub fn blocks_per_indirect(&self) -> u32 {
        self.block_size / 4
    }

    /// Smallest image size, in bytes, implied by the declared layout; used
    /// by [`crate::image::ImageHandle::open`] to sanity-check the backing
    /// file's length against the declared filesystem size. The data region
    /// spans every block id the bitmap can name, not just the bitmap's own
    /// byte length: `bitmap_size` bytes name `bitmap_size * 8` block ids,
    /// each `block_size` bytes.
    pub fn declared_size_bytes(&self) -> u64 {
        self.bitmap_start
            .max(self.inode_table_start)
            .max(self.data_block_start)
            + (self.bitmap_size as u64) * 8 * (self.block_size as u64)
    }
}

fn read_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

fn read_u64(buf: &[u8], off: &mut usize) -> u64 {
    let v = u64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

fn write_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_le_bytes());
    *off += 4;
}

fn write_u64(buf: &mut [u8], off: &mut usize, v: u64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let sb = SuperBlock {
            magic: EDFS_MAGIC,
            block_size: 1024,
            inode_table_start: 44,
            inode_table_n_inodes: 64,
            bitmap_start: 4_000,
            bitmap_size: 128,
            data_block_start: 8_192,
            root_inumber: 1,
        };
        let bytes = sb.to_bytes();
        let back = SuperBlock::from_bytes(&bytes).unwrap();
        assert_eq!(sb, back);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut sb = SuperBlock {
            magic: EDFS_MAGIC,
            block_size: 1024,
            inode_table_start: 44,
            inode_table_n_inodes: 64,
            bitmap_start: 4_000,
            bitmap_size: 128,
            data_block_start: 8_192,
            root_inumber: 1,
        };
        sb.magic = 0xdead_beef;
        let bytes = sb.to_bytes();
        assert!(SuperBlock::from_bytes(&bytes).is_err());
    }
}
