//! Block addressing (spec.md §4.4): translates a logical byte offset
//! within a file to a physical block and in-block offset, promotes an
//! inode from direct-only to indirect layout on demand, and allocates
//! intermediate indirect blocks.

use log::debug;

use crate::bitmap::BitmapAllocator;
use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;
use crate::inode::{DiskInode, InodeStore, BLOCKS_PER_INODE, INVALID_BLOCK};

/// `(block_id, in_block_offset)`.
pub type BlockLocation = (u32, u32);

pub struct BlockAddressing<'a> {
    image: &'a ImageHandle,
}

impl<'a> BlockAddressing<'a> {
    pub fn new(image: &'a ImageHandle) -> Self {
        BlockAddressing { image }
    }

    fn block_size(&self) -> u32 {
        self.image.super_block().block_size
    }

    fn blocks_per_indirect(&self) -> u32 {
        self.image.super_block().blocks_per_indirect()
    }

    fn read_indirect(&self, indirect_block: u32) -> EdfsResult<Vec<u32>> {
        let bs = self.block_size();
        let mut raw = vec![0u8; bs as usize];
        self.image
            .pread(self.image.super_block().block_offset(indirect_block), &mut raw)?;
        let n = self.blocks_per_indirect() as usize;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap()));
        }
        Ok(out)
    }

    fn write_indirect(&self, indirect_block: u32, entries: &[u32]) -> EdfsResult<()> {
        let bs = self.block_size() as usize;
        let mut raw = vec![0u8; bs];
        for (i, e) in entries.iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&e.to_le_bytes());
        }
        self.image
            .pwrite(self.image.super_block().block_offset(indirect_block), &raw)
    }

    /// Reads the data block and in-block offset backing logical byte offset
    /// `off`, which must lie within `[0, inode.size)`. Never allocates; an
    /// `INVALID_BLOCK` encountered within the live range is a hole, which
    /// read is not allowed to observe (spec.md §4.4's hole policy), so it
    /// surfaces as `Io`.
    pub fn block_for_offset(&self, inode: &DiskInode, off: u32) -> EdfsResult<BlockLocation> {
        if off >= inode.size {
            return Err(EdfsError::InvalidArgument(format!(
                "offset {off} is not within [0, {})",
                inode.size
            )));
        }
        let bs = self.block_size();
        let idx = off / bs;
        let in_block_off = off % bs;

        if !inode.indirect {
            if idx as usize >= BLOCKS_PER_INODE {
                return Err(EdfsError::Io("direct index out of range".into()));
            }
            let block = inode.blocks[idx as usize];
            if block == INVALID_BLOCK {
                return Err(EdfsError::Io(format!("hole at offset {off}")));
            }
            Ok((block, in_block_off))
        } else {
            let per = self.blocks_per_indirect();
            let slot = idx / per;
            let inner = idx % per;
            if slot as usize >= BLOCKS_PER_INODE {
                return Err(EdfsError::Io("indirect slot out of range".into()));
            }
            let indirect_block = inode.blocks[slot as usize];
            if indirect_block == INVALID_BLOCK {
                return Err(EdfsError::Io(format!("hole at offset {off} (no indirect block)")));
            }
            let table = self.read_indirect(indirect_block)?;
            let block = table[inner as usize];
            if block == INVALID_BLOCK {
                return Err(EdfsError::Io(format!("hole at offset {off}")));
            }
            Ok((block, in_block_off))
        }
    }

    /// Ensures that logical block `idx` exists, allocating and — for the
    /// direct→indirect transition — promoting as necessary. Used by
    /// `write`/`truncate`-extend. Mutates `inode` in place; the caller is
    /// responsible for flushing it via `InodeStore::write` (this function
    /// does so itself whenever it changes the inode, to match spec.md
    /// §4.4's "flush the inode" steps, but the caller must still flush
    /// after updating `size`).
    pub fn ensure_block(
        &self,
        store: &InodeStore<'_>,
        alloc: &BitmapAllocator<'_>,
        inumber: u32,
        inode: &mut DiskInode,
        idx: u32,
    ) -> EdfsResult<u32> {
        if !inode.indirect {
            if (idx as usize) < BLOCKS_PER_INODE {
                let slot = inode.blocks[idx as usize];
                if slot != INVALID_BLOCK {
                    return Ok(slot);
                }
                let new_block = alloc.alloc_block()?;
                inode.blocks[idx as usize] = new_block;
                store.write(inumber, inode)?;
                return Ok(new_block);
            }
            self.promote_to_indirect(store, alloc, inumber, inode)?;
        }

        let per = self.blocks_per_indirect();
        let slot = idx / per;
        let inner = idx % per;
        if slot as usize >= BLOCKS_PER_INODE {
            return Err(EdfsError::FileTooBig);
        }

        if inode.blocks[slot as usize] == INVALID_BLOCK {
            let indirect_block = alloc.alloc_block()?;
            self.write_indirect(indirect_block, &vec![INVALID_BLOCK; per as usize])?;
            inode.blocks[slot as usize] = indirect_block;
            store.write(inumber, inode)?;
        }
        let indirect_block = inode.blocks[slot as usize];
        let mut table = self.read_indirect(indirect_block)?;
        if table[inner as usize] == INVALID_BLOCK {
            let data_block = alloc.alloc_block()?;
            table[inner as usize] = data_block;
            self.write_indirect(indirect_block, &table)?;
            Ok(data_block)
        } else {
            Ok(table[inner as usize])
        }
    }

    /// Promotes an inode from direct-only to indirect layout: allocates one
    /// indirect block, copies the existing direct `blocks[]` verbatim into
    /// its first `BLOCKS_PER_INODE` entries, zero-fills the remainder,
    /// resets `inode.blocks[]` to all-`INVALID_BLOCK` with slot 0 pointing
    /// at the new indirect block, and sets the indirect flag.
    fn promote_to_indirect(
        &self,
        store: &InodeStore<'_>,
        alloc: &BitmapAllocator<'_>,
        inumber: u32,
        inode: &mut DiskInode,
    ) -> EdfsResult<()> {
        debug!("promoting inode {inumber} to indirect layout");
        let per = self.blocks_per_indirect() as usize;
        let indirect_block = alloc.alloc_block()?;

        let mut entries = vec![INVALID_BLOCK; per];
        entries[..BLOCKS_PER_INODE].copy_from_slice(&inode.blocks);
        self.write_indirect(indirect_block, &entries)?;

        inode.blocks = [INVALID_BLOCK; BLOCKS_PER_INODE];
        inode.blocks[0] = indirect_block;
        inode.indirect = true;
        store.write(inumber, inode)?;
        Ok(())
    }

    /// Frees the data block backing logical block `idx`, if any, and
    /// clears the slot (direct slot, or indirect-table entry, persisted
    /// via `write_indirect`) that named it — otherwise the freed block id
    /// would remain a live reference in `inode.blocks[]`/the indirect
    /// table while also being handed out again by `alloc_block`, aliasing
    /// two files onto the same physical block. Used by `truncate`-shrink.
    /// Silently no-ops on a hole. Does not release the indirect block
    /// itself, even if every one of its entries ends up `INVALID_BLOCK`
    /// (spec.md §9 open question 1).
    pub fn free_logical_block(
        &self,
        alloc: &BitmapAllocator<'_>,
        inode: &mut DiskInode,
        idx: u32,
    ) -> EdfsResult<()> {
        if !inode.indirect {
            if (idx as usize) < BLOCKS_PER_INODE {
                let b = inode.blocks[idx as usize];
                if b != INVALID_BLOCK {
                    alloc.free_block(b)?;
                    inode.blocks[idx as usize] = INVALID_BLOCK;
                }
            }
            return Ok(());
        }
        let per = self.blocks_per_indirect();
        let slot = idx / per;
        let inner = idx % per;
        if slot as usize >= BLOCKS_PER_INODE {
            return Ok(());
        }
        let indirect_block = inode.blocks[slot as usize];
        if indirect_block == INVALID_BLOCK {
            return Ok(());
        }
        let mut table = self.read_indirect(indirect_block)?;
        let b = table[inner as usize];
        if b != INVALID_BLOCK {
            alloc.free_block(b)?;
            table[inner as usize] = INVALID_BLOCK;
            self.write_indirect(indirect_block, &table)?;
        }
        Ok(())
    }

    /// Frees every data block an inode references, walking the indirect
    /// array and freeing its entries, then the indirect block itself, when
    /// in indirect mode. Used by `unlink` (spec.md §4.7).
    pub fn free_all_blocks(&self, alloc: &BitmapAllocator<'_>, inode: &DiskInode) -> EdfsResult<()> {
        if !inode.indirect {
            for &b in &inode.blocks {
                if b != INVALID_BLOCK {
                    alloc.free_block(b)?;
                }
            }
            return Ok(());
        }
        for &indirect_block in &inode.blocks {
            if indirect_block == INVALID_BLOCK {
                continue;
            }
            let table = self.read_indirect(indirect_block)?;
            for &data_block in &table {
                if data_block != INVALID_BLOCK {
                    alloc.free_block(data_block)?;
                }
            }
            alloc.free_block(indirect_block)?;
        }
        Ok(())
    }
}
