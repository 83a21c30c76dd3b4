//! Directory engine (spec.md §4.5). A directory inode is directly
//! addressed only: its payload is the set of data blocks named in
//! `blocks[]`, each holding `dir_entries_per_block` fixed-size records. An
//! entry is empty iff `inumber == 0`.

use log::debug;

use crate::bitmap::BitmapAllocator;
use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;
use crate::inode::{
    DiskInode, InodeKind, InodeStore, BLOCKS_PER_INODE, INVALID_BLOCK, RESERVED_INUMBER,
};

/// Maximum filename length, including the NUL terminator the directory
/// entry reserves for it (spec.md §8's worked scenarios use this exact
/// value).
pub const FILENAME_SIZE: usize = 60;

/// `4 (inumber) + FILENAME_SIZE`.
pub const DIR_ENTRY_WIRE_SIZE: usize = 4 + FILENAME_SIZE;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// 0 means this slot is empty.
    pub inumber: u32,
    name_buf: [u8; FILENAME_SIZE],
}

impl DirEntry {
    fn empty() -> Self {
        DirEntry {
            inumber: 0,
            name_buf: [0u8; FILENAME_SIZE],
        }
    }

    fn with_name(inumber: u32, name: &str) -> EdfsResult<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= FILENAME_SIZE {
            return Err(EdfsError::InvalidArgument(format!(
                "filename {name:?} does not fit in {FILENAME_SIZE} bytes"
            )));
        }
        let mut name_buf = [0u8; FILENAME_SIZE];
        name_buf[..bytes.len()].copy_from_slice(bytes);
        Ok(DirEntry { inumber, name_buf })
    }

    pub fn is_empty(&self) -> bool {
        self.inumber == RESERVED_INUMBER
    }

    pub fn name(&self) -> String {
        let len = self
            .name_buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_SIZE);
        String::from_utf8_lossy(&self.name_buf[..len]).into_owned()
    }

    fn to_bytes(self) -> [u8; DIR_ENTRY_WIRE_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.inumber.to_le_bytes());
        buf[4..].copy_from_slice(&self.name_buf);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let inumber = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut name_buf = [0u8; FILENAME_SIZE];
        name_buf.copy_from_slice(&buf[4..4 + FILENAME_SIZE]);
        DirEntry { inumber, name_buf }
    }
}

pub struct DirEngine<'a> {
    image: &'a ImageHandle,
}

impl<'a> DirEngine<'a> {
    pub fn new(image: &'a ImageHandle) -> Self {
        DirEngine { image }
    }

    fn block_size(&self) -> u32 {
        self.image.super_block().block_size
    }

    fn entries_per_block(&self) -> u32 {
        self.image.super_block().dir_entries_per_block()
    }

    fn read_block(&self, block: u32) -> EdfsResult<Vec<u8>> {
        let mut raw = vec![0u8; self.block_size() as usize];
        self.image
            .pread(self.image.super_block().block_offset(block), &mut raw)?;
        Ok(raw)
    }

    fn write_block(&self, block: u32, raw: &[u8]) -> EdfsResult<()> {
        self.image
            .pwrite(self.image.super_block().block_offset(block), raw)
    }

    fn require_directory(dir: &DiskInode) -> EdfsResult<()> {
        if dir.kind != InodeKind::Directory {
            return Err(EdfsError::NotDirectory("expected a directory inode".into()));
        }
        Ok(())
    }

    /// Visits every non-empty entry across the directory's allocated
    /// blocks, calling `visit(slot, index_in_block, entry)`. Stops early
    /// when `visit` returns `false`.
    pub fn scan<F>(&self, dir: &DiskInode, mut visit: F) -> EdfsResult<()>
    where
        F: FnMut(usize, u32, &DirEntry) -> bool,
    {
        Self::require_directory(dir)?;
        let per_block = self.entries_per_block();
        for (slot, &block) in dir.blocks.iter().enumerate() {
            if block == INVALID_BLOCK {
                continue;
            }
            let raw = self.read_block(block)?;
            for i in 0..per_block {
                let start = (i as usize) * DIR_ENTRY_WIRE_SIZE;
                let entry = DirEntry::from_bytes(&raw[start..start + DIR_ENTRY_WIRE_SIZE]);
                if entry.is_empty() {
                    continue;
                }
                if !visit(slot, i, &entry) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Returns the non-empty entries' names and inumbers.
    pub fn list(&self, dir: &DiskInode) -> EdfsResult<Vec<(String, u32)>> {
        let mut out = Vec::new();
        self.scan(dir, |_, _, entry| {
            out.push((entry.name(), entry.inumber));
            true
        })?;
        Ok(out)
    }

    pub fn lookup(&self, dir: &DiskInode, name: &str) -> EdfsResult<Option<u32>> {
        let mut found = None;
        self.scan(dir, |_, _, entry| {
            if entry.name() == name {
                found = Some(entry.inumber);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    /// Inserts `(name, inumber)` into the first empty slot, growing the
    /// directory by one data block if none exists and room remains in
    /// `blocks[]`. Does NOT check for duplicate names — callers
    /// (`create`/`mkdir`) must `lookup` first.
    pub fn insert(
        &self,
        store: &InodeStore<'_>,
        alloc: &BitmapAllocator<'_>,
        dir_inumber: u32,
        dir: &mut DiskInode,
        name: &str,
        inumber: u32,
    ) -> EdfsResult<()> {
        Self::require_directory(dir)?;
        let new_entry = DirEntry::with_name(inumber, name)?;
        let per_block = self.entries_per_block();

        for &block in &dir.blocks {
            if block == INVALID_BLOCK {
                continue;
            }
            let mut raw = self.read_block(block)?;
            for i in 0..per_block {
                let start = (i as usize) * DIR_ENTRY_WIRE_SIZE;
                let entry = DirEntry::from_bytes(&raw[start..start + DIR_ENTRY_WIRE_SIZE]);
                if entry.is_empty() {
                    raw[start..start + DIR_ENTRY_WIRE_SIZE].copy_from_slice(&new_entry.to_bytes());
                    self.write_block(block, &raw)?;
                    return Ok(());
                }
            }
        }

        let free_slot = dir
            .blocks
            .iter()
            .position(|&b| b == INVALID_BLOCK)
            .ok_or(EdfsError::NoSpace)?;

        let new_block = alloc.alloc_block()?;
        let mut raw = vec![0u8; self.block_size() as usize];
        raw[..DIR_ENTRY_WIRE_SIZE].copy_from_slice(&new_entry.to_bytes());
        for i in 1..per_block {
            let start = (i as usize) * DIR_ENTRY_WIRE_SIZE;
            raw[start..start + DIR_ENTRY_WIRE_SIZE].copy_from_slice(&DirEntry::empty().to_bytes());
        }
        self.write_block(new_block, &raw)?;

        dir.blocks[free_slot] = new_block;
        store.write(dir_inumber, dir)?;
        debug!("directory {dir_inumber} grew to {} blocks", free_slot + 1);
        Ok(())
    }

    /// Zeroes the entry matching `inumber`. `Io` if not found, which would
    /// indicate a filesystem inconsistency (spec.md §4.5).
    pub fn remove_by_inumber(&self, dir: &DiskInode, inumber: u32) -> EdfsResult<()> {
        Self::require_directory(dir)?;
        let per_block = self.entries_per_block();
        for &block in &dir.blocks {
            if block == INVALID_BLOCK {
                continue;
            }
            let mut raw = self.read_block(block)?;
            for i in 0..per_block {
                let start = (i as usize) * DIR_ENTRY_WIRE_SIZE;
                let entry = DirEntry::from_bytes(&raw[start..start + DIR_ENTRY_WIRE_SIZE]);
                if !entry.is_empty() && entry.inumber == inumber {
                    raw[start..start + DIR_ENTRY_WIRE_SIZE].copy_from_slice(&DirEntry::empty().to_bytes());
                    self.write_block(block, &raw)?;
                    return Ok(());
                }
            }
        }
        Err(EdfsError::Io(format!(
            "directory entry for inumber {inumber} not found during removal"
        )))
    }

    /// `true` iff the directory holds no non-empty entries. EdFS does not
    /// store synthetic `.`/`..` entries on disk (readdir synthesizes them),
    /// so emptiness is simply "no entries at all".
    pub fn is_empty(&self, dir: &DiskInode) -> EdfsResult<bool> {
        let mut empty = true;
        self.scan(dir, |_, _, _| {
            empty = false;
            false
        })?;
        Ok(empty)
    }
}

static_assertions::const_assert!(BLOCKS_PER_INODE > 0);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fresh_image;

    #[test]
    fn insert_then_lookup() {
        let (_tmp, img) = fresh_image(512, 16, 8);
        let store = InodeStore::new(&img);
        let alloc = BitmapAllocator::new(&img);
        let dir_engine = DirEngine::new(&img);

        let root_inumber = img.super_block().root_inumber;
        let mut root = store.read(root_inumber).unwrap();

        dir_engine
            .insert(&store, &alloc, root_inumber, &mut root, "hello.txt", 5)
            .unwrap();
        assert_eq!(dir_engine.lookup(&root, "hello.txt").unwrap(), Some(5));
        assert_eq!(dir_engine.lookup(&root, "nope").unwrap(), None);
    }

    #[test]
    fn remove_then_reinsert_reuses_slot() {
        let (_tmp, img) = fresh_image(512, 16, 8);
        let store = InodeStore::new(&img);
        let alloc = BitmapAllocator::new(&img);
        let dir_engine = DirEngine::new(&img);
        let root_inumber = img.super_block().root_inumber;
        let mut root = store.read(root_inumber).unwrap();

        dir_engine
            .insert(&store, &alloc, root_inumber, &mut root, "a", 2)
            .unwrap();
        dir_engine.remove_by_inumber(&root, 2).unwrap();
        assert_eq!(dir_engine.lookup(&root, "a").unwrap(), None);
        assert!(dir_engine.is_empty(&root).unwrap());
    }

    #[test]
    fn grows_by_one_block_when_full() {
        let (_tmp, img) = fresh_image(128, 16, 8);
        let store = InodeStore::new(&img);
        let alloc = BitmapAllocator::new(&img);
        let dir_engine = DirEngine::new(&img);
        let root_inumber = img.super_block().root_inumber;
        let mut root = store.read(root_inumber).unwrap();

        let per_block = img.super_block().dir_entries_per_block();
        for i in 0..per_block {
            dir_engine
                .insert(&store, &alloc, root_inumber, &mut root, &format!("f{i}"), i + 2)
                .unwrap();
        }
        assert_eq!(root.blocks[0] != INVALID_BLOCK, true);
        assert_eq!(root.blocks[1], INVALID_BLOCK);

        dir_engine
            .insert(&store, &alloc, root_inumber, &mut root, "overflow", 999)
            .unwrap();
        assert_ne!(root.blocks[1], INVALID_BLOCK);
    }
}
