//! Test-only image builder, public so both this crate's unit tests and
//! downstream integration tests (`tests/`) can reach it. This is NOT the
//! offline image-creation tool named out of scope in spec.md §1 — it is
//! scaffolding so tests have a fresh, valid image to exercise `EdfsCore`
//! against, built directly from the crate's own codec rather than shipped
//! as a distributable product. Not part of the crate's stable surface;
//! it may change shape without a semver bump.

use std::io::Write;
use std::os::unix::fs::FileExt;

use tempfile::NamedTempFile;

use crate::dir::DIR_ENTRY_WIRE_SIZE;
use crate::image::ImageHandle;
use crate::inode::{DiskInode, InodeKind, DISK_INODE_WIRE_SIZE};
use crate::super_block::{SuperBlock, EDFS_MAGIC, SUPERBLOCK_WIRE_SIZE};

/// Formats a fresh image with `n_inodes` inodes and `n_blocks` data blocks
/// of `block_size` bytes each, with a single empty root directory
/// (inumber 1) and everything else free. Returns the backing temp file
/// (kept alive for the caller's lifetime) and an open handle.
pub fn fresh_image(block_size: u32, n_inodes: u32, n_blocks: u32) -> (NamedTempFile, ImageHandle) {
    assert!(
        block_size as usize >= DIR_ENTRY_WIRE_SIZE,
        "block too small for a dir entry"
    );
    assert_eq!(block_size % 4, 0, "block_size must be a multiple of 4");

    let inode_table_start = SUPERBLOCK_WIRE_SIZE as u64;
    let inode_table_bytes = n_inodes as u64 * DISK_INODE_WIRE_SIZE as u64;
    let bitmap_start = inode_table_start + inode_table_bytes;
    let bitmap_size = (((n_blocks as u64) + 7) / 8).max(1) as u32;
    let data_block_start = (bitmap_start + bitmap_size as u64 + 7) / 8 * 8;

    let sb = SuperBlock {
        magic: EDFS_MAGIC,
        block_size,
        inode_table_start,
        inode_table_n_inodes: n_inodes,
        bitmap_start,
        bitmap_size,
        data_block_start,
        root_inumber: 1,
    };

    // Size the backing file for every block id the bitmap can address
    // (`bitmap_size * 8`, which rounds `n_blocks` up to a whole byte of
    // bits), not just `n_blocks` itself — `declared_size_bytes` checks
    // against exactly that span, and a file sized only for `n_blocks`
    // would be rejected as undersized whenever `n_blocks` isn't already a
    // multiple of 8.
    let total_size = sb.declared_size_bytes();
    let mut file = NamedTempFile::new().expect("create temp image file");
    file.as_file_mut()
        .set_len(total_size)
        .expect("size temp image file");
    file.write_all(&sb.to_bytes()).expect("write super block");

    for inumber in 0..n_inodes {
        let inode = if inumber == sb.root_inumber {
            DiskInode::new(InodeKind::Directory)
        } else {
            DiskInode::free()
        };
        let offset = sb.inode_table_start + inumber as u64 * DISK_INODE_WIRE_SIZE as u64;
        file.as_file()
            .write_at(&inode.to_bytes(), offset)
            .expect("write inode record");
    }

    file.flush().expect("flush temp image file");
    let path = file.path().to_path_buf();
    let image = ImageHandle::open(&path, true).expect("reopen freshly formatted image");
    (file, image)
}
