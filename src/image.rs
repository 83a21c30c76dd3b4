//! Image handle: owns the backing file descriptor and exposes positioned
//! I/O. Every higher layer reads and writes through `pread`/`pwrite`-style
//! calls at absolute offsets; there is no seek cursor (spec.md §4.1).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path as FsPath;

use log::{debug, trace};

use crate::error::{EdfsError, EdfsResult};
use crate::super_block::SuperBlock;

/// An open EdFS image backing file, plus its (immutable, once validated)
/// super block.
pub struct ImageHandle {
    file: File,
    super_block: SuperBlock,
}

impl ImageHandle {
    /// Opens `path` read-write. When `verify_super` is set, reads and
    /// validates the super block (magic match, file size at least the
    /// declared filesystem size) before returning.
    pub fn open(path: impl AsRef<FsPath>, verify_super: bool) -> EdfsResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EdfsError::NotFound(path.display().to_string())
                } else {
                    EdfsError::Io(format!("opening {}: {e}", path.display()))
                }
            })?;

        let mut raw = [0u8; crate::super_block::SUPERBLOCK_WIRE_SIZE];
        file.read_at(&mut raw, crate::super_block::SUPER_BLOCK_OFFSET)
            .map_err(|e| EdfsError::Io(format!("reading super block: {e}")))?;
        let super_block = SuperBlock::from_bytes(&raw)?;

        if verify_super {
            let len = file
                .metadata()
                .map_err(|e| EdfsError::Io(format!("stat {}: {e}", path.display())))?
                .len();
            if len < super_block.declared_size_bytes() {
                return Err(EdfsError::InvalidArgument(format!(
                    "image {} is {len} bytes, smaller than the declared filesystem size {}",
                    path.display(),
                    super_block.declared_size_bytes()
                )));
            }
            debug!(
                "opened EdFS image {} ({} inodes, block_size={})",
                path.display(),
                super_block.inode_table_n_inodes,
                super_block.block_size
            );
        }

        Ok(ImageHandle { file, super_block })
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// Positioned read of exactly `buf.len()` bytes at `offset`.
    pub fn pread(&self, offset: u64, buf: &mut [u8]) -> EdfsResult<()> {
        trace!("pread off={offset} len={}", buf.len());
        self.file
            .read_at(buf, offset)
            .map_err(|e| EdfsError::Io(format!("short read at {offset}: {e}")))
            .and_then(|n| {
                if n == buf.len() {
                    Ok(())
                } else {
                    Err(EdfsError::Io(format!(
                        "short read at {offset}: wanted {} got {n}",
                        buf.len()
                    )))
                }
            })
    }

    /// Positioned write of exactly `buf.len()` bytes at `offset`.
    pub fn pwrite(&self, offset: u64, buf: &[u8]) -> EdfsResult<()> {
        trace!("pwrite off={offset} len={}", buf.len());
        self.file
            .write_at(buf, offset)
            .map_err(|e| EdfsError::Io(format!("short write at {offset}: {e}")))
            .and_then(|n| {
                if n == buf.len() {
                    Ok(())
                } else {
                    Err(EdfsError::Io(format!(
                        "short write at {offset}: wanted {} wrote {n}",
                        buf.len()
                    )))
                }
            })
    }
}
