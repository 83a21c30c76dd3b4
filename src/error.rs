//! The error taxonomy of spec.md §7, expressed as a Rust enum instead of
//! bare negative integers. The negative-integer convention itself is
//! confined to [`EdfsError::to_errno`], used only at the host-binding
//! boundary in `fuse_host.rs`.

use thiserror::Error;

/// Every error the core filesystem can return.
#[derive(Debug, Error)]
pub enum EdfsError {
    /// Path, inode, or directory entry does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Operation required a directory but the inode is not one.
    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// Operation required a file but the inode is a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// rmdir on a directory that still has entries.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// create/mkdir on a name that is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The bitmap has no free bit, the inode table has no free slot, or a
    /// directory has no room left for another data block.
    #[error("no space left on device")]
    NoSpace,

    /// A logical block index exceeds what indirect addressing can map.
    #[error("file too large")]
    FileTooBig,

    /// Malformed path, negative size, or a name that is too long.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A positioned read/write came back short, or the on-disk structures
    /// are inconsistent in a way that leaves no good recovery.
    #[error("I/O error: {0}")]
    Io(String),

    /// Scratch buffer allocation failed.
    #[error("out of memory")]
    OutOfMemory,
}

pub type EdfsResult<T> = Result<T, EdfsError>;

impl EdfsError {
    /// Maps to the POSIX errno spelled out in spec.md §7. The host binding
    /// negates this value before handing it back to FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            EdfsError::NotFound(_) => libc_errno::ENOENT,
            EdfsError::NotDirectory(_) => libc_errno::ENOTDIR,
            EdfsError::IsDirectory(_) => libc_errno::EISDIR,
            EdfsError::NotEmpty(_) => libc_errno::ENOTEMPTY,
            EdfsError::AlreadyExists(_) => libc_errno::EEXIST,
            EdfsError::NoSpace => libc_errno::ENOSPC,
            EdfsError::FileTooBig => libc_errno::EFBIG,
            EdfsError::InvalidArgument(_) => libc_errno::EINVAL,
            EdfsError::Io(_) => libc_errno::EIO,
            EdfsError::OutOfMemory => libc_errno::ENOMEM,
        }
    }
}

impl From<std::io::Error> for EdfsError {
    fn from(e: std::io::Error) -> Self {
        EdfsError::Io(e.to_string())
    }
}

/// A small private errno table so that the core crate does not need to pull
/// in `libc` just to name ten constants (`fuse_host.rs`, which does depend
/// on `libc`, re-derives the mapping it actually needs from this module).
mod libc_errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const EFBIG: i32 = 27;
    pub const ENOTEMPTY: i32 = 39;
}
