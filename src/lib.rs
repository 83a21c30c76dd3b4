//! EdFS: an educational on-disk filesystem backed by a single image file.
//!
//! Layered the way a teaching filesystem should read, leaves first:
//!   + Image handle: positioned I/O against the backing file.
//!   + Bitmap: allocator for raw data blocks.
//!   + Inodes: fixed-size on-disk records, two-level (direct + single
//!     indirect) block addressing.
//!   + Directories: an inode whose content is a list of (name, inumber)
//!     entries.
//!   + Paths: `/usr/rtm/xv6/fs.c`-style component walking, adapted to
//!     `str`.
//!   + Operations: the externally visible create/unlink/read/write/…
//!     surface a host mount binding drives.
//!
//! This crate implements the core only; `fuse_host` and `bin/edfs.rs` are
//! the (ambient, not core) FUSE binding and CLI entry point.

pub mod bitmap;
pub mod block;
pub mod dir;
pub mod error;
pub mod image;
pub mod inode;
pub mod ops;
pub mod path;
pub mod super_block;

pub mod fuse_host;
pub mod testing;

pub use error::{EdfsError, EdfsResult};
pub use ops::{Attributes, EdfsCore, FileKind};
