//! Path resolver (spec.md §4.6). Paths are absolute, `/`-delimited;
//! consecutive slashes and a trailing slash are no-op separators, the way
//! the teacher's `fs::path::Path::skipelem` walks xv6 paths component by
//! component.

use crate::dir::{DirEngine, FILENAME_SIZE};
use crate::error::{EdfsError, EdfsResult};
use crate::image::ImageHandle;
use crate::inode::{DiskInode, InodeKind, InodeStore};

pub struct PathResolver<'a> {
    image: &'a ImageHandle,
}

/// Splits `path` into its non-empty, non-slash components, mirroring
/// `skipelem`'s treatment of repeated and trailing slashes.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

impl<'a> PathResolver<'a> {
    pub fn new(image: &'a ImageHandle) -> Self {
        PathResolver { image }
    }

    fn store(&self) -> InodeStore<'_> {
        InodeStore::new(self.image)
    }

    fn dirs(&self) -> DirEngine<'_> {
        DirEngine::new(self.image)
    }

    fn root(&self) -> EdfsResult<(u32, DiskInode)> {
        let root_inumber = self.image.super_block().root_inumber;
        let root = self.store().read(root_inumber)?;
        Ok((root_inumber, root))
    }

    /// Walks from root, resolving each path component in turn. Returns the
    /// target inode (and its inumber).
    pub fn find_inode(&self, path: &str) -> EdfsResult<(u32, DiskInode)> {
        let (mut inumber, mut inode) = self.root()?;
        for name in components(path) {
            if name.len() >= FILENAME_SIZE {
                return Err(EdfsError::InvalidArgument(format!(
                    "path component {name:?} is too long"
                )));
            }
            if inode.kind != InodeKind::Directory {
                return Err(EdfsError::NotDirectory(format!(
                    "{path}: a non-final component is not a directory"
                )));
            }
            let next = self
                .dirs()
                .lookup(&inode, name)?
                .ok_or_else(|| EdfsError::NotFound(path.to_string()))?;
            inumber = next;
            inode = self.store().read(inumber)?;
        }
        Ok((inumber, inode))
    }

    /// Splits `path` into its parent directory (resolved) and basename.
    /// `InvalidArgument` if the path is empty, not absolute, or names no
    /// basename (`/`, `//`, ...). `NotFound` if the parent path doesn't
    /// resolve.
    pub fn get_parent_and_basename<'p>(
        &self,
        path: &'p str,
    ) -> EdfsResult<(u32, DiskInode, &'p str)> {
        if !path.starts_with('/') {
            return Err(EdfsError::InvalidArgument(format!(
                "{path}: path must be absolute"
            )));
        }
        let trimmed = path.trim_end_matches('/');
        let last_slash = trimmed.rfind('/').ok_or_else(|| {
            EdfsError::InvalidArgument(format!("{path}: no path separator"))
        })?;
        let basename = &trimmed[last_slash + 1..];
        if basename.is_empty() {
            return Err(EdfsError::InvalidArgument(format!(
                "{path}: names no entry (did you mean the root?)"
            )));
        }
        if basename.len() >= FILENAME_SIZE {
            return Err(EdfsError::InvalidArgument(format!(
                "{basename:?} is too long"
            )));
        }
        let parent_path = &trimmed[..last_slash];
        let (parent_inumber, parent_inode) = if parent_path.is_empty() {
            self.root()?
        } else {
            self.find_inode(parent_path)?
        };
        Ok((parent_inumber, parent_inode, basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BitmapAllocator;
    use crate::dir::DirEngine;
    use crate::inode::InodeStore;
    use crate::testing::fresh_image;

    fn mkdir(img: &ImageHandle, parent: u32, name: &str, inumber: u32) {
        let store = InodeStore::new(img);
        let alloc = BitmapAllocator::new(img);
        let dirs = DirEngine::new(img);
        let mut parent_inode = store.read(parent).unwrap();
        dirs.insert(&store, &alloc, parent, &mut parent_inode, name, inumber)
            .unwrap();
        let mut child = store.new_inode(InodeKind::Directory).unwrap().1;
        child.kind = InodeKind::Directory;
        store.write(inumber, &child).unwrap();
    }

    #[test]
    fn finds_nested_directory() {
        let (_tmp, img) = fresh_image(512, 16, 8);
        mkdir(&img, img.super_block().root_inumber, "a", 2);
        mkdir(&img, 2, "b", 3);

        let resolver = PathResolver::new(&img);
        let (inumber, inode) = resolver.find_inode("/a/b").unwrap();
        assert_eq!(inumber, 3);
        assert_eq!(inode.kind, InodeKind::Directory);

        // Repeated and trailing slashes are no-ops.
        let (inumber2, _) = resolver.find_inode("//a//b/").unwrap();
        assert_eq!(inumber2, 3);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (_tmp, img) = fresh_image(512, 16, 8);
        let resolver = PathResolver::new(&img);
        assert!(matches!(
            resolver.find_inode("/nope"),
            Err(EdfsError::NotFound(_))
        ));
    }

    #[test]
    fn parent_and_basename_split() {
        let (_tmp, img) = fresh_image(512, 16, 8);
        mkdir(&img, img.super_block().root_inumber, "a", 2);

        let resolver = PathResolver::new(&img);
        let (parent, _, base) = resolver.get_parent_and_basename("/a/b.txt").unwrap();
        assert_eq!(parent, 2);
        assert_eq!(base, "b.txt");

        let (parent, _, base) = resolver.get_parent_and_basename("/f").unwrap();
        assert_eq!(parent, img.super_block().root_inumber);
        assert_eq!(base, "f");

        assert!(resolver.get_parent_and_basename("/").is_err());
        assert!(resolver.get_parent_and_basename("relative").is_err());
    }
}
