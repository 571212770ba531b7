//! Resource tree abstraction
//!
//! Indexing reads sources and walks folders through [`ResourceTree`] so the
//! request pipeline can be driven by an in-memory tree in tests.

use std::io;
use std::path::Path;

use walkdir::WalkDir;

// ============================================================================
// Resource Tree Trait
// ============================================================================

/// Visitor decision for a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into this directory
    SkipSubtree,
}

/// One entry reported by [`ResourceTree::walk`]
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry<'a> {
    pub path: &'a Path,
    pub is_dir: bool,
}

/// Read access to the source tree
pub trait ResourceTree: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Read a source file as text
    fn read(&self, path: &Path) -> io::Result<String>;

    /// Visit every entry below `root` (not `root` itself) in sorted,
    /// parent-before-children order
    fn walk(
        &self,
        root: &Path,
        visitor: &mut dyn FnMut(WalkEntry<'_>) -> WalkControl,
    ) -> io::Result<()>;
}

// ============================================================================
// Real File System Implementation
// ============================================================================

/// Resource tree backed by the local file system
#[derive(Debug, Clone, Default)]
pub struct RealResources;

impl ResourceTree for RealResources {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn walk(
        &self,
        root: &Path,
        visitor: &mut dyn FnMut(WalkEntry<'_>) -> WalkControl,
    ) -> io::Result<()> {
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Folder {} does not exist", root.display()),
            ));
        }

        let mut entries = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = entry?;
            let is_dir = entry.file_type().is_dir();
            let control = visitor(WalkEntry {
                path: entry.path(),
                is_dir,
            });
            if is_dir && control == WalkControl::SkipSubtree {
                entries.skip_current_dir();
            }
        }
        Ok(())
    }
}
