//! Per-project index handle
//!
//! The handle pairs the project's storage with its [`ReadWriteMonitor`].
//! Storage is only reachable through [`IndexHandle::read`] and
//! [`IndexHandle::write`], so every access follows the monitor protocol.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::monitor::{ReadGuard, ReadWriteMonitor, WriteGuard};
use super::storage::{FileIndex, IndexError, IndexStorage};

/// File extension of saved indexes
pub const INDEX_EXTENSION: &str = "index";

/// Consistency of an index as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexState {
    #[default]
    Unknown,
    /// A full rebuild is queued or running
    Rebuilding,
    /// Individual documents are being updated
    Updating,
    UpToDate,
    /// Flushed to disk
    Saved,
}

/// Index file name for a project
pub fn index_file_name(project: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}.{INDEX_EXTENSION}", &digest[..16])
}

/// Shared handle to one project's index
pub struct IndexHandle {
    project: String,
    path: Option<PathBuf>,
    monitor: ReadWriteMonitor,
    storage: RwLock<Box<dyn IndexStorage>>,
    state: Mutex<IndexState>,
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("project", &self.project)
            .field("path", &self.path)
            .field("state", &self.state())
            .field("monitor", &self.monitor.status())
            .finish()
    }
}

impl IndexHandle {
    pub fn new(project: impl Into<String>, storage: Box<dyn IndexStorage>) -> Self {
        let path = storage.path().map(Path::to_path_buf);
        Self {
            project: project.into(),
            path,
            monitor: ReadWriteMonitor::new(),
            storage: RwLock::new(storage),
            state: Mutex::new(IndexState::Unknown),
        }
    }

    /// Open the project's index inside `location`, or a transient one when no
    /// location is configured
    ///
    /// An unreadable index file is replaced by an empty index; the returned
    /// flag tells the caller a rebuild is needed.
    pub fn open(project: &str, location: Option<&Path>) -> (Self, bool) {
        let Some(location) = location else {
            return (Self::new(project, Box::new(FileIndex::transient())), true);
        };

        let path = location.join(index_file_name(project));
        let existed = path.exists();
        match FileIndex::open(&path) {
            Ok(index) => {
                let needs_rebuild = !existed;
                debug!(
                    "Opened index for {} at {} (needs rebuild: {})",
                    project,
                    path.display(),
                    needs_rebuild
                );
                (Self::new(project, Box::new(index)), needs_rebuild)
            }
            Err(err) => {
                warn!(
                    "Discarding unreadable index {} for {}: {}",
                    path.display(),
                    project,
                    err
                );
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!("Could not delete index {}: {}", path.display(), err);
                }
                let index = FileIndex::empty_at(&path);
                (Self::new(project, Box::new(index)), true)
            }
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Backing file, `None` for transient indexes
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn monitor(&self) -> &ReadWriteMonitor {
        &self.monitor
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: IndexState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Enter a read section and borrow the storage
    pub fn read(&self) -> IndexReader<'_> {
        let guard = self.monitor.read();
        let storage = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        IndexReader {
            storage,
            _guard: guard,
        }
    }

    /// Enter the write section and borrow the storage mutably
    pub fn write(&self) -> IndexWriter<'_> {
        let guard = self.monitor.write();
        let storage = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        IndexWriter {
            storage,
            _guard: guard,
        }
    }

    /// Save under the write lock if there are unsaved changes
    ///
    /// Returns whether anything was written.
    pub fn save_if_changed(&self) -> Result<bool, IndexError> {
        let mut writer = self.write();
        if !writer.has_changed() {
            return Ok(false);
        }
        writer.save()?;
        drop(writer);
        self.set_state(IndexState::Saved);
        Ok(true)
    }

    /// Delete the backing file, waiting for active readers and writers
    pub fn delete_file(&self) -> Result<(), IndexError> {
        let _writer = self.write();
        if let Some(path) = &self.path
            && path.exists()
        {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Read access to an index; released on drop
pub struct IndexReader<'a> {
    // Declared first so the storage borrow ends before the monitor is released
    storage: RwLockReadGuard<'a, Box<dyn IndexStorage>>,
    _guard: ReadGuard<'a>,
}

impl Deref for IndexReader<'_> {
    type Target = dyn IndexStorage;

    fn deref(&self) -> &Self::Target {
        &**self.storage
    }
}

/// Exclusive access to an index; released on drop
pub struct IndexWriter<'a> {
    storage: RwLockWriteGuard<'a, Box<dyn IndexStorage>>,
    _guard: WriteGuard<'a>,
}

impl Deref for IndexWriter<'_> {
    type Target = dyn IndexStorage;

    fn deref(&self) -> &Self::Target {
        &**self.storage
    }
}

impl DerefMut for IndexWriter<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.storage
    }
}
