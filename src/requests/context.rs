//! Shared state reachable from requests
//!
//! [`IndexContext`] holds the registered project snapshots, the open index
//! handles and the collaborators requests need. The request queue is held
//! weakly: the job manager owns queued requests, and requests own the
//! context.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::{debug, info, warn};

use super::{IndexRequest, RequestQueue};
use crate::config::IndexerConfig;
use crate::events::{IndexEvent, IndexEvents};
use crate::index::{IndexError, IndexHandle, index_file_name};
use crate::indexer::MarkerSink;
use crate::parser::SourceParser;
use crate::project::{Project, ResourceTree};

pub struct IndexContext {
    config: IndexerConfig,
    resources: Arc<dyn ResourceTree>,
    parser: Arc<dyn SourceParser>,
    markers: Arc<dyn MarkerSink>,
    events: Arc<IndexEvents>,
    queue: Weak<dyn RequestQueue>,
    projects: RwLock<HashMap<String, Project>>,
    indexes: Mutex<HashMap<String, Arc<IndexHandle>>>,
    /// Headers indexed through an include during the current pass
    encountered_headers: Mutex<HashSet<PathBuf>>,
}

impl fmt::Debug for IndexContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("IndexContext")
            .field("projects", &projects.keys().collect::<Vec<_>>())
            .field("indexes", &indexes.len())
            .finish()
    }
}

impl IndexContext {
    pub fn new(
        config: IndexerConfig,
        resources: Arc<dyn ResourceTree>,
        parser: Arc<dyn SourceParser>,
        markers: Arc<dyn MarkerSink>,
        events: Arc<IndexEvents>,
        queue: Weak<dyn RequestQueue>,
    ) -> Self {
        Self {
            config,
            resources,
            parser,
            markers,
            events,
            queue,
            projects: RwLock::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            encountered_headers: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn resources(&self) -> &dyn ResourceTree {
        self.resources.as_ref()
    }

    pub fn parser(&self) -> &dyn SourceParser {
        self.parser.as_ref()
    }

    pub fn markers(&self) -> &dyn MarkerSink {
        self.markers.as_ref()
    }

    pub fn events(&self) -> &IndexEvents {
        &self.events
    }

    /// Queue a follow-up request; false once the queue is gone or the request
    /// collapsed into an equal waiting one
    pub fn submit(&self, request: Arc<dyn IndexRequest>) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.request(request),
            None => {
                debug!("Dropping {}: request queue is gone", request);
                false
            }
        }
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// Current snapshot of a registered project
    pub fn project(&self, name: &str) -> Option<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn project_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Register or replace a project; returns the previous snapshot
    pub fn register_project(&self, project: Project) -> Option<Project> {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.name().to_string(), project)
    }

    pub fn unregister_project(&self, name: &str) -> Option<Project> {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Returns false when the project is not registered
    pub fn set_indexing_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let Some(project) = projects.remove(name) else {
            return false;
        };
        projects.insert(name.to_string(), project.with_indexing_enabled(enabled));
        true
    }

    // ========================================================================
    // Index Handles
    // ========================================================================

    /// Path identifying a project's index, also for transient indexes
    pub fn index_path(&self, project: &str) -> PathBuf {
        let file_name = index_file_name(project);
        match &self.config.index_location {
            Some(location) => location.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    /// The project's index if it is open
    pub fn index(&self, project: &str) -> Option<Arc<IndexHandle>> {
        self.indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned()
    }

    /// Open the project's index, creating it on first use
    ///
    /// The flag is true when the index was just created and its contents
    /// cannot be trusted, so a rebuild is due.
    pub fn open_index(&self, project: &str) -> (Arc<IndexHandle>, bool) {
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = indexes.get(project) {
            return (handle.clone(), false);
        }
        let (handle, needs_rebuild) = IndexHandle::open(project, self.config.index_location.as_deref());
        let handle = Arc::new(handle);
        indexes.insert(project.to_string(), handle.clone());
        debug!("Opened index for {} (needs rebuild: {})", project, needs_rebuild);
        (handle, needs_rebuild)
    }

    pub fn indexes(&self) -> Vec<Arc<IndexHandle>> {
        self.indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Forget the project's index and delete its file
    ///
    /// Waits for readers and writers of the open handle. Must not be called
    /// while holding one of its locks.
    pub fn discard_index(&self, project: &str) {
        let removed = self
            .indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project);
        let result = match &removed {
            Some(handle) => handle.delete_file(),
            None => self.delete_index_file(project),
        };
        if let Err(err) = result {
            warn!("Could not delete index of {}: {}", project, err);
        }
        info!("Discarded index of {}", project);
        self.events.publish(IndexEvent::IndexRemoved {
            project: project.to_string(),
        });
    }

    fn delete_index_file(&self, project: &str) -> Result<(), IndexError> {
        if self.config.index_location.is_none() {
            return Ok(());
        }
        let path = self.index_path(project);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    // ========================================================================
    // Encountered Headers
    // ========================================================================

    /// Remember a header seen through an include; false if already known
    pub fn mark_header_encountered(&self, path: &Path) -> bool {
        self.encountered_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf())
    }

    pub fn is_header_encountered(&self, path: &Path) -> bool {
        self.encountered_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Forget every encountered header; returns how many were known
    pub fn clear_encountered_headers(&self) -> usize {
        let mut headers = self
            .encountered_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = headers.len();
        headers.clear();
        count
    }
}
