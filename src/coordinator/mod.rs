//! Index coordinator
//!
//! [`IndexCoordinator`] is the public entry point. It owns the job manager and
//! the shared [`IndexContext`], turns API calls into queued requests and gates
//! them on project registration. Index handles are created on first use and
//! loaded from the index location when a file exists there.
//!
//! Dirty indexes are saved when the queue has been idle for
//! `idle_save_delay`, on [`IndexCoordinator::save_all`] and at shutdown.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::events::{IndexEvent, IndexEvents};
use crate::index::{IndexError, IndexHandle, SearchMatch, SearchPattern, search};
use crate::indexer::MarkerSink;
use crate::jobs::JobManager;
use crate::log_timing;
use crate::parser::SourceParser;
use crate::project::{ExclusionPatterns, Project, ProjectError, ResourceTree};
use crate::requests::{
    AddFileToIndex, AddFolderToIndex, IndexAllProject, IndexContext, RemoveFolderFromIndex,
    RemoveFromIndex, RequestQueue, SaveIndex,
};


#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Unknown project: {name}")]
    UnknownProject { name: String },

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Coordinator is shut down")]
    ShutDown,
}

impl CoordinatorError {
    pub fn unknown_project(name: impl Into<String>) -> Self {
        Self::UnknownProject { name: name.into() }
    }
}

pub struct IndexCoordinator {
    jobs: Arc<JobManager>,
    context: Arc<IndexContext>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for IndexCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCoordinator")
            .field("jobs", &self.jobs)
            .field("context", &self.context)
            .finish()
    }
}

impl IndexCoordinator {
    pub fn new(
        config: IndexerConfig,
        resources: Arc<dyn ResourceTree>,
        parser: Arc<dyn SourceParser>,
        markers: Arc<dyn MarkerSink>,
        events: Arc<IndexEvents>,
    ) -> Result<Self, CoordinatorError> {
        if let Some(location) = &config.index_location {
            std::fs::create_dir_all(location)?;
        }
        let jobs = Arc::new(JobManager::new(config.idle_save_delay)?);
        let queue: Weak<dyn RequestQueue> = Arc::downgrade(&jobs) as Weak<dyn RequestQueue>;
        let context = Arc::new(IndexContext::new(
            config, resources, parser, markers, events, queue,
        ));

        let idle_context = Arc::downgrade(&context);
        jobs.set_idle_hook(move || {
            if let Some(context) = idle_context.upgrade() {
                let saved = save_dirty_indexes(&context);
                if saved > 0 {
                    debug!("Saved {} indexes while idle", saved);
                }
            }
        });

        info!("Index coordinator started");
        Ok(Self {
            jobs,
            context,
            shut_down: AtomicBool::new(false),
        })
    }

    fn ensure_running(&self) -> Result<(), CoordinatorError> {
        if self.shut_down.load(Ordering::SeqCst) || self.jobs.is_shut_down() {
            return Err(CoordinatorError::ShutDown);
        }
        Ok(())
    }

    fn project(&self, name: &str) -> Result<Project, CoordinatorError> {
        self.ensure_running()?;
        self.context
            .project(name)
            .ok_or_else(|| CoordinatorError::unknown_project(name))
    }

    fn schedule_rebuild(&self, project: Project) -> bool {
        let name = project.name().to_string();
        let queued = self
            .jobs
            .request(Arc::new(IndexAllProject::new(self.context.clone(), project)));
        if queued {
            info!("Scheduled rebuild of {}", name);
            self.context
                .events()
                .publish(IndexEvent::RebuildScheduled { project: name });
        }
        queued
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// Register or update a project
    ///
    /// Opens its index and schedules a rebuild when the index is new or
    /// unreadable. Returns whether a rebuild was scheduled.
    pub fn add_project(&self, project: Project) -> Result<bool, CoordinatorError> {
        self.ensure_running()?;
        if !self.context.resources().exists(project.root()) {
            return Err(ProjectError::path_not_found(project.root()).into());
        }
        let name = project.name().to_string();
        if self.context.register_project(project.clone()).is_some() {
            debug!("Updated project {}", name);
        } else {
            info!("Added project {}", project);
        }
        if !project.indexing_enabled() {
            return Ok(false);
        }
        let (_, needs_rebuild) = self.context.open_index(&name);
        Ok(needs_rebuild && self.schedule_rebuild(project))
    }

    /// Forget a project: its jobs are cancelled and its index deleted
    pub fn remove_project(&self, name: &str) -> Result<(), CoordinatorError> {
        self.ensure_running()?;
        if self.context.unregister_project(name).is_none() {
            return Err(CoordinatorError::unknown_project(name));
        }
        self.jobs.cancel_family(name);
        self.context.discard_index(name);
        info!("Removed project {}", name);
        Ok(())
    }

    pub fn project_names(&self) -> Vec<String> {
        self.context.project_names()
    }

    /// Enabling indexing schedules a rebuild; disabling cancels queued work
    pub fn set_indexing_enabled(&self, name: &str, enabled: bool) -> Result<(), CoordinatorError> {
        self.ensure_running()?;
        if !self.context.set_indexing_enabled(name, enabled) {
            return Err(CoordinatorError::unknown_project(name));
        }
        if enabled {
            self.index_all(name)?;
        } else {
            self.jobs.cancel_family(name);
        }
        Ok(())
    }

    /// Queue a full rebuild; false when an equal rebuild is already waiting
    pub fn index_all(&self, name: &str) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        Ok(self.schedule_rebuild(project))
    }

    /// Throw the index away and rebuild it from scratch
    pub fn reindex_project(&self, name: &str) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        self.jobs.cancel_family(name);
        self.context.discard_index(name);
        Ok(self.schedule_rebuild(project))
    }

    // ========================================================================
    // Documents and Folders
    // ========================================================================

    /// Queue indexing of one file from disk
    ///
    /// Returns false when the file is outside the project's source roots, not
    /// indexable, or already queued.
    pub fn add_source(&self, name: &str, path: &Path) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        if !self.accepts(&project, path) {
            return Ok(false);
        }
        Ok(AddFileToIndex::submit(&self.context, &project, path))
    }

    /// Queue indexing of in-memory contents, e.g. an unsaved editor buffer
    pub fn add_source_with_contents(
        &self,
        name: &str,
        path: &Path,
        contents: impl Into<Arc<str>>,
    ) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        if !self.accepts(&project, path) {
            return Ok(false);
        }
        Ok(self.jobs.request(Arc::new(AddFileToIndex::with_contents(
            self.context.clone(),
            project,
            path,
            contents,
        ))))
    }

    pub fn remove_source(&self, name: &str, path: &Path) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        Ok(self
            .jobs
            .request(Arc::new(RemoveFromIndex::new(self.context.clone(), project, path))))
    }

    pub fn index_folder(&self, name: &str, folder: &Path) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        Ok(self
            .jobs
            .request(Arc::new(AddFolderToIndex::new(self.context.clone(), project, folder))))
    }

    /// Queue removal of every document below `folder` except those matching
    /// `kept`
    pub fn remove_folder(
        &self,
        name: &str,
        folder: &Path,
        kept: Option<ExclusionPatterns>,
    ) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        let mut request = RemoveFolderFromIndex::new(self.context.clone(), project, folder);
        if let Some(kept) = kept {
            request = request.with_exclusions(kept);
        }
        Ok(self.jobs.request(Arc::new(request)))
    }

    fn accepts(&self, project: &Project, path: &Path) -> bool {
        if !self.context.config().should_index(path) {
            debug!("Ignoring {}: not an indexable file", path.display());
            return false;
        }
        if !project.includes_path(path) {
            debug!(
                "Ignoring {}: outside the sources of {}",
                path.display(),
                project.name()
            );
            return false;
        }
        true
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    pub fn save_index(&self, name: &str) -> Result<bool, CoordinatorError> {
        let project = self.project(name)?;
        Ok(self
            .jobs
            .request(Arc::new(SaveIndex::new(self.context.clone(), project))))
    }

    /// Save every dirty index now; returns how many were written
    pub fn save_all(&self) -> usize {
        save_dirty_indexes(&self.context)
    }

    /// The project's index handle, opened when `create` is set
    pub fn get_index(&self, name: &str, create: bool) -> Option<Arc<IndexHandle>> {
        match self.context.index(name) {
            Some(handle) => Some(handle),
            None if create => Some(self.context.open_index(name).0),
            None => None,
        }
    }

    /// Search a project's index under its read lock
    pub fn search(
        &self,
        name: &str,
        pattern: &SearchPattern,
    ) -> Result<Vec<SearchMatch>, CoordinatorError> {
        self.project(name)?;
        let Some(handle) = self.get_index(name, true) else {
            return Ok(Vec::new());
        };
        let start = Instant::now();
        let reader = handle.read();
        let matches = search(&*reader, pattern);
        drop(reader);
        log_timing!(tracing::Level::DEBUG, "search", start.elapsed());
        Ok(matches)
    }

    pub fn index_path(&self, name: &str) -> PathBuf {
        self.context.index_path(name)
    }

    // ========================================================================
    // Queue
    // ========================================================================

    pub fn cancel_family(&self, name: &str) -> usize {
        self.jobs.cancel_family(name)
    }

    pub fn clean_encountered_headers(&self) -> usize {
        self.context.clear_encountered_headers()
    }

    pub fn awaiting_jobs_count(&self) -> usize {
        self.jobs.awaiting_jobs_count()
    }

    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.jobs.wait_until_idle(timeout)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.context.events().subscribe()
    }

    /// Stop the worker, save dirty indexes and close the event channel
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.jobs.shutdown();
        let saved = save_dirty_indexes(&self.context);
        info!("Index coordinator shut down ({} indexes saved)", saved);
        self.context.events().close();
    }
}

impl Drop for IndexCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn save_dirty_indexes(context: &IndexContext) -> usize {
    let mut saved = 0;
    for handle in context.indexes() {
        match handle.save_if_changed() {
            Ok(true) => {
                saved += 1;
                context.events().publish(IndexEvent::IndexSaved {
                    project: handle.project().to_string(),
                    path: handle.path().map(Path::to_path_buf),
                });
            }
            Ok(false) => {}
            Err(err) => warn!("Failed to save index of {}: {}", handle.project(), err),
        }
    }
    saved
}
