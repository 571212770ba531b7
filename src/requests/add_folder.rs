//! Queue every indexable file below a folder

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::{AddFileToIndex, IndexContext, IndexRequest, RequestIdentity, RequestKind, project_ready};
use crate::project::{Project, WalkControl};

#[derive(Debug)]
pub struct AddFolderToIndex {
    context: Arc<IndexContext>,
    project: Project,
    folder: PathBuf,
}

impl AddFolderToIndex {
    pub fn new(context: Arc<IndexContext>, project: Project, folder: impl Into<PathBuf>) -> Self {
        Self {
            context,
            project,
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.project
            .source_root_for(path)
            .is_some_and(|root| root.is_excluded(path))
    }

    /// Walk the folder and queue a file request for each eligible file
    ///
    /// Returns every eligible file seen, queued or not. Stops early without
    /// error when `cancel` fires.
    pub(crate) fn walk(&self, cancel: &CancellationToken) -> io::Result<Vec<PathBuf>> {
        let config = self.context.config();
        let mut seen = Vec::new();
        self.context.resources().walk(&self.folder, &mut |entry| {
            if cancel.is_cancelled() {
                return WalkControl::SkipSubtree;
            }
            if self.is_excluded(entry.path) {
                trace!("Excluded {}", entry.path.display());
                return WalkControl::SkipSubtree;
            }
            if !entry.is_dir && config.should_index(entry.path) {
                AddFileToIndex::submit(&self.context, &self.project, entry.path);
                seen.push(entry.path.to_path_buf());
            }
            WalkControl::Continue
        })?;
        Ok(seen)
    }
}

impl fmt::Display for AddFolderToIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} in {})",
            RequestKind::AddFolder,
            self.folder.display(),
            self.project.name()
        )
    }
}

impl IndexRequest for AddFolderToIndex {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::AddFolder,
            self.context.index_path(self.project.name()),
            Some(self.folder.clone()),
        )
    }

    fn execute(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        let (handle, _) = self.context.open_index(self.project.name());
        let _reader = handle.read();
        match self.walk(cancel) {
            Ok(files) => {
                debug!("Queued {} files from {}", files.len(), self.folder.display());
                true
            }
            Err(err) => {
                error!("Failed to walk {}: {}", self.folder.display(), err);
                false
            }
        }
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        project_ready(&self.context, &self.project)
    }
}
