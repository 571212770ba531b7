//! Remove documents from an index

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{IndexContext, IndexRequest, RequestIdentity, RequestKind, project_ready};
use crate::events::IndexEvent;
use crate::indexer::MarkerOp;
use crate::project::{ExclusionPatterns, Project, document_name};

// ============================================================================
// Single Document
// ============================================================================

/// Drop one document and its entries under the write lock
#[derive(Debug)]
pub struct RemoveFromIndex {
    context: Arc<IndexContext>,
    project: Project,
    document: PathBuf,
}

impl RemoveFromIndex {
    pub fn new(context: Arc<IndexContext>, project: Project, document: impl Into<PathBuf>) -> Self {
        Self {
            context,
            project,
            document: document.into(),
        }
    }
}

impl fmt::Display for RemoveFromIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} in {})",
            RequestKind::RemoveFile,
            self.document.display(),
            self.project.name()
        )
    }
}

impl IndexRequest for RemoveFromIndex {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::RemoveFile,
            self.context.index_path(self.project.name()),
            Some(self.document.clone()),
        )
    }

    fn execute(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        let Some(handle) = self.context.index(self.project.name()) else {
            debug!("No index open for {}", self.project.name());
            return true;
        };
        let name = document_name(&self.document);
        let removed = handle.write().remove(&name);
        if !removed {
            debug!("{} was not indexed", name);
            return true;
        }

        let markers = self.context.markers();
        if markers.has_markers(&self.document) {
            markers.apply(&self.document, &[MarkerOp::RemoveAll { originator: None }]);
        }
        debug!("Removed {} from {}", name, self.project.name());
        self.context.events().publish(IndexEvent::DocumentRemoved {
            project: self.project.name().to_string(),
            document: name,
        });
        true
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        project_ready(&self.context, &self.project)
    }
}

// ============================================================================
// Folder
// ============================================================================

/// Remove every stored document below a folder
///
/// Documents matching `kept` (relative to the folder) stay in the index.
/// Removal is delegated to one [`RemoveFromIndex`] per document.
#[derive(Debug)]
pub struct RemoveFolderFromIndex {
    context: Arc<IndexContext>,
    project: Project,
    folder: PathBuf,
    kept: ExclusionPatterns,
}

impl RemoveFolderFromIndex {
    pub fn new(context: Arc<IndexContext>, project: Project, folder: impl Into<PathBuf>) -> Self {
        Self {
            context,
            project,
            folder: folder.into(),
            kept: ExclusionPatterns::none(),
        }
    }

    /// Keep documents matching these patterns
    pub fn with_exclusions(mut self, kept: ExclusionPatterns) -> Self {
        self.kept = kept;
        self
    }

    /// Stored documents below the folder that should go
    fn matching_documents(&self) -> Vec<String> {
        let Some(handle) = self.context.index(self.project.name()) else {
            return Vec::new();
        };
        let reader = handle.read();
        reader
            .query_document_names(&document_name(&self.folder))
            .into_iter()
            .filter(|name| {
                Path::new(name)
                    .strip_prefix(&self.folder)
                    .is_ok_and(|relative| !self.kept.is_excluded(relative))
            })
            .collect()
    }
}

impl fmt::Display for RemoveFolderFromIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} in {})",
            RequestKind::RemoveFolder,
            self.folder.display(),
            self.project.name()
        )
    }
}

impl IndexRequest for RemoveFolderFromIndex {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::RemoveFolder,
            self.context.index_path(self.project.name()),
            Some(self.folder.clone()),
        )
    }

    fn execute(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        let documents = self.matching_documents();
        info!(
            "Removing {} documents below {} from {}",
            documents.len(),
            self.folder.display(),
            self.project.name()
        );
        for document in documents {
            self.context.submit(Arc::new(RemoveFromIndex::new(
                self.context.clone(),
                self.project.clone(),
                document,
            )));
        }
        true
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        project_ready(&self.context, &self.project)
    }
}
