//! Full rebuild of a project's index

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    AddFolderToIndex, CleanEncounteredHeaders, IndexContext, IndexRequest, RemoveFromIndex,
    RequestIdentity, RequestKind, SaveIndex, project_ready,
};
use crate::events::IndexEvent;
use crate::index::IndexState;
use crate::project::{Project, document_name};

/// Reindex every source root of a project
///
/// Walks each root inline under the read lock, queueing one file request per
/// eligible file. Documents stored before the rebuild that no walk reached are
/// queued for removal, followed by a save and a reset of the encountered
/// headers. A failed walk discards the whole index.
#[derive(Debug)]
pub struct IndexAllProject {
    context: Arc<IndexContext>,
    project: Project,
}

impl IndexAllProject {
    pub fn new(context: Arc<IndexContext>, project: Project) -> Self {
        Self { context, project }
    }

    fn fail(&self, reason: String) -> bool {
        error!("Rebuild of {} failed: {}", self.project.name(), reason);
        self.context.discard_index(self.project.name());
        self.context.events().publish(IndexEvent::RebuildFailed {
            project: self.project.name().to_string(),
            reason,
        });
        false
    }
}

impl fmt::Display for IndexAllProject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", RequestKind::IndexAll, self.project)
    }
}

impl IndexRequest for IndexAllProject {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::IndexAll,
            self.context.index_path(self.project.name()),
            None,
        )
    }

    fn execute(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        let context = &self.context;
        let (handle, _) = context.open_index(self.project.name());
        // A pass starts with no headers seen, even after a cancelled one
        context.clear_encountered_headers();

        let reader = handle.read();
        let stale: Vec<String> = reader.query_document_names("");
        let mut seen = HashSet::new();
        for root in self.project.source_roots() {
            if cancel.is_cancelled() {
                break;
            }
            let folder = AddFolderToIndex::new(context.clone(), self.project.clone(), &root.path);
            match folder.walk(cancel) {
                Ok(files) => {
                    debug!("Queued {} files from {}", files.len(), root.path.display());
                    seen.extend(files.iter().map(|file| document_name(file)));
                }
                Err(err) => {
                    drop(reader);
                    return self.fail(format!("cannot walk {}: {}", root.path.display(), err));
                }
            }
        }
        drop(reader);

        if cancel.is_cancelled() {
            debug!("Rebuild of {} cancelled", self.project.name());
            return true;
        }

        let mut removed = 0;
        for document in stale.into_iter().filter(|name| !seen.contains(name)) {
            removed += 1;
            context.submit(Arc::new(RemoveFromIndex::new(
                context.clone(),
                self.project.clone(),
                document,
            )));
        }
        info!(
            "Rebuilding {}: {} files queued, {} stale documents",
            self.project.name(),
            seen.len(),
            removed
        );
        context.submit(Arc::new(SaveIndex::new(context.clone(), self.project.clone())));
        context.submit(Arc::new(CleanEncounteredHeaders::new(
            context.clone(),
            self.project.clone(),
        )));
        true
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        if !project_ready(&self.context, &self.project) {
            return false;
        }
        let (handle, _) = self.context.open_index(self.project.name());
        handle.set_state(IndexState::Rebuilding);
        true
    }
}
