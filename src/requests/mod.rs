//! Index requests
//!
//! Every change to an index is a request queued on the job manager and run
//! once by its worker. A request owns the lock protocol for its effect: file
//! additions and removals take the index's write lock, folder walks and
//! rebuilds only read while they queue per-file work, saves write.
//!
//! Requests capture a [`Project`](crate::project::Project) snapshot when they
//! are built and reach shared state through an [`IndexContext`].

pub mod add_file;
pub mod add_folder;
pub mod clean_headers;
pub mod context;
pub mod index_all;
pub mod remove;
pub mod save;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::project::Project;

pub use add_file::AddFileToIndex;
pub use add_folder::AddFolderToIndex;
pub use clean_headers::CleanEncounteredHeaders;
pub use context::IndexContext;
pub use index_all::IndexAllProject;
pub use remove::{RemoveFolderFromIndex, RemoveFromIndex};
pub use save::SaveIndex;

/// What a request does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    AddFile,
    /// Add a file from in-memory contents
    AddFileContents,
    AddFolder,
    IndexAll,
    RemoveFile,
    RemoveFolder,
    Save,
    CleanHeaders,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::AddFile => "AddFileToIndex",
            RequestKind::AddFileContents => "AddFileContentsToIndex",
            RequestKind::AddFolder => "AddFolderToIndex",
            RequestKind::IndexAll => "IndexAllProject",
            RequestKind::RemoveFile => "RemoveFromIndex",
            RequestKind::RemoveFolder => "RemoveFolderFromIndex",
            RequestKind::Save => "SaveIndex",
            RequestKind::CleanHeaders => "CleanEncounteredHeaders",
        };
        f.write_str(name)
    }
}

/// Equality key used to collapse duplicate waiting requests
///
/// `target` is the file or folder for file- and folder-scoped requests and
/// `None` for requests covering a whole index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    pub kind: RequestKind,
    pub index_path: PathBuf,
    pub target: Option<PathBuf>,
}

impl RequestIdentity {
    pub fn new(kind: RequestKind, index_path: PathBuf, target: Option<PathBuf>) -> Self {
        Self {
            kind,
            index_path,
            target,
        }
    }
}

/// One scheduled operation against one project's index
pub trait IndexRequest: Send + Sync + fmt::Debug + fmt::Display {
    fn identity(&self) -> RequestIdentity;

    /// Run the request; false means it failed
    ///
    /// A token that is already cancelled makes this a successful no-op.
    fn execute(&self, cancel: &CancellationToken) -> bool;

    /// Job family used for bulk cancellation, the project name
    fn family(&self) -> &str;

    fn belongs_to(&self, family: &str) -> bool {
        self.family() == family
    }

    /// Checked by the worker right before [`IndexRequest::execute`]; marks the
    /// index state when the request is going to run
    fn is_ready_to_run(&self) -> bool;
}

/// Accepts requests for later execution
pub trait RequestQueue: Send + Sync {
    /// Queue a request; false when it was rejected or collapsed into an equal
    /// waiting one
    fn request(&self, request: Arc<dyn IndexRequest>) -> bool;
}

/// Whether `project` is still registered, enabled and on disk
pub(crate) fn project_ready(context: &IndexContext, project: &Project) -> bool {
    let Some(current) = context.project(project.name()) else {
        debug!("Project {} is no longer registered", project.name());
        return false;
    };
    if !current.indexing_enabled() {
        debug!("Indexing is disabled for {}", project.name());
        return false;
    }
    if !context.resources().exists(current.root()) {
        warn!(
            "Root of {} is not accessible: {}",
            project.name(),
            current.root().display()
        );
        return false;
    }
    true
}
