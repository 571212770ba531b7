//! Reset the encountered-header set at the end of a pass

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{IndexContext, IndexRequest, RequestIdentity, RequestKind};
use crate::project::Project;

#[derive(Debug)]
pub struct CleanEncounteredHeaders {
    context: Arc<IndexContext>,
    project: Project,
}

impl CleanEncounteredHeaders {
    pub fn new(context: Arc<IndexContext>, project: Project) -> Self {
        Self { context, project }
    }
}

impl fmt::Display for CleanEncounteredHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", RequestKind::CleanHeaders, self.project.name())
    }
}

impl IndexRequest for CleanEncounteredHeaders {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::CleanHeaders,
            self.context.index_path(self.project.name()),
            None,
        )
    }

    fn execute(&self, _cancel: &CancellationToken) -> bool {
        let cleared = self.context.clear_encountered_headers();
        debug!("Forgot {} encountered headers", cleared);
        true
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        true
    }
}
