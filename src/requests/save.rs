//! Flush an index to disk

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{IndexContext, IndexRequest, RequestIdentity, RequestKind, project_ready};
use crate::events::IndexEvent;
use crate::index::IndexState;
use crate::project::Project;

/// Save the project's index if it has unsaved changes
#[derive(Debug)]
pub struct SaveIndex {
    context: Arc<IndexContext>,
    project: Project,
}

impl SaveIndex {
    pub fn new(context: Arc<IndexContext>, project: Project) -> Self {
        Self { context, project }
    }
}

impl fmt::Display for SaveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", RequestKind::Save, self.project.name())
    }
}

impl IndexRequest for SaveIndex {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            RequestKind::Save,
            self.context.index_path(self.project.name()),
            None,
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
        match handle.save_if_changed() {
            Ok(true) => {
                info!("Saved index of {}", self.project.name());
                self.context.events().publish(IndexEvent::IndexSaved {
                    project: self.project.name().to_string(),
                    path: handle.path().map(|path| path.to_path_buf()),
                });
                true
            }
            Ok(false) => {
                // A rebuild that changed nothing is still finished
                if handle.state() == IndexState::Rebuilding {
                    handle.set_state(IndexState::UpToDate);
                }
                true
            }
            Err(err) => {
                error!("Failed to save index of {}: {}", self.project.name(), err);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use crate::requests::AddFileToIndex;
    use crate::test_utils::{ScriptedParser, TestResources, test_context_with};
    use tempfile::TempDir;

    #[test]
    fn test_save_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let config = IndexerConfig::builder()
            .index_location(dir.path())
            .build()
            .unwrap();
        let resources = TestResources::new().with_file("/p/a.cpp", "");
        let (context, _queue) =
            test_context_with(&resources, Arc::new(ScriptedParser::new()), config);
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());
        let mut events = context.events().subscribe();

        let add = AddFileToIndex::new(context.clone(), project.clone(), "/p/a.cpp");
        assert!(add.execute(&CancellationToken::new()));
        let _ = events.try_recv();

        let save = SaveIndex::new(context.clone(), project);
        assert!(save.execute(&CancellationToken::new()));
        let path = context.index_path("p");
        assert!(path.exists());
        assert_eq!(
            events.try_recv().unwrap(),
            IndexEvent::IndexSaved {
                project: "p".to_string(),
                path: Some(path),
            }
        );
        assert_eq!(context.index("p").unwrap().state(), IndexState::Saved);

        // Nothing changed since
        assert!(save.execute(&CancellationToken::new()));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_unchanged_rebuild_becomes_up_to_date() {
        let resources = TestResources::new().with_file("/p/a.cpp", "");
        let (context, _queue) = test_context_with(
            &resources,
            Arc::new(ScriptedParser::new()),
            IndexerConfig::default(),
        );
        let project = Project::new("p", "/p").unwrap();
        let (handle, _) = context.open_index("p");
        handle.set_state(IndexState::Rebuilding);

        assert!(SaveIndex::new(context.clone(), project).execute(&CancellationToken::new()));
        assert_eq!(handle.state(), IndexState::UpToDate);
    }
}
