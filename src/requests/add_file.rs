//! Add or update one document

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{
    IndexContext, IndexRequest, RemoveFromIndex, RequestIdentity, RequestKind, project_ready,
};
use crate::events::IndexEvent;
use crate::index::IndexState;
use crate::indexer::SourceIndexer;
use crate::project::{Document, Project, document_name};

/// Index one file under the write lock, replacing its previous entries
#[derive(Debug)]
pub struct AddFileToIndex {
    context: Arc<IndexContext>,
    project: Project,
    document: Document,
}

impl AddFileToIndex {
    pub fn new(context: Arc<IndexContext>, project: Project, path: impl Into<PathBuf>) -> Self {
        Self {
            context,
            project,
            document: Document::new(path),
        }
    }

    /// Index in-memory contents instead of the file on disk
    pub fn with_contents(
        context: Arc<IndexContext>,
        project: Project,
        path: impl Into<PathBuf>,
        contents: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            context,
            project,
            document: Document::with_contents(path, contents),
        }
    }

    /// Queue indexing of `path` unless it is a header already indexed
    /// through an include during the current rebuild
    ///
    /// A skipped header's own document is queued for removal instead, since
    /// its declarations now live with the includer.
    pub fn submit(context: &Arc<IndexContext>, project: &Project, path: &Path) -> bool {
        if rebuilding(context, project) && skips_header(context, path) {
            debug!("Not queueing {}: already indexed through an include", path.display());
            context.submit(Arc::new(RemoveFromIndex::new(
                context.clone(),
                project.clone(),
                path,
            )));
            return false;
        }
        context.submit(Arc::new(Self::new(context.clone(), project.clone(), path)))
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    fn kind(&self) -> RequestKind {
        if self.document.contents().is_some() {
            RequestKind::AddFileContents
        } else {
            RequestKind::AddFile
        }
    }
}

fn rebuilding(context: &IndexContext, project: &Project) -> bool {
    context
        .index(project.name())
        .is_some_and(|handle| handle.state() == IndexState::Rebuilding)
}

fn skips_header(context: &IndexContext, path: &Path) -> bool {
    context.config().is_header(path) && context.is_header_encountered(path)
}

impl fmt::Display for AddFileToIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} in {})", self.kind(), self.path().display(), self.project.name())
    }
}

impl IndexRequest for AddFileToIndex {
    fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(
            self.kind(),
            self.context.index_path(self.project.name()),
            Some(self.path().to_path_buf()),
        )
    }

    fn execute(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        let context = &self.context;
        let path = self.path();
        let (handle, _) = context.open_index(self.project.name());
        let rebuilding = handle.state() == IndexState::Rebuilding;
        if rebuilding && self.document.contents().is_none() && skips_header(context, path) {
            if handle.write().remove(&document_name(path)) {
                debug!("Dropped standalone entries of {}", path.display());
            }
            debug!("Skipping {}: already indexed through an include", path.display());
            return true;
        }

        let mut indexer = SourceIndexer::new(
            &self.project,
            context.config(),
            context.parser(),
            context.resources(),
            context.markers(),
            cancel,
        );
        let mut writer = handle.write();
        let result = writer.add(&self.document, &mut indexer);
        drop(writer);

        match result {
            Ok(keys) => {
                let outcome = indexer.take_outcome().unwrap_or_default();
                if rebuilding {
                    for file in &outcome.traversed {
                        if file != path && context.config().is_header(file) {
                            context.mark_header_encountered(file);
                        }
                    }
                }
                if handle.state() == IndexState::Updating {
                    handle.set_state(IndexState::UpToDate);
                }
                debug!(
                    "Indexed {} ({} keys, {} files traversed)",
                    path.display(),
                    keys,
                    outcome.traversed.len()
                );
                context.events().publish(IndexEvent::DocumentIndexed {
                    project: self.project.name().to_string(),
                    document: path.to_path_buf(),
                    dependencies: outcome.traversed,
                    entries: outcome.entries,
                    timed_out: outcome.timed_out,
                });
                true
            }
            Err(_) if cancel.is_cancelled() => {
                debug!("Indexing {} cancelled", path.display());
                true
            }
            Err(err) => {
                if context.config().verbose {
                    error!("Failed to index {}: {:?}", path.display(), err);
                } else {
                    error!("Failed to index {}: {}", path.display(), err);
                }
                false
            }
        }
    }

    fn family(&self) -> &str {
        self.project.name()
    }

    fn is_ready_to_run(&self) -> bool {
        if !project_ready(&self.context, &self.project) {
            return false;
        }
        if let Some(handle) = self.context.index(self.project.name())
            && handle.state() != IndexState::Rebuilding
        {
            handle.set_state(IndexState::Updating);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ElementKind, Role, TypeKind};
    use crate::config::IndexerConfig;
    use crate::parser::{QualifiedName, Scope, SourceElement};
    use crate::test_utils::{ScriptStep, ScriptedParser, TestResources, test_context, test_context_with};
    use std::time::Duration;

    fn class(name: &str) -> ScriptStep {
        ScriptStep::Accept(SourceElement::new(
            QualifiedName::new([name]),
            ElementKind::Type(TypeKind::Class),
            Role::Declaration,
        ))
    }

    fn keys(context: &IndexContext, project: &str) -> Vec<String> {
        let handle = context.index(project).unwrap();
        let reader = handle.read();
        reader
            .query_entries("")
            .into_iter()
            .map(|entry| entry.key)
            .collect()
    }

    #[test]
    fn test_indexes_and_publishes_dependencies() {
        let resources = TestResources::new()
            .with_file("/p/a.cpp", "")
            .with_file("/p/a.h", "");
        let parser = ScriptedParser::new().with_script(
            "/p/a.cpp",
            vec![
                ScriptStep::Enter(Scope::include("/p/a.h")),
                class("Widget"),
                ScriptStep::Exit(Scope::include("/p/a.h")),
            ],
        );
        let (context, _queue) = test_context(&resources, parser);
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());
        let mut events = context.events().subscribe();

        let request = AddFileToIndex::new(context.clone(), project, "/p/a.cpp");
        assert!(request.is_ready_to_run());
        assert!(request.execute(&CancellationToken::new()));

        assert_eq!(keys(&context, "p"), vec!["includeRef//p/a.h", "typeDecl/C/Widget"]);
        // Only a rebuild remembers headers it went through
        assert!(!context.is_header_encountered(Path::new("/p/a.h")));
        match events.try_recv().unwrap() {
            IndexEvent::DocumentIndexed {
                document,
                dependencies,
                entries,
                timed_out,
                ..
            } => {
                assert_eq!(document, PathBuf::from("/p/a.cpp"));
                assert_eq!(dependencies, vec![PathBuf::from("/p/a.cpp"), PathBuf::from("/p/a.h")]);
                assert_eq!(entries, 2);
                assert!(!timed_out);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_request_is_noop() {
        let resources = TestResources::new().with_file("/p/a.cpp", "");
        let (context, _queue) = test_context(&resources, ScriptedParser::new());
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());

        let token = CancellationToken::new();
        token.cancel();
        let request = AddFileToIndex::new(context.clone(), project, "/p/a.cpp");
        assert!(request.execute(&token));
        assert!(context.index("p").is_none());
    }

    #[test]
    fn test_unreadable_file_fails_and_keeps_previous_entries() {
        let resources = TestResources::new().with_file("/p/a.cpp", "");
        let parser = ScriptedParser::new().with_script("/p/a.cpp", vec![class("Kept")]);
        let (context, _queue) = test_context(&resources, parser);
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());

        let request = AddFileToIndex::new(context.clone(), project, "/p/a.cpp");
        assert!(request.execute(&CancellationToken::new()));

        resources.fail_read_of("/p/a.cpp");
        assert!(!request.execute(&CancellationToken::new()));
        assert_eq!(keys(&context, "p"), vec!["typeDecl/C/Kept"]);

        // The write lock was released
        let handle = context.index("p").unwrap();
        assert_eq!(handle.monitor().status(), 0);
    }

    #[test]
    fn test_timed_out_parse_commits_partial_entries() {
        let resources = TestResources::new().with_file("/p/slow.cpp", "");
        let parser = ScriptedParser::new().with_script(
            "/p/slow.cpp",
            vec![
                class("Before"),
                ScriptStep::Stall(Duration::from_secs(10)),
                class("After"),
            ],
        );
        let config = IndexerConfig::builder()
            .parse_timeout(Duration::from_millis(30))
            .build()
            .unwrap();
        let (context, _queue) = test_context_with(&resources, Arc::new(parser), config);
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());
        let mut events = context.events().subscribe();

        let request = AddFileToIndex::new(context.clone(), project, "/p/slow.cpp");
        assert!(request.execute(&CancellationToken::new()));
        assert_eq!(keys(&context, "p"), vec!["typeDecl/C/Before"]);
        assert!(matches!(
            events.try_recv().unwrap(),
            IndexEvent::DocumentIndexed { timed_out: true, .. }
        ));
    }

    #[test]
    fn test_encountered_header_skipped_during_rebuild() {
        let resources = TestResources::new().with_file("/p/a.h", "");
        let parser = Arc::new(ScriptedParser::new().with_script("/p/a.h", vec![class("Old")]));
        let (context, queue) =
            test_context_with(&resources, parser.clone(), IndexerConfig::default());
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());
        assert!(AddFileToIndex::new(context.clone(), project.clone(), "/p/a.h")
            .execute(&CancellationToken::new()));
        assert_eq!(parser.calls(), 1);

        context.index("p").unwrap().set_state(IndexState::Rebuilding);
        context.mark_header_encountered(Path::new("/p/a.h"));

        // The header's own document is queued for removal instead
        assert!(!AddFileToIndex::submit(&context, &project, Path::new("/p/a.h")));
        let kinds: Vec<RequestKind> = queue
            .identities()
            .into_iter()
            .map(|identity| identity.kind)
            .collect();
        assert_eq!(kinds, vec![RequestKind::RemoveFile]);

        let request = AddFileToIndex::new(context.clone(), project.clone(), "/p/a.h");
        assert!(request.execute(&CancellationToken::new()));
        assert_eq!(parser.calls(), 1);
        assert!(keys(&context, "p").is_empty());

        let edited = AddFileToIndex::with_contents(context.clone(), project, "/p/a.h", "");
        assert!(edited.execute(&CancellationToken::new()));
        assert_eq!(parser.calls(), 2);
    }

    #[test]
    fn test_header_edit_after_includer_replaces_entries() {
        let resources = TestResources::new()
            .with_file("/p/a.cpp", "")
            .with_file("/p/a.h", "");
        let parser = Arc::new(
            ScriptedParser::new()
                .with_script(
                    "/p/a.cpp",
                    vec![
                        ScriptStep::Enter(Scope::include("/p/a.h")),
                        class("Old"),
                        ScriptStep::Exit(Scope::include("/p/a.h")),
                    ],
                )
                .with_script("/p/a.h", vec![class("Old")]),
        );
        let (context, queue) =
            test_context_with(&resources, parser.clone(), IndexerConfig::default());
        let project = Project::new("p", "/p").unwrap();
        context.register_project(project.clone());
        assert!(AddFileToIndex::new(context.clone(), project.clone(), "/p/a.cpp")
            .execute(&CancellationToken::new()));

        parser.set_script("/p/a.h", vec![class("New")]);
        assert!(AddFileToIndex::submit(&context, &project, Path::new("/p/a.h")));
        assert_eq!(queue.run_all(&CancellationToken::new()), 1);

        let handle = context.index("p").unwrap();
        let found = handle.read().query_entries("typeDecl/C/New");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].documents, vec!["/p/a.h".to_string()]);
    }
}
