//! Per-document indexing
//!
//! [`SourceIndexer`] runs the parser over one document with an
//! [`IndexingRequestor`] collecting entries. It clears the document's previous
//! markers, guards the parse with a [`Watchdog`] and reports buffered problems
//! once the parse is over.
//!
//! - `include_stack`: include traversal context
//! - `markers`: marker sink and per-file problem buffering
//! - `requestor`: parser callback adapter
//! - `watchdog`: per-file parse timeout

pub mod include_stack;
pub mod markers;
pub mod requestor;
pub mod watchdog;

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::IndexerConfig;
use crate::index::{DocumentIndexer, IndexError, IndexerOutput};
use crate::log_timing;
use crate::parser::{ParseError, SourceParser};
use crate::project::{Document, Project, ResourceTree};

pub use include_stack::IncludeStack;
pub use markers::{InMemoryMarkers, Marker, MarkerOp, MarkerSink, ProblemBuffer};
pub use requestor::{IndexingRequestor, RequestorOutcome};
pub use watchdog::Watchdog;

/// What happened while indexing one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    /// Main document followed by every header it pulled in
    pub traversed: Vec<PathBuf>,
    pub entries: usize,
    pub problems: usize,
    pub timed_out: bool,
    /// The parser failed or panicked; entries produced before that are kept
    pub failed: bool,
}

/// Indexes documents of one project
pub struct SourceIndexer<'a> {
    project: &'a Project,
    config: &'a IndexerConfig,
    parser: &'a dyn SourceParser,
    resources: &'a dyn ResourceTree,
    markers: &'a dyn MarkerSink,
    cancel: &'a CancellationToken,
    outcome: Option<IndexOutcome>,
}

impl<'a> SourceIndexer<'a> {
    pub fn new(
        project: &'a Project,
        config: &'a IndexerConfig,
        parser: &'a dyn SourceParser,
        resources: &'a dyn ResourceTree,
        markers: &'a dyn MarkerSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            project,
            config,
            parser,
            resources,
            markers,
            cancel,
            outcome: None,
        }
    }

    pub fn should_index(&self, document: &Document) -> bool {
        self.config.should_index(document.path())
    }

    /// Outcome of the last successful [`DocumentIndexer::index`] call
    pub fn take_outcome(&mut self) -> Option<IndexOutcome> {
        self.outcome.take()
    }
}

impl DocumentIndexer for SourceIndexer<'_> {
    fn index(
        &mut self,
        document: &Document,
        output: &mut dyn IndexerOutput,
    ) -> Result<(), IndexError> {
        let path = document.path();
        if !self.should_index(document) {
            return Err(IndexError::indexing(path, "not an indexable source file"));
        }

        let start = Instant::now();
        let enabled = self
            .project
            .problem_markers()
            .unwrap_or(self.config.problem_markers);

        let mut problems = ProblemBuffer::new();
        problems.request_remove_markers(path, None);

        // Shared by the watchdog and the parser's cancellation polling
        let parse_token = self.cancel.child_token();
        let watchdog = self
            .config
            .parse_timeout
            .map(|timeout| Watchdog::arm(timeout, parse_token.clone(), &document.name()));

        let mut requestor =
            IndexingRequestor::new(path, output, enabled, parse_token, self.config.verbose)
                .with_problems(problems);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.parser.parse(
                document,
                self.project.include_dirs(),
                self.resources,
                &mut requestor,
            )
        }));
        let timed_out = watchdog.is_some_and(Watchdog::disarm);
        let mut finished = requestor.finish();

        let mut failed = false;
        match result {
            Ok(Ok(())) if timed_out => {
                warn!("Parsing {} timed out; index is incomplete", path.display());
            }
            Ok(Ok(())) => {}
            Ok(Err(ParseError::Cancelled)) if timed_out => {
                warn!(
                    "Parsing {} timed out after {:?}; index is incomplete",
                    path.display(),
                    self.config.parse_timeout.unwrap_or_default()
                );
            }
            Ok(Err(ParseError::Cancelled)) => {
                debug!("Indexing {} cancelled", path.display());
                return Err(IndexError::indexing(path, "cancelled"));
            }
            Ok(Err(ParseError::Read { source, .. })) => {
                if self.config.verbose {
                    error!("Cannot read {}: {:?}", path.display(), source);
                } else {
                    error!("Cannot read {}: {}", path.display(), source);
                }
                return Err(IndexError::Io(source));
            }
            Ok(Err(err)) => {
                failed = true;
                if self.config.verbose {
                    error!("Parser failed on {}: {:?}", path.display(), err);
                } else {
                    error!("Parser failed on {}: {}", path.display(), err);
                }
            }
            Err(panic) => {
                failed = true;
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Parser panicked on {}: {}", path.display(), reason);
            }
        }

        for header in finished.traversed.iter().filter(|file| file.as_path() != path) {
            finished.problems.request_remove_stale_markers(header, path);
        }
        let problem_count = finished.problems.problem_count();
        finished.problems.report(self.markers);
        log_timing!(tracing::Level::DEBUG, "index_document", start.elapsed());

        self.outcome = Some(IndexOutcome {
            traversed: finished.traversed,
            entries: finished.entries,
            problems: problem_count,
            timed_out,
            failed,
        });
        Ok(())
    }
}
