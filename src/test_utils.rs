//! Test utilities and global setup
//!
//! Provides test logging configuration, an in-memory resource tree and a
//! parser that replays scripted callback sequences.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`; defaults to debug for this crate. Run with
    /// `cargo test --features test-logging` to see the output.
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Another test may have initialized it already
        });
    }
}

/// Global test logging setup
///
/// Add this to a test module to initialize logging before its tests run.
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

// ============================================================================
// In-memory Resource Tree
// ============================================================================

#[cfg(test)]
mod test_resources {
    use std::collections::{BTreeMap, BTreeSet};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use crate::project::{ResourceTree, WalkControl, WalkEntry};

    #[derive(Debug, Default)]
    struct TestTree {
        files: BTreeMap<PathBuf, String>,
        failing_walks: BTreeSet<PathBuf>,
        unreadable: BTreeSet<PathBuf>,
    }

    /// Resource tree held in memory; clones share the same files
    #[derive(Debug, Clone, Default)]
    pub struct TestResources {
        state: Arc<Mutex<TestTree>>,
    }

    impl TestResources {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file<P: Into<PathBuf>>(self, path: P, content: &str) -> Self {
            self.set_file_content(path, content);
            self
        }

        pub fn set_file_content<P: Into<PathBuf>>(&self, path: P, content: &str) {
            let mut state = self.state.lock().unwrap();
            state.files.insert(path.into(), content.to_string());
        }

        pub fn remove_file<P: AsRef<Path>>(&self, path: P) {
            let mut state = self.state.lock().unwrap();
            state.files.remove(path.as_ref());
        }

        /// Make walks fail once they reach `path`
        pub fn fail_walk_at<P: Into<PathBuf>>(&self, path: P) {
            let mut state = self.state.lock().unwrap();
            state.failing_walks.insert(path.into());
        }

        /// Make reads of `path` fail while it still shows up in walks
        pub fn fail_read_of<P: Into<PathBuf>>(&self, path: P) {
            let mut state = self.state.lock().unwrap();
            state.unreadable.insert(path.into());
        }

        fn directories(files: &BTreeMap<PathBuf, String>, root: &Path) -> BTreeSet<PathBuf> {
            let mut directories = BTreeSet::new();
            for file in files.keys().filter(|file| file.starts_with(root)) {
                let mut parent = file.parent();
                while let Some(dir) = parent {
                    if dir == root || !dir.starts_with(root) {
                        break;
                    }
                    directories.insert(dir.to_path_buf());
                    parent = dir.parent();
                }
            }
            directories
        }
    }

    impl ResourceTree for TestResources {
        fn exists(&self, path: &Path) -> bool {
            let state = self.state.lock().unwrap();
            state.files.contains_key(path) || state.files.keys().any(|file| file.starts_with(path))
        }

        fn read(&self, path: &Path) -> io::Result<String> {
            let state = self.state.lock().unwrap();
            if state.unreadable.contains(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "File not readable"));
            }
            state
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "File not found"))
        }

        fn walk(
            &self,
            root: &Path,
            visitor: &mut dyn FnMut(WalkEntry<'_>) -> WalkControl,
        ) -> io::Result<()> {
            // Snapshot so visitors may touch the tree
            let (files, failing) = {
                let state = self.state.lock().unwrap();
                (state.files.clone(), state.failing_walks.clone())
            };
            if !files.keys().any(|file| file.starts_with(root)) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "Folder not found"));
            }

            let directories = Self::directories(&files, root);
            let mut entries: Vec<(PathBuf, bool)> = directories
                .into_iter()
                .map(|dir| (dir, true))
                .chain(
                    files
                        .keys()
                        .filter(|file| file.starts_with(root))
                        .map(|file| (file.clone(), false)),
                )
                .collect();
            entries.sort();

            let mut skipped: Vec<PathBuf> = Vec::new();
            for (path, is_dir) in entries {
                if skipped.iter().any(|dir| path.starts_with(dir)) {
                    continue;
                }
                if failing.contains(&path) {
                    return Err(io::Error::other(format!(
                        "Walk failed at {}",
                        path.display()
                    )));
                }
                let control = visitor(WalkEntry {
                    path: &path,
                    is_dir,
                });
                if is_dir && control == WalkControl::SkipSubtree {
                    skipped.push(path);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
pub use test_resources::TestResources;

// ============================================================================
// Scripted Parser
// ============================================================================

#[cfg(test)]
mod scripted_parser {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::parser::{
        ParseError, ParserCallback, Problem, Scope, SourceElement, SourceParser,
    };
    use crate::project::{Document, ResourceTree};

    /// One replayed parser event
    #[derive(Debug, Clone)]
    pub enum ScriptStep {
        Enter(Scope),
        Exit(Scope),
        Accept(SourceElement),
        Problem(Problem),
        /// Poll for cancellation until it happens or the duration elapses
        Stall(Duration),
        Fail(String),
        Panic,
    }

    /// Parser replaying a fixed script per document
    ///
    /// The document is loaded first so unreadable files fail like a real
    /// parse would. Documents without a script produce no events.
    #[derive(Debug, Default)]
    pub struct ScriptedParser {
        scripts: Mutex<HashMap<PathBuf, Vec<ScriptStep>>>,
        parsed: Mutex<Vec<PathBuf>>,
        calls: AtomicUsize,
    }

    impl ScriptedParser {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_script<P: Into<PathBuf>>(self, path: P, steps: Vec<ScriptStep>) -> Self {
            self.scripts.lock().unwrap().insert(path.into(), steps);
            self
        }

        /// Replace a document's script, e.g. after an edit
        pub fn set_script<P: Into<PathBuf>>(&self, path: P, steps: Vec<ScriptStep>) {
            self.scripts.lock().unwrap().insert(path.into(), steps);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Documents parsed so far, in order
        pub fn parsed(&self) -> Vec<PathBuf> {
            self.parsed.lock().unwrap().clone()
        }

        fn stall(callback: &dyn ParserCallback, duration: Duration) -> Result<(), ParseError> {
            let start = Instant::now();
            while start.elapsed() < duration {
                if callback.is_cancelled() {
                    return Err(ParseError::Cancelled);
                }
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }
    }

    impl SourceParser for ScriptedParser {
        fn parse(
            &self,
            document: &Document,
            _include_dirs: &[PathBuf],
            resources: &dyn ResourceTree,
            callback: &mut dyn ParserCallback,
        ) -> Result<(), ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.parsed.lock().unwrap().push(document.path().to_path_buf());
            document
                .load(resources)
                .map_err(|err| ParseError::read(document.path(), err))?;

            let steps = self
                .scripts
                .lock()
                .unwrap()
                .get(document.path())
                .cloned()
                .unwrap_or_default();
            for step in steps {
                if callback.is_cancelled() {
                    return Err(ParseError::Cancelled);
                }
                match step {
                    ScriptStep::Enter(scope) => callback.enter_scope(&scope),
                    ScriptStep::Exit(scope) => callback.exit_scope(&scope),
                    ScriptStep::Accept(element) => callback.accept(&element),
                    ScriptStep::Problem(problem) => callback.accept_problem(&problem),
                    ScriptStep::Stall(duration) => Self::stall(callback, duration)?,
                    ScriptStep::Fail(reason) => return Err(ParseError::Internal(reason)),
                    ScriptStep::Panic => panic!("scripted parser panic in {}", document.path().display()),
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
pub use scripted_parser::{ScriptStep, ScriptedParser};

// ============================================================================
// Recording Queue and Contexts
// ============================================================================

#[cfg(test)]
mod recording_queue {
    use std::sync::{Arc, Mutex, Weak};

    use tokio_util::sync::CancellationToken;

    use super::TestResources;
    use crate::config::IndexerConfig;
    use crate::events::IndexEvents;
    use crate::indexer::InMemoryMarkers;
    use crate::parser::SourceParser;
    use crate::requests::{IndexContext, IndexRequest, RequestIdentity, RequestQueue};

    /// Queue that records requests until a test runs them
    #[derive(Debug, Default)]
    pub struct RecordingQueue {
        requests: Mutex<Vec<Arc<dyn IndexRequest>>>,
    }

    impl RecordingQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<Arc<dyn IndexRequest>> {
            self.requests.lock().unwrap().clone()
        }

        pub fn identities(&self) -> Vec<RequestIdentity> {
            self.requests().iter().map(|request| request.identity()).collect()
        }

        /// Run queued requests in order, including ones they submit, and
        /// return how many ran
        pub fn run_all(&self, cancel: &CancellationToken) -> usize {
            let mut ran = 0;
            loop {
                let next = {
                    let mut requests = self.requests.lock().unwrap();
                    if requests.is_empty() {
                        break;
                    }
                    requests.remove(0)
                };
                if next.is_ready_to_run() {
                    next.execute(cancel);
                    ran += 1;
                }
            }
            ran
        }
    }

    impl RequestQueue for RecordingQueue {
        fn request(&self, request: Arc<dyn IndexRequest>) -> bool {
            self.requests.lock().unwrap().push(request);
            true
        }
    }

    pub fn test_context<P: SourceParser + 'static>(
        resources: &TestResources,
        parser: P,
    ) -> (Arc<IndexContext>, Arc<RecordingQueue>) {
        test_context_with(resources, Arc::new(parser), IndexerConfig::default())
    }

    pub fn test_context_with(
        resources: &TestResources,
        parser: Arc<dyn SourceParser>,
        config: IndexerConfig,
    ) -> (Arc<IndexContext>, Arc<RecordingQueue>) {
        let queue = Arc::new(RecordingQueue::new());
        let weak: Weak<dyn RequestQueue> = Arc::downgrade(&queue) as Weak<dyn RequestQueue>;
        let context = IndexContext::new(
            config,
            Arc::new(resources.clone()),
            parser,
            Arc::new(InMemoryMarkers::new()),
            Arc::new(IndexEvents::new(64)),
            weak,
        );
        (Arc::new(context), queue)
    }
}

#[cfg(test)]
pub use recording_queue::{RecordingQueue, test_context, test_context_with};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ResourceTree, WalkControl};
    use std::path::{Path, PathBuf};

    #[test]
    fn test_walk_reports_directories_and_files() {
        let resources = TestResources::new()
            .with_file("/p/a.cpp", "")
            .with_file("/p/sub/b.cpp", "")
            .with_file("/p/sub/deep/c.h", "");

        let mut seen = Vec::new();
        resources
            .walk(Path::new("/p"), &mut |entry| {
                seen.push((entry.path.to_path_buf(), entry.is_dir));
                WalkControl::Continue
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (PathBuf::from("/p/a.cpp"), false),
                (PathBuf::from("/p/sub"), true),
                (PathBuf::from("/p/sub/b.cpp"), false),
                (PathBuf::from("/p/sub/deep"), true),
                (PathBuf::from("/p/sub/deep/c.h"), false),
            ]
        );
    }

    #[test]
    fn test_walk_skip_and_failure() {
        let resources = TestResources::new()
            .with_file("/p/a.cpp", "")
            .with_file("/p/gen/x.cpp", "")
            .with_file("/p/z.cpp", "");

        let mut files = Vec::new();
        resources
            .walk(Path::new("/p"), &mut |entry| {
                if entry.is_dir {
                    return WalkControl::SkipSubtree;
                }
                files.push(entry.path.to_path_buf());
                WalkControl::Continue
            })
            .unwrap();
        assert_eq!(files, vec![PathBuf::from("/p/a.cpp"), PathBuf::from("/p/z.cpp")]);

        resources.fail_walk_at("/p/z.cpp");
        let mut visited = 0;
        let result = resources.walk(Path::new("/p"), &mut |_| {
            visited += 1;
            WalkControl::Continue
        });
        assert!(result.is_err());
        assert_eq!(visited, 3);
    }
}
