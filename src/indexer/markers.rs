//! Problem markers
//!
//! Problems found while indexing are buffered per target file and applied in
//! one batch per file once the document is done, so a file sees a single
//! update instead of one per problem.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::trace;

use crate::parser::Problem;

/// A problem shown on a file, remembered with the document whose indexing
/// produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub originator: PathBuf,
    pub problem: Problem,
}

/// One buffered marker change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOp {
    /// Remove markers from `originator`, or every marker when `None`
    RemoveAll { originator: Option<PathBuf> },
    Add { originator: PathBuf, problem: Problem },
}

/// Receiver of marker updates
#[cfg_attr(test, mockall::automock)]
pub trait MarkerSink: Send + Sync {
    /// Apply a batch of operations to one file, in order
    fn apply(&self, file: &Path, operations: &[MarkerOp]);

    fn has_markers(&self, file: &Path) -> bool;
}

/// Marker store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryMarkers {
    markers: Mutex<HashMap<PathBuf, Vec<Marker>>>,
}

impl InMemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers(&self, file: &Path) -> Vec<Marker> {
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl MarkerSink for InMemoryMarkers {
    fn apply(&self, file: &Path, operations: &[MarkerOp]) {
        let mut markers = self.markers.lock().unwrap_or_else(PoisonError::into_inner);
        let current = markers.entry(file.to_path_buf()).or_default();
        for operation in operations {
            match operation {
                MarkerOp::RemoveAll { originator: None } => current.clear(),
                MarkerOp::RemoveAll {
                    originator: Some(originator),
                } => current.retain(|marker| &marker.originator != originator),
                MarkerOp::Add {
                    originator,
                    problem,
                } => current.push(Marker {
                    originator: originator.clone(),
                    problem: problem.clone(),
                }),
            }
        }
        if current.is_empty() {
            markers.remove(file);
        }
    }

    fn has_markers(&self, file: &Path) -> bool {
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
            .is_some_and(|markers| !markers.is_empty())
    }
}

/// Marker operations buffered per file while one document is indexed
#[derive(Debug, Default)]
pub struct ProblemBuffer {
    operations: BTreeMap<PathBuf, Vec<MarkerOp>>,
}

impl ProblemBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue removal of the file's markers, discarding anything buffered for it
    pub fn request_remove_markers(&mut self, file: &Path, originator: Option<&Path>) {
        self.operations.insert(
            file.to_path_buf(),
            vec![MarkerOp::RemoveAll {
                originator: originator.map(Path::to_path_buf),
            }],
        );
    }

    /// Queue a marker on `file`; the first one for a file first clears the
    /// markers `originator` left there previously
    pub fn generate_marker_problem(&mut self, file: &Path, originator: &Path, problem: &Problem) {
        let operations = self.operations.entry(file.to_path_buf()).or_default();
        if operations.is_empty() {
            operations.push(MarkerOp::RemoveAll {
                originator: Some(originator.to_path_buf()),
            });
        }
        operations.push(MarkerOp::Add {
            originator: originator.to_path_buf(),
            problem: problem.clone(),
        });
    }

    /// Clear what `originator` left on a traversed `file` that reported
    /// nothing this time; a file with buffered operations is left alone
    pub fn request_remove_stale_markers(&mut self, file: &Path, originator: &Path) {
        self.operations
            .entry(file.to_path_buf())
            .or_insert_with(|| {
                vec![MarkerOp::RemoveAll {
                    originator: Some(originator.to_path_buf()),
                }]
            });
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Buffered operations for a file
    pub fn operations(&self, file: &Path) -> &[MarkerOp] {
        self.operations.get(file).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of markers that would be added
    pub fn problem_count(&self) -> usize {
        self.operations
            .values()
            .flatten()
            .filter(|operation| matches!(operation, MarkerOp::Add { .. }))
            .count()
    }

    /// Apply everything buffered, one batch per file
    ///
    /// A lone removal for a file without markers is dropped.
    pub fn report(&mut self, sink: &dyn MarkerSink) {
        for (file, operations) in std::mem::take(&mut self.operations) {
            let only_removal =
                operations.len() == 1 && matches!(operations[0], MarkerOp::RemoveAll { .. });
            if only_removal && !sink.has_markers(&file) {
                continue;
            }
            trace!(
                "Applying {} marker operations to {}",
                operations.len(),
                file.display()
            );
            sink.apply(&file, &operations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ProblemCategory, Severity};

    fn problem(message: &str) -> Problem {
        Problem::new(ProblemCategory::Syntax, Severity::Error, message, 1)
    }

    #[test]
    fn test_clean_header_loses_old_markers() {
        let markers = InMemoryMarkers::new();
        let header = Path::new("/p/a.h");
        let main = Path::new("/p/a.cpp");
        let other = Path::new("/p/b.cpp");

        let mut first = ProblemBuffer::new();
        first.generate_marker_problem(header, main, &problem("old"));
        first.generate_marker_problem(header, other, &problem("kept"));
        first.report(&markers);
        assert_eq!(markers.markers(header).len(), 2);

        let mut second = ProblemBuffer::new();
        second.request_remove_stale_markers(header, main);
        second.report(&markers);
        let left = markers.markers(header);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].originator, other.to_path_buf());
    }

    #[test]
    fn test_stale_removal_keeps_buffered_problems() {
        let mut buffer = ProblemBuffer::new();
        let header = Path::new("/p/a.h");
        let main = Path::new("/p/a.cpp");
        buffer.generate_marker_problem(header, main, &problem("new"));
        buffer.request_remove_stale_markers(header, main);
        assert_eq!(buffer.operations(header).len(), 2);
        assert_eq!(buffer.problem_count(), 1);
    }

    #[test]
    fn test_first_problem_preceded_by_removal() {
        let mut buffer = ProblemBuffer::new();
        let header = Path::new("/p/a.h");
        let main = Path::new("/p/a.cpp");
        buffer.generate_marker_problem(header, main, &problem("one"));
        buffer.generate_marker_problem(header, main, &problem("two"));

        let operations = buffer.operations(header);
        assert_eq!(operations.len(), 3);
        assert_eq!(
            operations[0],
            MarkerOp::RemoveAll {
                originator: Some(main.to_path_buf())
            }
        );
        assert!(matches!(operations[2], MarkerOp::Add { .. }));
        assert_eq!(buffer.problem_count(), 2);
    }

    #[test]
    fn test_remove_request_discards_buffered_operations() {
        let mut buffer = ProblemBuffer::new();
        let file = Path::new("/p/a.cpp");
        buffer.generate_marker_problem(file, file, &problem("stale"));
        buffer.request_remove_markers(file, None);

        assert_eq!(
            buffer.operations(file),
            &[MarkerOp::RemoveAll { originator: None }]
        );
    }

    #[test]
    fn test_report_skips_lone_removal_without_markers() {
        let mut sink = MockMarkerSink::new();
        sink.expect_has_markers()
            .withf(|file| file == Path::new("/p/clean.cpp"))
            .times(1)
            .return_const(false);
        sink.expect_apply().times(0);

        let mut buffer = ProblemBuffer::new();
        buffer.request_remove_markers(Path::new("/p/clean.cpp"), None);
        buffer.report(&sink);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_report_batches_per_file() {
        let mut sink = MockMarkerSink::new();
        sink.expect_has_markers().return_const(true);
        sink.expect_apply()
            .withf(|file, operations| file == Path::new("/p/a.h") && operations.len() == 3)
            .times(1)
            .return_const(());
        sink.expect_apply()
            .withf(|file, operations| file == Path::new("/p/a.cpp") && operations.len() == 1)
            .times(1)
            .return_const(());

        let mut buffer = ProblemBuffer::new();
        let main = Path::new("/p/a.cpp");
        buffer.request_remove_markers(main, None);
        buffer.generate_marker_problem(Path::new("/p/a.h"), main, &problem("x"));
        buffer.generate_marker_problem(Path::new("/p/a.h"), main, &problem("y"));
        buffer.report(&sink);
    }

    #[test]
    fn test_in_memory_markers_scoped_by_originator() {
        let markers = InMemoryMarkers::new();
        let header = Path::new("/p/a.h");
        let first = PathBuf::from("/p/a.cpp");
        let second = PathBuf::from("/p/b.cpp");

        markers.apply(
            header,
            &[
                MarkerOp::Add {
                    originator: first.clone(),
                    problem: problem("from a"),
                },
                MarkerOp::Add {
                    originator: second.clone(),
                    problem: problem("from b"),
                },
            ],
        );
        assert_eq!(markers.markers(header).len(), 2);

        markers.apply(
            header,
            &[MarkerOp::RemoveAll {
                originator: Some(first),
            }],
        );
        let remaining = markers.markers(header);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].originator, second);

        markers.apply(header, &[MarkerOp::RemoveAll { originator: None }]);
        assert!(!markers.has_markers(header));
        assert_eq!(markers.total(), 0);
    }
}
