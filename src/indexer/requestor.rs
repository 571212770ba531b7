//! Parser event adapter
//!
//! [`IndexingRequestor`] turns the parser's callback stream for one document
//! into encoded index entries. It tracks the include stack so problems raised
//! inside a header land on that header, and collects every traversed file for
//! the change notification sent once the document is committed.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::include_stack::IncludeStack;
use super::markers::ProblemBuffer;
use crate::codec::{self, CodecError, ElementKind, Role};
use crate::index::IndexerOutput;
use crate::parser::{ParserCallback, Problem, ProblemCategories, Scope, SourceElement};

/// What indexing one document produced besides its entries
#[derive(Debug)]
pub struct RequestorOutcome {
    pub traversed: Vec<PathBuf>,
    pub problems: ProblemBuffer,
    pub entries: usize,
    pub scope_mismatches: usize,
}

pub struct IndexingRequestor<'a> {
    document: PathBuf,
    output: &'a mut dyn IndexerOutput,
    problems: ProblemBuffer,
    enabled_problems: ProblemCategories,
    cancel: CancellationToken,
    verbose: bool,
    includes: IncludeStack,
    scopes: Vec<Scope>,
    entries: usize,
    scope_mismatches: usize,
}

impl<'a> IndexingRequestor<'a> {
    pub fn new(
        document: &Path,
        output: &'a mut dyn IndexerOutput,
        enabled_problems: ProblemCategories,
        cancel: CancellationToken,
        verbose: bool,
    ) -> Self {
        Self {
            document: document.to_path_buf(),
            output,
            problems: ProblemBuffer::new(),
            enabled_problems,
            cancel,
            verbose,
            includes: IncludeStack::new(document),
            scopes: Vec::new(),
            entries: 0,
            scope_mismatches: 0,
        }
    }

    /// Use a buffer that already holds operations for this document
    pub fn with_problems(mut self, problems: ProblemBuffer) -> Self {
        self.problems = problems;
        self
    }

    pub fn includes(&self) -> &IncludeStack {
        &self.includes
    }

    /// File problems are currently attributed to
    fn current_file(&self) -> &Path {
        self.includes.peek_include().unwrap_or(&self.document)
    }

    fn add_entry<S: AsRef<str>>(&mut self, name: &[S], kind: ElementKind, role: Role) {
        match codec::encode(name, kind, role) {
            Ok(key) => {
                if self.verbose {
                    debug!("Indexing {} in {}", key, self.current_file().display());
                }
                self.output.add_ref(key);
                self.entries += 1;
            }
            Err(err) => self.log_encode_failure(&err),
        }
    }

    fn log_encode_failure(&self, err: &CodecError) {
        debug!(
            "Skipping entry in {}: {}",
            self.current_file().display(),
            err
        );
    }

    fn add_include(&mut self, path: &Path) {
        if let Err(err) = self.output.add_include_ref(path) {
            self.log_encode_failure(&err);
        } else {
            self.entries += 1;
        }
        self.output.add_relatives(path, self.includes.peek_include());
        self.includes.push_include(path);
    }

    /// Finish the document; unclosed scopes count as mismatches
    pub fn finish(mut self) -> RequestorOutcome {
        if !self.scopes.is_empty() && !self.cancel.is_cancelled() {
            warn!(
                "{} scopes left open after parsing {}",
                self.scopes.len(),
                self.document.display()
            );
            self.scope_mismatches += self.scopes.len();
        }
        RequestorOutcome {
            traversed: self.includes.into_traversed(),
            problems: self.problems,
            entries: self.entries,
            scope_mismatches: self.scope_mismatches,
        }
    }
}

impl ParserCallback for IndexingRequestor<'_> {
    fn enter_scope(&mut self, scope: &Scope) {
        match scope {
            Scope::Namespace(name) => {
                self.add_entry(name.segments(), ElementKind::Namespace, Role::Declaration)
            }
            Scope::Class { name, kind } => {
                self.add_entry(name.segments(), ElementKind::Type(*kind), Role::Declaration)
            }
            Scope::Include { path } => self.add_include(path),
        }
        self.scopes.push(scope.clone());
    }

    fn exit_scope(&mut self, scope: &Scope) {
        let Some(open) = self.scopes.pop() else {
            warn!(
                "Scope mismatch in {}: exiting {:?} with no open scope",
                self.document.display(),
                scope
            );
            self.scope_mismatches += 1;
            return;
        };
        if &open != scope {
            warn!(
                "Scope mismatch in {}: exiting {:?} while {:?} is open",
                self.document.display(),
                scope,
                open
            );
            self.scope_mismatches += 1;
        }
        // The include stack mirrors the open include scopes
        if matches!(open, Scope::Include { .. }) {
            self.includes.pop_include();
        }
    }

    fn accept(&mut self, element: &SourceElement) {
        self.add_entry(element.name.segments(), element.kind, element.role);
    }

    fn accept_problem(&mut self, problem: &Problem) {
        if !self.enabled_problems.contains(problem.category) {
            return;
        }
        let file = self.current_file().to_path_buf();
        self.problems
            .generate_marker_problem(&file, &self.document, problem);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IndexKey, TypeKind};
    use crate::indexer::markers::MarkerOp;
    use crate::parser::{ProblemCategory, QualifiedName, Severity};

    #[derive(Default)]
    struct Recorded {
        keys: Vec<String>,
        relatives: Vec<(PathBuf, Option<PathBuf>)>,
    }

    impl IndexerOutput for Recorded {
        fn add_ref(&mut self, key: IndexKey) {
            self.keys.push(key.into_string());
        }

        fn add_relatives(&mut self, included: &Path, parent: Option<&Path>) {
            self.relatives
                .push((included.to_path_buf(), parent.map(Path::to_path_buf)));
        }
    }

    fn syntax_problem(line: u32) -> Problem {
        Problem::new(ProblemCategory::Syntax, Severity::Error, "unexpected token", line)
    }

    #[test]
    fn test_one_entry_per_accept_and_scope() {
        let mut output = Recorded::default();
        let mut requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            false,
        );

        let ns = Scope::Namespace(QualifiedName::new(["gfx"]));
        let class = Scope::Class {
            name: QualifiedName::new(["gfx", "Widget"]),
            kind: TypeKind::Class,
        };
        requestor.enter_scope(&ns);
        requestor.enter_scope(&class);
        requestor.accept(&SourceElement::new(
            QualifiedName::new(["gfx", "Widget", "draw"]),
            ElementKind::Method,
            Role::Declaration,
        ));
        requestor.exit_scope(&class);
        requestor.exit_scope(&ns);

        let outcome = requestor.finish();
        assert_eq!(outcome.entries, 3);
        assert_eq!(outcome.scope_mismatches, 0);
        assert_eq!(
            output.keys,
            vec![
                "namespaceDecl/gfx",
                "typeDecl/C/Widget/gfx",
                "methodDecl/draw/Widget/gfx",
            ]
        );
    }

    #[test]
    fn test_problem_in_header_attributed_to_header() {
        let mut output = Recorded::default();
        let main = Path::new("/p/a.cpp");
        let header = Path::new("/p/inc/a.h");
        let mut requestor = IndexingRequestor::new(
            main,
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            false,
        );

        let include = Scope::include(header);
        requestor.enter_scope(&include);
        assert_eq!(requestor.includes().depth(), 1);
        requestor.accept_problem(&syntax_problem(3));
        requestor.exit_scope(&include);
        requestor.accept_problem(&syntax_problem(9));

        let outcome = requestor.finish();
        assert_eq!(outcome.traversed, vec![main.to_path_buf(), header.to_path_buf()]);

        let in_header = outcome.problems.operations(header);
        assert_eq!(
            in_header[0],
            MarkerOp::RemoveAll {
                originator: Some(main.to_path_buf())
            }
        );
        match &in_header[1] {
            MarkerOp::Add {
                originator,
                problem,
            } => {
                assert_eq!(originator, main);
                assert_eq!(problem.line, 3);
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(outcome.problems.operations(main).len(), 2);

        assert_eq!(output.keys, vec!["includeRef//p/inc/a.h"]);
        assert_eq!(output.relatives, vec![(header.to_path_buf(), None)]);
    }

    #[test]
    fn test_nested_include_records_parent() {
        let mut output = Recorded::default();
        let mut requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            false,
        );
        let outer = Scope::include("/p/outer.h");
        let inner = Scope::include("/p/inner.h");
        requestor.enter_scope(&outer);
        requestor.enter_scope(&inner);
        requestor.exit_scope(&inner);
        requestor.exit_scope(&outer);
        requestor.finish();

        assert_eq!(
            output.relatives,
            vec![
                (PathBuf::from("/p/outer.h"), None),
                (PathBuf::from("/p/inner.h"), Some(PathBuf::from("/p/outer.h"))),
            ]
        );
    }

    #[test]
    fn test_disabled_category_never_buffered() {
        let mut output = Recorded::default();
        let mut requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::PREPROCESSOR,
            CancellationToken::new(),
            false,
        );
        requestor.accept_problem(&syntax_problem(1));
        let outcome = requestor.finish();
        assert!(outcome.problems.is_empty());
    }

    #[test]
    fn test_scope_mismatch_counted() {
        let mut output = Recorded::default();
        let mut requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            false,
        );
        let ns = Scope::Namespace(QualifiedName::new(["a"]));
        let other = Scope::Namespace(QualifiedName::new(["b"]));
        requestor.enter_scope(&ns);
        requestor.exit_scope(&other);
        requestor.exit_scope(&other);
        requestor.enter_scope(&ns);

        let outcome = requestor.finish();
        assert_eq!(outcome.scope_mismatches, 3);
    }

    #[test]
    fn test_mismatched_exit_keeps_include_stack_in_step() {
        let mut output = Recorded::default();
        let main = Path::new("/p/a.cpp");
        let header = Path::new("/p/a.h");
        let mut requestor = IndexingRequestor::new(
            main,
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            false,
        );
        let ns = Scope::Namespace(QualifiedName::new(["a"]));

        // Closing the namespace while the header is open leaves the header
        requestor.enter_scope(&Scope::include(header));
        requestor.exit_scope(&ns);
        assert_eq!(requestor.includes().depth(), 0);

        // Closing the header while the namespace is open keeps the main file current
        requestor.enter_scope(&ns);
        requestor.exit_scope(&Scope::include(header));
        assert_eq!(requestor.includes().depth(), 0);
        requestor.accept_problem(&syntax_problem(4));

        let outcome = requestor.finish();
        assert_eq!(outcome.scope_mismatches, 2);
        assert_eq!(outcome.problems.operations(main).len(), 2);
        assert!(outcome.problems.operations(header).is_empty());
    }

    #[test]
    fn test_unencodable_element_skipped() {
        let mut output = Recorded::default();
        let mut requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::ALL,
            CancellationToken::new(),
            true,
        );
        requestor.accept(&SourceElement::new(
            QualifiedName::default(),
            ElementKind::Function,
            Role::Declaration,
        ));
        requestor.accept(&SourceElement::new(
            QualifiedName::new(["M"]),
            ElementKind::Macro,
            Role::Reference,
        ));
        assert_eq!(requestor.finish().entries, 0);
        assert!(output.keys.is_empty());
    }

    #[test]
    fn test_cancellation_is_visible_to_parser() {
        let mut output = Recorded::default();
        let token = CancellationToken::new();
        let requestor = IndexingRequestor::new(
            Path::new("/p/a.cpp"),
            &mut output,
            ProblemCategories::ALL,
            token.clone(),
            false,
        );
        assert!(!requestor.is_cancelled());
        token.cancel();
        assert!(requestor.is_cancelled());
    }
}
