//! Parser collaborator interface
//!
//! A [`SourceParser`] drives a [`ParserCallback`] with a well-nested stream of
//! scope enter/exit events and terminal elements for one document. Each
//! element carries its qualified name outermost-first and its role, which the
//! indexing side consumes unchanged.

pub mod lexical;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{ElementKind, Role, TypeKind};
use crate::project::{Document, ResourceTree};

pub use lexical::LexicalParser;

// ============================================================================
// Names and Elements
// ============================================================================

/// Qualified name in declaration order, outermost scope first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName(Vec<String>);

impl QualifiedName {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Innermost name
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Name of `child` declared inside this scope
    pub fn child(&self, child: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(child.into());
        Self(segments)
    }

    /// Enumerators live in their enumeration's enclosing scope, so the
    /// enumeration's own name is replaced by the enumerator name
    pub fn enumerator(enumeration: &QualifiedName, enumerator: impl Into<String>) -> Self {
        let mut segments = enumeration.0.clone();
        match segments.last_mut() {
            Some(last) => *last = enumerator.into(),
            None => segments.push(enumerator.into()),
        }
        Self(segments)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("::"))
    }
}

/// A terminal declaration or reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceElement {
    pub name: QualifiedName,
    pub kind: ElementKind,
    pub role: Role,
    pub line: u32,
}

impl SourceElement {
    pub fn new(name: QualifiedName, kind: ElementKind, role: Role) -> Self {
        Self {
            name,
            kind,
            role,
            line: 0,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

/// Kinds of nestable scopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Namespace(QualifiedName),
    /// Class, struct, union or enum body
    Class { name: QualifiedName, kind: TypeKind },
    /// An included file being traversed
    Include { path: PathBuf },
}

impl Scope {
    pub fn include(path: impl Into<PathBuf>) -> Self {
        Scope::Include { path: path.into() }
    }

    pub fn include_path(&self) -> Option<&Path> {
        match self {
            Scope::Include { path } => Some(path),
            _ => None,
        }
    }
}

// ============================================================================
// Problems
// ============================================================================

/// Source of a parser-reported problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemCategory {
    Preprocessor,
    Semantic,
    Syntax,
}

impl ProblemCategory {
    const fn bit(self) -> u8 {
        match self {
            ProblemCategory::Preprocessor => 0b001,
            ProblemCategory::Semantic => 0b010,
            ProblemCategory::Syntax => 0b100,
        }
    }
}

/// Set of enabled problem categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProblemCategories(u8);

impl ProblemCategories {
    pub const NONE: Self = Self(0);
    pub const PREPROCESSOR: Self = Self(ProblemCategory::Preprocessor.bit());
    pub const SEMANTIC: Self = Self(ProblemCategory::Semantic.bit());
    pub const SYNTAX: Self = Self(ProblemCategory::Syntax.bit());
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, category: ProblemCategory) -> bool {
        self.0 & category.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ProblemCategories {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProblemCategories {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<ProblemCategory> for ProblemCategories {
    fn from(category: ProblemCategory) -> Self {
        Self(category.bit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic raised by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub category: ProblemCategory,
    pub severity: Severity,
    pub message: String,
    pub line: u32,
}

impl Problem {
    pub fn new(
        category: ProblemCategory,
        severity: Severity,
        message: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            line,
        }
    }
}

// ============================================================================
// Parser Contract
// ============================================================================

/// Receiver of parse events
///
/// Every `enter_scope` is matched by an `exit_scope` with the same scope.
pub trait ParserCallback {
    fn enter_scope(&mut self, scope: &Scope);
    fn exit_scope(&mut self, scope: &Scope);
    fn accept(&mut self, element: &SourceElement);
    fn accept_problem(&mut self, problem: &Problem);

    /// Polled by the parser; parsing stops early once this returns true
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing cancelled")]
    Cancelled,

    #[error("Parser failure: {0}")]
    Internal(String),
}

impl ParseError {
    pub fn read<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Produces parse events for a document
#[cfg_attr(test, mockall::automock)]
pub trait SourceParser: Send + Sync {
    /// Parse `document`, resolving includes against `resources` and the
    /// given include directories
    fn parse(
        &self,
        document: &Document,
        include_dirs: &[PathBuf],
        resources: &dyn ResourceTree,
        callback: &mut dyn ParserCallback,
    ) -> Result<(), ParseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerator_takes_enumeration_scope() {
        let enumeration = QualifiedName::new(["gfx", "Color"]);
        let red = QualifiedName::enumerator(&enumeration, "Red");
        assert_eq!(red.segments(), &["gfx".to_string(), "Red".to_string()]);
        assert_eq!(red.to_string(), "gfx::Red");
    }

    #[test]
    fn test_child_and_leaf() {
        let name = QualifiedName::new(["a"]).child("b");
        assert_eq!(name.leaf(), Some("b"));
        assert_eq!(name.to_string(), "a::b");
        assert!(QualifiedName::default().leaf().is_none());
    }

    #[test]
    fn test_problem_categories_bitmask() {
        let mut enabled = ProblemCategories::PREPROCESSOR;
        assert!(enabled.contains(ProblemCategory::Preprocessor));
        assert!(!enabled.contains(ProblemCategory::Syntax));

        enabled |= ProblemCategory::Syntax.into();
        assert!(enabled.contains(ProblemCategory::Syntax));
        assert!(!enabled.contains(ProblemCategory::Semantic));

        assert!(ProblemCategories::NONE.is_empty());
        assert_eq!(
            ProblemCategories::PREPROCESSOR | ProblemCategories::SEMANTIC | ProblemCategories::SYNTAX,
            ProblemCategories::ALL
        );
    }
}
