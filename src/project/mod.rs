//! Projects and source documents
//!
//! A [`Project`] is an immutable snapshot of what should be indexed: its
//! source roots with their exclusion patterns, include directories and the
//! problem categories that turn into markers. Requests capture the snapshot
//! when they are built so configuration is never read mid-execution.

pub mod error;
pub mod exclusion;
pub mod resources;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use error::ProjectError;
pub use exclusion::ExclusionPatterns;
pub use resources::{RealResources, ResourceTree, WalkControl, WalkEntry};

use crate::parser::ProblemCategories;

/// A folder whose sources belong to a project
#[derive(Debug, Clone)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub exclusions: ExclusionPatterns,
}

impl SourceRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exclusions: ExclusionPatterns::none(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionPatterns) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Whether `path` lies in this root and matches one of its exclusions
    pub fn is_excluded(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.path) {
            Ok(relative) => self.exclusions.is_excluded(relative),
            Err(_) => false,
        }
    }
}

/// Indexing settings for one project
#[derive(Debug, Clone)]
pub struct Project {
    name: String,
    root: PathBuf,
    source_roots: Vec<SourceRoot>,
    include_dirs: Vec<PathBuf>,
    problem_markers: Option<ProblemCategories>,
    indexing_enabled: bool,
}

impl Project {
    /// A project whose only source root is its root folder
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProjectError::InvalidName {
                name,
                reason: "name is empty".to_string(),
            });
        }
        let root = root.into();
        Ok(Self {
            name,
            source_roots: vec![SourceRoot::new(root.clone())],
            root,
            include_dirs: Vec::new(),
            problem_markers: None,
            indexing_enabled: true,
        })
    }

    /// Replace the source roots; each must lie inside the project root
    pub fn with_source_roots(
        mut self,
        source_roots: impl IntoIterator<Item = SourceRoot>,
    ) -> Result<Self, ProjectError> {
        let source_roots: Vec<_> = source_roots.into_iter().collect();
        if let Some(outside) = source_roots.iter().find(|root| !root.path.starts_with(&self.root)) {
            return Err(ProjectError::SourceRootOutsideProject {
                root: outside.path.clone(),
                project_root: self.root.clone(),
            });
        }
        self.source_roots = source_roots;
        Ok(self)
    }

    /// Exclusions applied to every source root
    pub fn with_exclusions(mut self, exclusions: ExclusionPatterns) -> Self {
        for root in &mut self.source_roots {
            root.exclusions = exclusions.clone();
        }
        self
    }

    pub fn with_include_dirs(mut self, include_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.include_dirs = include_dirs.into_iter().collect();
        self
    }

    /// Override the configured problem categories for this project
    pub fn with_problem_markers(mut self, categories: ProblemCategories) -> Self {
        self.problem_markers = Some(categories);
        self
    }

    pub(crate) fn with_indexing_enabled(mut self, enabled: bool) -> Self {
        self.indexing_enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_roots(&self) -> &[SourceRoot] {
        &self.source_roots
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn problem_markers(&self) -> Option<ProblemCategories> {
        self.problem_markers
    }

    pub fn indexing_enabled(&self) -> bool {
        self.indexing_enabled
    }

    /// The source root a path belongs to, if any
    pub fn source_root_for(&self, path: &Path) -> Option<&SourceRoot> {
        self.source_roots
            .iter()
            .filter(|root| root.contains(path))
            .max_by_key(|root| root.path.components().count())
    }

    /// Whether a path is inside a source root and not excluded there
    pub fn includes_path(&self, path: &Path) -> bool {
        self.source_root_for(path)
            .is_some_and(|root| !root.is_excluded(path))
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.root.display())
    }
}

/// A source file to index, optionally with in-memory contents that take
/// precedence over the file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    path: PathBuf,
    contents: Option<Arc<str>>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            contents: None,
        }
    }

    pub fn with_contents(path: impl Into<PathBuf>, contents: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            contents: Some(contents.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }

    /// In-memory contents, or the file read through `resources`
    pub fn load(&self, resources: &dyn ResourceTree) -> std::io::Result<String> {
        match &self.contents {
            Some(contents) => Ok(contents.to_string()),
            None => resources.read(&self.path),
        }
    }

    /// Path string used as the document name inside an index
    pub fn name(&self) -> String {
        document_name(&self.path)
    }
}

/// Stable document name for a path
pub fn document_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
