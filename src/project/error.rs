use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Unknown project: {name}")]
    UnknownProject { name: String },

    #[error("Project already registered: {name}")]
    DuplicateProject { name: String },

    #[error("Invalid project name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Source root {root} is outside project root {project_root}")]
    SourceRootOutsideProject { root: PathBuf, project_root: PathBuf },

    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidExclusion { pattern: String, reason: String },
}

impl ProjectError {
    pub fn path_not_found<P: AsRef<Path>>(path: P) -> Self {
        Self::PathNotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn unknown_project(name: impl Into<String>) -> Self {
        Self::UnknownProject { name: name.into() }
    }

    pub fn invalid_exclusion(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExclusion {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}
