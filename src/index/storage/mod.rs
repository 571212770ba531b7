//! Index storage abstraction and implementations
//!
//! Storage keeps encoded keys per document and answers exact and prefix
//! lookups over them. Documents are added through a [`DocumentIndexer`] that
//! writes into an [`IndexerOutput`]; the storage stages that output and only
//! replaces the document's previous entries once indexing succeeded.

pub mod file_index;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{self, CodecError, ElementKind, IndexKey, Role};
use crate::project::Document;

pub use file_index::FileIndex;

/// Errors that can occur during index storage operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index file corrupted: {path} - {reason}")]
    CorruptedIndex { path: PathBuf, reason: String },

    #[error("Index format version {found} incompatible with expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Indexing {document} failed: {reason}")]
    Indexing { document: PathBuf, reason: String },
}

impl IndexError {
    /// Create a corrupted index error
    pub fn corrupted<P: AsRef<Path>>(path: P, reason: impl Into<String>) -> Self {
        Self::CorruptedIndex {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an incompatible version error
    pub fn incompatible_version(found: u32, expected: u32) -> Self {
        Self::IncompatibleVersion { found, expected }
    }

    pub fn indexing<P: AsRef<Path>>(document: P, reason: impl Into<String>) -> Self {
        Self::Indexing {
            document: document.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Sink for the entries produced while indexing one document
pub trait IndexerOutput {
    fn add_ref(&mut self, key: IndexKey);

    /// Record an include edge; `parent` is `None` for the indexed document
    fn add_relatives(&mut self, included: &Path, parent: Option<&Path>);

    fn add_include_ref(&mut self, included: &Path) -> Result<(), CodecError> {
        let name = [included.to_string_lossy()];
        self.add_ref(codec::encode(&name, ElementKind::Include, Role::Reference)?);
        Ok(())
    }
}

/// Turns one document into index entries
pub trait DocumentIndexer {
    fn index(&mut self, document: &Document, output: &mut dyn IndexerOutput)
    -> Result<(), IndexError>;
}

/// A stored key with the documents containing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub documents: Vec<String>,
}

/// An include edge recorded while indexing a document
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IncludeEdge {
    pub included: String,
    pub parent: Option<String>,
}

/// Trait for index storage backends
pub trait IndexStorage: Send + Sync {
    /// Index `document`, replacing its previous entries when indexing succeeds
    ///
    /// Returns the number of distinct keys stored for the document.
    fn add(
        &mut self,
        document: &Document,
        indexer: &mut dyn DocumentIndexer,
    ) -> Result<usize, IndexError>;

    /// Drop a document and its entries; false when it was not indexed
    fn remove(&mut self, document: &str) -> bool;

    /// Names of indexed documents starting with `prefix`
    fn query_document_names(&self, prefix: &str) -> Vec<String>;

    /// Stored keys starting with `prefix`, in key order
    fn query_entries(&self, prefix: &str) -> Vec<IndexEntry>;

    /// Whether there are unsaved changes
    fn has_changed(&self) -> bool;

    fn save(&mut self) -> Result<(), IndexError>;

    fn document_count(&self) -> usize;

    /// Files recorded as included while indexing `document`
    fn dependencies(&self, document: &str) -> Vec<String>;

    /// Backing file, `None` for transient storage
    fn path(&self) -> Option<&Path>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collected {
        keys: Vec<IndexKey>,
    }

    impl IndexerOutput for Collected {
        fn add_ref(&mut self, key: IndexKey) {
            self.keys.push(key);
        }

        fn add_relatives(&mut self, _included: &Path, _parent: Option<&Path>) {}
    }

    #[test]
    fn test_index_error_creation() {
        let error = IndexError::corrupted("/path/to/index", "truncated");
        match error {
            IndexError::CorruptedIndex { path, reason } => {
                assert_eq!(path, PathBuf::from("/path/to/index"));
                assert_eq!(reason, "truncated");
            }
            _ => panic!("Expected CorruptedIndex error"),
        }

        let error = IndexError::incompatible_version(2, 1);
        assert_eq!(
            error.to_string(),
            "Index format version 2 incompatible with expected 1"
        );
    }

    #[test]
    fn test_add_include_ref_encodes_path() {
        let mut output = Collected::default();
        output.add_include_ref(Path::new("inc/util.h")).unwrap();
        assert_eq!(output.keys[0].as_str(), "includeRef/inc/util.h");
    }
}
