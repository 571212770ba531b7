//! Ordered in-memory index persisted as JSON
//!
//! Keys live in a `BTreeMap` so prefix queries are range scans. The file
//! format stores one record per document; the key map is rebuilt on load.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    DocumentIndexer, IncludeEdge, IndexEntry, IndexError, IndexStorage, IndexerOutput,
};
use crate::codec::IndexKey;
use crate::project::Document;

/// Version written into every saved index file
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Clone)]
struct DocumentRecord {
    keys: BTreeSet<String>,
    includes: Vec<IncludeEdge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDocument {
    name: String,
    keys: Vec<String>,
    includes: Vec<IncludeEdge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    documents: Vec<PersistedDocument>,
}

/// Entries produced for one document before they are committed
#[derive(Debug, Default)]
struct StagedDocument {
    record: DocumentRecord,
}

impl IndexerOutput for StagedDocument {
    fn add_ref(&mut self, key: IndexKey) {
        self.record.keys.insert(key.into_string());
    }

    fn add_relatives(&mut self, included: &Path, parent: Option<&Path>) {
        let edge = IncludeEdge {
            included: included.to_string_lossy().into_owned(),
            parent: parent.map(|parent| parent.to_string_lossy().into_owned()),
        };
        if !self.record.includes.contains(&edge) {
            self.record.includes.push(edge);
        }
    }
}

/// Index storage backed by ordered maps and an optional JSON file
#[derive(Debug, Default)]
pub struct FileIndex {
    path: Option<PathBuf>,
    documents: BTreeMap<String, DocumentRecord>,
    entries: BTreeMap<String, BTreeSet<String>>,
    changed: bool,
}

impl FileIndex {
    /// An index that is never written to disk
    pub fn transient() -> Self {
        Self::default()
    }

    /// An empty index that will be saved to `path`
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Open the index stored at `path`, starting empty when the file is absent
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let mut index = Self::empty_at(&path);
        if !path.exists() {
            debug!("No index file at {}, starting empty", path.display());
            return Ok(index);
        }

        let bytes = fs::read(&path)?;
        let persisted: PersistedIndex = serde_json::from_slice(&bytes)
            .map_err(|err| IndexError::corrupted(&path, err.to_string()))?;
        if persisted.version != FORMAT_VERSION {
            return Err(IndexError::incompatible_version(
                persisted.version,
                FORMAT_VERSION,
            ));
        }

        for document in persisted.documents {
            let record = DocumentRecord {
                keys: document.keys.into_iter().collect(),
                includes: document.includes,
            };
            index.insert(document.name, record);
        }
        debug!(
            "Loaded index {} with {} documents",
            path.display(),
            index.documents.len()
        );
        Ok(index)
    }

    fn insert(&mut self, name: String, record: DocumentRecord) {
        for key in &record.keys {
            self.entries
                .entry(key.clone())
                .or_default()
                .insert(name.clone());
        }
        self.documents.insert(name, record);
    }

    fn unlink(&mut self, name: &str) -> Option<DocumentRecord> {
        let record = self.documents.remove(name)?;
        for key in &record.keys {
            if let Some(documents) = self.entries.get_mut(key) {
                documents.remove(name);
                if documents.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
        Some(record)
    }

    /// Documents storing exactly `key`
    pub fn documents_for_key(&self, key: &str) -> Vec<String> {
        self.entries
            .get(key)
            .map(|documents| documents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl IndexStorage for FileIndex {
    fn add(
        &mut self,
        document: &Document,
        indexer: &mut dyn DocumentIndexer,
    ) -> Result<usize, IndexError> {
        let mut staged = StagedDocument::default();
        indexer.index(document, &mut staged)?;

        let name = document.name();
        self.unlink(&name);
        let count = staged.record.keys.len();
        self.insert(name, staged.record);
        self.changed = true;
        trace!("Committed {} keys for {}", count, document.path().display());
        Ok(count)
    }

    fn remove(&mut self, document: &str) -> bool {
        let removed = self.unlink(document).is_some();
        if removed {
            self.changed = true;
        }
        removed
    }

    fn query_document_names(&self, prefix: &str) -> Vec<String> {
        self.documents
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn query_entries(&self, prefix: &str) -> Vec<IndexEntry> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, documents)| IndexEntry {
                key: key.clone(),
                documents: documents.iter().cloned().collect(),
            })
            .collect()
    }

    fn has_changed(&self) -> bool {
        self.changed
    }

    fn save(&mut self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            self.changed = false;
            return Ok(());
        };

        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            documents: self
                .documents
                .iter()
                .map(|(name, record)| PersistedDocument {
                    name: name.clone(),
                    keys: record.keys.iter().cloned().collect(),
                    includes: record.includes.clone(),
                })
                .collect(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a truncated index
        let temp_path = path.with_extension("index.tmp");
        fs::write(&temp_path, serde_json::to_vec(&persisted)?)?;
        fs::rename(&temp_path, path)?;

        self.changed = false;
        debug!(
            "Saved index {} ({} documents)",
            path.display(),
            self.documents.len()
        );
        Ok(())
    }

    fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn dependencies(&self, document: &str) -> Vec<String> {
        self.documents
            .get(document)
            .map(|record| {
                record
                    .includes
                    .iter()
                    .map(|edge| edge.included.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
