//! Index handles, storage and queries
//!
//! - `monitor`: the reader/writer protocol every index access follows
//! - `storage`: the storage collaborator trait and its JSON-backed implementation
//! - `handle`: per-project handle combining storage, monitor and consistency state
//! - `search`: prefix-bounded queries over encoded keys

pub mod handle;
pub mod monitor;
pub mod search;
pub mod storage;

pub use handle::{IndexHandle, IndexReader, IndexState, IndexWriter, index_file_name};
pub use monitor::{ReadGuard, ReadWriteMonitor, WriteGuard};
pub use search::{SearchMatch, SearchPattern, search};
pub use storage::{
    DocumentIndexer, FileIndex, IndexEntry, IndexError, IndexStorage, IndexerOutput,
};
