//! Incremental declaration index for C and C++ sources
//!
//! Declarations and references are encoded as prefix-searchable keys
//! (`codec`) and stored per document in one index per project (`index`).
//! Changes arrive as requests (`requests`) that a single worker runs in order
//! (`jobs`), coordinated by [`coordinator::IndexCoordinator`].

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod index;
pub mod indexer;
pub mod jobs;
pub mod logging;
pub mod parser;
pub mod project;
pub mod requests;

#[cfg(test)]
pub mod test_utils;

pub use config::IndexerConfig;
pub use coordinator::{CoordinatorError, IndexCoordinator};
pub use events::{IndexEvent, IndexEvents};
