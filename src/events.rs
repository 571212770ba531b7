//! Index change notifications
//!
//! [`IndexEvents`] is injected into the coordinator and fans events out over a
//! `tokio::sync::broadcast` channel. Publishing never blocks and succeeds with
//! no subscribers; slow subscribers observe `RecvError::Lagged`.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

/// Something observable happened to an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// A document was (re)indexed; `dependencies` lists every traversed file
    DocumentIndexed {
        project: String,
        document: PathBuf,
        dependencies: Vec<PathBuf>,
        entries: usize,
        timed_out: bool,
    },
    DocumentRemoved {
        project: String,
        document: String,
    },
    IndexSaved {
        project: String,
        path: Option<PathBuf>,
    },
    /// The index was discarded and must be rebuilt before use
    IndexRemoved {
        project: String,
    },
    RebuildScheduled {
        project: String,
    },
    RebuildFailed {
        project: String,
        reason: String,
    },
}

impl IndexEvent {
    pub fn project(&self) -> &str {
        match self {
            IndexEvent::DocumentIndexed { project, .. }
            | IndexEvent::DocumentRemoved { project, .. }
            | IndexEvent::IndexSaved { project, .. }
            | IndexEvent::IndexRemoved { project }
            | IndexEvent::RebuildScheduled { project }
            | IndexEvent::RebuildFailed { project, .. } => project,
        }
    }
}

/// Event source with an explicit open/close lifecycle
#[derive(Debug)]
pub struct IndexEvents {
    sender: RwLock<Option<broadcast::Sender<IndexEvent>>>,
}

impl IndexEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Receive every event published from now on
    ///
    /// After [`IndexEvents::close`] the receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        match &*self.sender.read().unwrap_or_else(PoisonError::into_inner) {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn publish(&self, event: IndexEvent) {
        trace!(?event, "Publishing index event");
        if let Some(sender) = &*self.sender.read().unwrap_or_else(PoisonError::into_inner) {
            // An error only means nobody is listening
            let _ = sender.send(event);
        }
    }

    /// Stop publishing; subscribers drain what is buffered and then see the
    /// channel closed
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for IndexEvents {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
