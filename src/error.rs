use std::io;

use thiserror::Error;

use crate::common::{PageID, TableID, TransactionID};

#[derive(Error, Debug)]
pub enum Error {
    /// Granting the request would have closed a cycle in the wait-for graph.
    /// The named transaction must be aborted; it may be retried under a new id.
    #[error("deadlock detected: {0} aborted")]
    DeadlockDetected(TransactionID),

    /// Every cached page is dirty, so nothing can be evicted without
    /// writing uncommitted data.
    #[error("buffer pool exhausted: all {capacity} pages are dirty")]
    ResourceExhausted { capacity: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("no such table: {0}")]
    TableNotFound(String),

    #[error("unknown table id: {0}")]
    UnknownTable(TableID),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("page {page_id} out of range: store has {num_pages} pages")]
    PageOutOfRange { page_id: PageID, num_pages: u32 },

    #[error("lock error")]
    LockPoisoned,
}

impl Error {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Only deadlocks are worth retrying: the transaction can succeed under a
    /// fresh id once the others in the cycle make progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeadlockDetected(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
