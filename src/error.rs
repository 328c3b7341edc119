//! Error types shared across the crate.
//!
//! Failures of individual rows or batches are not errors here: they are counted by the worker
//! and never leave its batch loop. What remains are configuration problems, collaborator setup
//! failures, and faults of whole execution contexts.

use thiserror::Error;

/// Errors raised by a storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No store is registered under the given name.
    #[error("store {0} not found in registry")]
    Unknown(String),

    /// The options handed to a store's constructor are invalid.
    #[error("invalid store options: {0}")]
    Options(String),

    /// A client for the store could not be created.
    #[error("failed to connect to store: {0}")]
    Connect(String),

    /// A single request to the store failed as a whole.
    #[error("request failed: {0}")]
    Request(String),
}

/// The top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid benchmark parameters. Always surfaced before any worker starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Figment(#[from] figment::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("histogram error: {0}")]
    Histogram(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a worker's execution context ended without handing back a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LostReason {
    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("exited abnormally with code {0:?}")]
    Exited(Option<i32>),

    #[error("terminated without a result")]
    NoResult,

    #[error("returned an unreadable result: {0}")]
    Corrupt(String),
}

/// A worker-context fault. This is never folded into the per-row failure count.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("worker {id} lost: {reason}")]
pub struct WorkerLost {
    pub id: usize,
    pub reason: LostReason,
}

impl WorkerLost {
    pub fn new(id: usize, reason: LostReason) -> Self {
        Self { id, reason }
    }
}
