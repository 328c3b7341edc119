#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A load-generation harness for benchmarking key-value storage services.
//!
//! With `kvload`, you describe a write-heavy data load or a timed mixed read/write workload in
//! TOML, point it at a store, and get back throughput and latency percentiles. Latencies are kept
//! as HdrHistograms rather than averages, so tail latency stays visible after results from many
//! workers are merged.
//!
//! The data load partitions a global row-key range across a fixed number of workers. Each worker
//! runs in its own OS thread or OS process, owns its own histogram and counters, and hands them
//! back exactly once when it is done. A worker that dies without reporting is accounted for
//! separately from rows that the store rejected.
//!
//! You can benchmark your own store by implementing [`Store`] and [`StoreHandle`] and registering
//! a constructor with [`inventory`]. See [`mod@stores`] for details and [`cmdline()`] for the
//! command line interface.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the benchmark config format and the orchestrator.
//! - [`mod@stores`] for the config format of a built-in store.
//! - [`mod@executor`] for how workers are run in parallel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A storage service under test.
///
/// The store itself is only a factory: every execution context creates its own
/// [`StoreHandle`] and never shares it.
pub trait Store: Send + Sync + 'static {
    /// Create a client for the calling thread. Failing here is a setup error for the worker.
    fn handle(&self) -> Result<Box<dyn StoreHandle>, StoreError>;
}

/// A per-context client of a [`Store`].
pub trait StoreHandle {
    /// Write a batch of rows. The returned statuses refer to rows by their position in `rows`.
    /// An `Err` means the whole batch failed.
    fn mutate_batch(&mut self, rows: &[SyntheticRow]) -> Result<Vec<RowStatus>, StoreError>;

    /// Read a row by key, `Ok(None)` if it does not exist.
    fn read_row(&mut self, key: &str) -> Result<Option<SyntheticRow>, StoreError>;
}

/// A generated row: a key and a fixed set of named values in a single column family.
///
/// Field names and values are shared with the generator's pool, so cloning a row is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticRow {
    pub key: String,
    pub family: Arc<str>,
    pub fields: Vec<(Arc<str>, Arc<str>)>,
}

/// The store's verdict on one row of a batch. A `code` of 0 means success.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowStatus {
    pub index: usize,
    pub code: i32,
}

impl RowStatus {
    pub fn ok(index: usize) -> Self {
        Self { index, code: 0 }
    }
}

/// The classification of a single operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Failure,
}

impl From<i32> for OperationOutcome {
    fn from(code: i32) -> Self {
        match code {
            0 => OperationOutcome::Success,
            _ => OperationOutcome::Failure,
        }
    }
}

pub mod bench;
mod cmdline;
pub mod error;
pub mod executor;
pub mod latency;
pub mod report;
mod serialization;
pub mod stores;
pub mod worker;
pub mod workload;

pub use cmdline::cmdline;
pub use error::{Error, LostReason, StoreError, WorkerLost};

pub extern crate inventory;
pub extern crate toml;
