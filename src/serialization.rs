//! Messages exchanged with worker processes.
//!
//! A worker process receives exactly one [`WorkerSpec`] on its stdin and answers with exactly one
//! [`WorkerResult`] on its stdout. Both are bincode-encoded.

use crate::worker::{TaskOpt, WorkerResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// What a worker process needs to run its share of a data load.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct WorkerSpec {
    /// The `[store]` table, as a TOML document. The store is rebuilt from the registry in the
    /// worker process.
    pub store: String,

    pub task: TaskOpt,
}

pub(crate) fn read_spec(reader: &mut impl Read) -> Result<WorkerSpec, bincode::Error> {
    bincode::deserialize_from::<_, WorkerSpec>(reader)
}

pub(crate) fn write_spec(writer: &mut impl Write, spec: &WorkerSpec) -> Result<(), bincode::Error> {
    bincode::serialize_into(&mut *writer, spec)?;
    writer.flush().map_err(bincode::Error::from)
}

pub(crate) fn read_result(bytes: &[u8]) -> Result<WorkerResult, bincode::Error> {
    bincode::deserialize::<WorkerResult>(bytes)
}

pub(crate) fn write_result(
    writer: &mut impl Write,
    result: &WorkerResult,
) -> Result<(), bincode::Error> {
    bincode::serialize_into(&mut *writer, result)?;
    writer.flush().map_err(bincode::Error::from)
}
