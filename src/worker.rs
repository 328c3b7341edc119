//! A single load-generation unit.
//!
//! A [`WorkerTask`] writes every row of its [`RowKeyRange`] in batches, strictly one batch at a
//! time, and ends with a [`WorkerResult`]. Rejected rows and failed batches are counted, never
//! raised: the only way for a task to fail is not being able to create its store client.

use crate::error::Error;
use crate::latency::LatencyRecorder;
use crate::workload::{RowGenerator, WorkloadOpt};
use crate::{OperationOutcome, Store, StoreHandle, SyntheticRow};
use log::{debug, info, warn};
use quanta::Instant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous range of row indices, `end` exclusive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowKeyRange {
    pub start: u64,
    pub end: u64,
}

impl RowKeyRange {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "range start should not exceed its end");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for RowKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Everything needed to build a [`WorkerTask`], in a form that can be sent to another process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskOpt {
    pub id: usize,
    pub range: RowKeyRange,
    pub batch_size: usize,
    pub workload: WorkloadOpt,
}

impl TaskOpt {
    pub(crate) fn sanity(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size should be positive".into()));
        }
        Ok(())
    }
}

/// The terminal output of a worker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkerResult {
    pub id: usize,
    pub success: u64,
    pub failure: u64,
    /// Batch latencies, serialized with [`LatencyRecorder::to_bytes`].
    pub histogram: Vec<u8>,
}

impl WorkerResult {
    pub fn latency(&self) -> Result<LatencyRecorder, Error> {
        LatencyRecorder::from_bytes(&self.histogram)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Success/failure tally of one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchTally {
    pub success: u64,
    pub failure: u64,
}

/// Classify every row of a batch of `len` rows. Rows without a status are failures; if a row has
/// several statuses, the last one counts.
pub(crate) fn classify(len: usize, statuses: &[crate::RowStatus]) -> BatchTally {
    let mut outcomes = vec![OperationOutcome::Failure; len];
    for s in statuses {
        match outcomes.get_mut(s.index) {
            Some(o) => *o = OperationOutcome::from(s.code),
            None => warn!("Ignoring status for row {} of a {}-row batch", s.index, len),
        }
    }
    let success = outcomes
        .iter()
        .filter(|o| **o == OperationOutcome::Success)
        .count() as u64;
    BatchTally {
        success,
        failure: len as u64 - success,
    }
}

pub struct WorkerTask {
    opt: TaskOpt,
    gen: RowGenerator,
    latency: LatencyRecorder,
    state: WorkerState,
    success: u64,
    failure: u64,
    batches: u64,
}

impl WorkerTask {
    /// Build the task and its value pool.
    pub fn new(opt: TaskOpt) -> Result<Self, Error> {
        opt.sanity()?;
        let gen = RowGenerator::new(&opt.workload);
        Ok(Self {
            opt,
            gen,
            latency: LatencyRecorder::new(),
            state: WorkerState::Idle,
            success: 0,
            failure: 0,
            batches: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.opt.id
    }

    pub fn opt(&self) -> &TaskOpt {
        &self.opt
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of batches submitted so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Run the task against `store` to completion.
    pub fn run(&mut self, store: &dyn Store) -> Result<WorkerResult, Error> {
        assert_eq!(self.state, WorkerState::Idle, "a worker task runs only once");
        self.state = WorkerState::Running;
        let mut handle = match store.handle() {
            Ok(h) => h,
            Err(e) => {
                self.state = WorkerState::Failed;
                return Err(e.into());
            }
        };
        self.run_with(&mut *handle)
    }

    fn run_with(&mut self, handle: &mut dyn StoreHandle) -> Result<WorkerResult, Error> {
        let RowKeyRange { start, end } = self.opt.range;
        let batch_size = self.opt.batch_size as u64;
        info!(
            "Worker {} starting data load of {} rows in {}",
            self.opt.id,
            end - start,
            self.opt.range
        );
        let since = Instant::now();
        let mut rows: Vec<SyntheticRow> = Vec::with_capacity(self.opt.batch_size);
        let mut cursor = start;
        while cursor < end {
            let upper = (cursor + batch_size).min(end);
            rows.clear();
            rows.extend((cursor..upper).map(|i| self.gen.generate(i)));

            let t0 = Instant::now();
            let response = handle.mutate_batch(&rows);
            let t1 = Instant::now();
            self.latency.record_duration(t1 - t0);

            let tally = match response {
                Ok(statuses) => classify(rows.len(), &statuses),
                Err(e) => {
                    warn!(
                        "Worker {} batch [{}, {}) failed: {}",
                        self.opt.id, cursor, upper, e
                    );
                    BatchTally {
                        success: 0,
                        failure: rows.len() as u64,
                    }
                }
            };
            self.success += tally.success;
            self.failure += tally.failure;
            self.batches += 1;
            cursor += rows.len() as u64;
        }

        let histogram = match self.latency.to_bytes() {
            Ok(h) => h,
            Err(e) => {
                self.state = WorkerState::Failed;
                return Err(e);
            }
        };
        self.state = WorkerState::Completed;
        info!(
            "Worker {} done data load of {} rows in {:.2} ms",
            self.opt.id,
            end - start,
            since.elapsed().as_secs_f64() * 1000.0
        );
        debug!(
            "Worker {} success {} failure {} batches {}",
            self.opt.id, self.success, self.failure, self.batches
        );
        Ok(WorkerResult {
            id: self.opt.id,
            success: self.success,
            failure: self.failure,
            histogram,
        })
    }
}
