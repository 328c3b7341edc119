//! The core benchmark functionality.
//!
//! A benchmark consists of up to two **phases** that run in this order:
//!
//! - the data load, which writes every row of `[0, total_rows)` in batches, split across a fixed
//!   number of parallel workers;
//! - the mixed workload, a single loop that alternates random reads and random writes until a
//!   wall-clock deadline.
//!
//! ## Configuration Format
//!
//! A benchmark configuration file is formatted in TOML. It is concatenated with the store's
//! configuration file (see [`mod@crate::stores`]) before parsing, so the whole thing looks like:
//!
//! ```toml
//! [store]
//! name = "memory"
//!
//! [workload]
//! prefix = "perf"          # row keys are <prefix>0000000, <prefix>0000001, ...
//! column_family = "cf"
//! total_rows = 100000      # keyspace the mixed workload reads from, defaults to [load]
//!
//! [load]
//! total_rows = 100000
//! batch_size = 1000
//! workers = 4
//!
//! [mixed]
//! duration = 30.0
//! ```
//!
//! Available options and their defaults can be found in [`WorkloadOpt`], [`LoadOpt`] and
//! [`MixedOpt`]. At least one of `[load]` and `[mixed]` must be present.
//!
//! Any option can be overridden through the environment without changing the files. Variables
//! are prefixed with `KVLOAD_` and nested with `__`: `KVLOAD_LOAD__WORKERS=8` sets `workers` in
//! `[load]`.
//!
//! For the output format, see [`mod@crate::report`].

use crate::error::Error;
use crate::executor::{self, Executor, ProcessExecutor, ThreadExecutor};
use crate::latency::LatencyRecorder;
use crate::report::{BenchmarkReport, MixedReport, DATA_LOAD, RANDOM_READ, RANDOM_WRITE};
use crate::stores::StoreOpt;
use crate::worker::{classify, RowKeyRange, TaskOpt};
use crate::workload::{KeyPicker, RowGenerator, WorkloadOpt};
use crate::Store;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::{debug, error, info, warn};
use quanta::Instant;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// {{{ options

/// Which kind of execution context runs the data load workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    Thread,
    Process,
}

/// The `[load]` section.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct LoadOpt {
    /// Rows to write, indices `[0, total_rows)`. Must not be smaller than `batch_size`.
    pub total_rows: u64,

    /// Rows per batch submitted to the store.
    pub batch_size: usize,

    /// Number of parallel workers, each writing a contiguous share of the rows.
    ///
    /// Default: 1.
    pub workers: Option<usize>,

    /// "thread" runs each worker on an OS thread, "process" in a child process.
    ///
    /// Default: "thread".
    pub executor: Option<String>,

    /// Pin worker threads to CPU cores. Only used with the thread executor.
    ///
    /// Default: false.
    pub pin: Option<bool>,

    /// Whether to print the latency CDF after the report line.
    ///
    /// Default: false.
    pub cdf: Option<bool>,
}

impl LoadOpt {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(1)
    }

    pub fn executor(&self) -> Result<ExecutorKind, Error> {
        match self.executor.as_deref().unwrap_or("thread") {
            "thread" => Ok(ExecutorKind::Thread),
            "process" => Ok(ExecutorKind::Process),
            other => Err(Error::Config(format!(
                "executor should be one of: thread, process (got {})",
                other
            ))),
        }
    }

    fn sanity(&self) -> Result<(), Error> {
        check_load(self.total_rows, self.batch_size, self.workers())?;
        self.executor()?;
        Ok(())
    }
}

/// The `[mixed]` section.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct MixedOpt {
    /// How long the workload runs, in seconds.
    pub duration: f32,

    /// Whether to print the latency CDFs after the report lines.
    ///
    /// Default: false.
    pub cdf: Option<bool>,
}

impl MixedOpt {
    fn sanity(&self, workload: &WorkloadOpt) -> Result<(), Error> {
        self.duration()?;
        match workload.total_rows {
            Some(n) if n > 0 => Ok(()),
            _ => Err(Error::Config(
                "the mixed workload needs a positive total_rows in [workload] or [load]".into(),
            )),
        }
    }

    /// The duration as a [`Duration`]. Negative, non-finite and out-of-range values are
    /// configuration errors.
    pub fn duration(&self) -> Result<Duration, Error> {
        Duration::try_from_secs_f32(self.duration).map_err(|e| {
            Error::Config(format!(
                "duration should be a non-negative number of seconds (got {}): {}",
                self.duration, e
            ))
        })
    }
}

#[derive(Deserialize, Clone, Debug)]
struct BenchmarkGroupOpt {
    store: StoreOpt,
    #[serde(default)]
    workload: WorkloadOpt,
    load: Option<LoadOpt>,
    mixed: Option<MixedOpt>,
}

/// Worker processes each get a private `memory` store, so the mixed workload would read from an
/// empty map in this process and report every miss as a success.
fn private_store_warning(opt: &BenchmarkGroupOpt) -> Option<String> {
    let process = opt
        .load
        .as_ref()
        .is_some_and(|l| matches!(l.executor(), Ok(ExecutorKind::Process)));
    if process && opt.mixed.is_some() && opt.store.name == "memory" {
        Some(
            "the memory store is private to each worker process: the mixed workload will not \
             see rows written by the data load"
                .to_string(),
        )
    } else {
        None
    }
}

fn check_load(total_rows: u64, batch_size: usize, workers: usize) -> Result<(), Error> {
    if workers == 0 {
        return Err(Error::Config("workers should be positive".into()));
    }
    if batch_size == 0 {
        return Err(Error::Config("batch_size should be positive".into()));
    }
    if total_rows < batch_size as u64 {
        return Err(Error::Config(format!(
            "total_rows ({}) should be at least batch_size ({})",
            total_rows, batch_size
        )));
    }
    Ok(())
}

// }}} options

// {{{ orchestrator

/// Split `[0, total_rows)` into `workers` contiguous ranges of equal length. The remainder goes to
/// the last range.
pub fn partition(total_rows: u64, workers: usize) -> Vec<RowKeyRange> {
    assert!(workers > 0, "workers should be positive");
    let nr_workers = workers as u64;
    let per = total_rows / nr_workers;
    (0..nr_workers)
        .map(|i| {
            let start = i * per;
            let end = if i == nr_workers - 1 {
                total_rows
            } else {
                start + per
            };
            RowKeyRange::new(start, end)
        })
        .collect()
}

/// Counters and latency of one kind of operation in the mixed workload.
#[derive(Default)]
struct OpStats {
    latency: LatencyRecorder,
    busy: Duration,
    success: u64,
    failure: u64,
}

impl OpStats {
    fn record(&mut self, d: Duration, ok: bool) {
        self.latency.record_duration(d);
        self.busy += d;
        if ok {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    fn report(&self, operation: &str) -> BenchmarkReport {
        BenchmarkReport::new(
            operation,
            self.busy,
            &self.latency,
            self.success,
            self.failure,
            0,
        )
    }
}

/// Runs benchmarks against one store.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    workload: WorkloadOpt,
    executor: Box<dyn Executor>,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    /// An orchestrator running data load workers on threads.
    pub fn new(store: Arc<dyn Store>, workload: WorkloadOpt) -> Self {
        let executor = Box::new(ThreadExecutor::new(store.clone()));
        Self {
            store,
            workload,
            executor,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Raising this flag ends the mixed workload at its next iteration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Write rows `[0, total_rows)` with `workers` parallel workers.
    ///
    /// Invalid parameters are reported before any worker starts. Workers that end without a
    /// result are counted in [`BenchmarkReport::workers_lost`]; their rows are not part of the
    /// success or failure counts.
    pub fn load_test(
        &self,
        total_rows: u64,
        batch_size: usize,
        workers: usize,
    ) -> Result<BenchmarkReport, Error> {
        check_load(total_rows, batch_size, workers)?;
        let ranges = partition(total_rows, workers);
        debug!("Data load ranges: {:?}", ranges);
        let opts = ranges
            .into_iter()
            .enumerate()
            .map(|(id, range)| TaskOpt {
                id,
                range,
                batch_size,
                workload: self.workload.clone(),
            })
            .collect();
        // local value pools are built here, outside of the timed region
        let prepared = executor::prepare(&*self.executor, opts)?;

        info!(
            "Starting data load of {} rows with {} workers, batch size {}",
            total_rows, workers, batch_size
        );
        let start = Instant::now();
        let outcomes = executor::run(prepared);
        let elapsed = start.elapsed();

        let mut latency = LatencyRecorder::new();
        let mut success = 0u64;
        let mut failure = 0u64;
        let mut lost = 0usize;
        for outcome in outcomes {
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    lost += 1;
                    continue;
                }
            };
            match result.latency() {
                Ok(l) => {
                    latency.merge(&l)?;
                    success += result.success;
                    failure += result.failure;
                }
                Err(e) => {
                    error!("Worker {} returned an unreadable histogram: {}", result.id, e);
                    lost += 1;
                }
            }
        }
        if lost > 0 {
            warn!(
                "Data load partially failed: {} of {} workers never reported",
                lost, workers
            );
        }
        Ok(BenchmarkReport::new(
            DATA_LOAD, elapsed, &latency, success, failure, lost,
        ))
    }

    /// Alternate random reads (even iterations) and random writes (odd iterations) until
    /// `duration` has passed. The deadline is checked before every operation.
    pub fn mixed_read_write_test(&self, duration: Duration) -> Result<MixedReport, Error> {
        let total_rows = self.workload.total_rows.ok_or_else(|| {
            Error::Config("the mixed workload needs total_rows in [workload]".into())
        })?;
        let picker = KeyPicker::new(&self.workload, total_rows)?;
        let mut gen = RowGenerator::new(&self.workload);
        let mut rng = SmallRng::from_os_rng();
        let mut handle = self.store.handle()?;
        let mut read = OpStats::default();
        let mut write = OpStats::default();

        info!(
            "Starting random read/write over {} rows for {:.2} s",
            total_rows,
            duration.as_secs_f64()
        );
        let start = Instant::now();
        let mut i = 0u64;
        while start.elapsed() < duration {
            if self.stop.load(Ordering::Relaxed) {
                warn!("Random read/write stopped early");
                break;
            }
            let index = picker.next(&mut rng);
            if i % 2 == 0 {
                let key = gen.key(index);
                let t0 = Instant::now();
                let response = handle.read_row(&key);
                let d = t0.elapsed();
                let ok = match response {
                    Ok(Some(_)) => true,
                    Ok(None) => {
                        debug!("Row {} not found", key);
                        true
                    }
                    Err(e) => {
                        debug!("Read of {} failed: {}", key, e);
                        false
                    }
                };
                read.record(d, ok);
            } else {
                let row = gen.generate(index);
                let t0 = Instant::now();
                let response = handle.mutate_batch(std::slice::from_ref(&row));
                let d = t0.elapsed();
                let ok = match response {
                    Ok(statuses) => classify(1, &statuses).success == 1,
                    Err(e) => {
                        debug!("Write of {} failed: {}", row.key, e);
                        false
                    }
                };
                write.record(d, ok);
            }
            i += 1;
        }
        info!(
            "Random read/write complete after {} operations in {:.2} s",
            i,
            start.elapsed().as_secs_f64()
        );

        Ok(MixedReport {
            read: read.report(RANDOM_READ),
            write: write.report(RANDOM_WRITE),
        })
    }
}

// }}} orchestrator

// {{{ bencher

/// A parsed benchmark, ready to run.
pub struct Benchmark {
    orchestrator: Orchestrator,
    load: Option<LoadOpt>,
    mixed: Option<MixedOpt>,
}

/// Parse a benchmark and its store from the concatenated configuration files.
pub fn init(text: &str) -> Result<Benchmark, Error> {
    let mut opt: BenchmarkGroupOpt = Figment::new()
        .merge(Toml::string(text))
        .merge(Env::prefixed("KVLOAD_").split("__"))
        .extract()?;
    debug!(
        "Creating benchmark group with the following configurations: {:?}",
        opt
    );
    opt.workload.sanity()?;
    // the mixed workload reads what the data load wrote unless told otherwise
    if opt.workload.total_rows.is_none() {
        opt.workload.total_rows = opt.load.as_ref().map(|l| l.total_rows);
    }
    if opt.load.is_none() && opt.mixed.is_none() {
        return Err(Error::Config(
            "at least one of [load] and [mixed] should be given".into(),
        ));
    }
    if let Some(ref load) = opt.load {
        load.sanity()?;
    }
    if let Some(ref mixed) = opt.mixed {
        mixed.sanity(&opt.workload)?;
    }
    if let Some(msg) = private_store_warning(&opt) {
        warn!("{}", msg);
    }

    let store = opt.store.build()?;
    let mut orchestrator = Orchestrator::new(store.clone(), opt.workload.clone());
    if let Some(ref load) = opt.load {
        let executor: Box<dyn Executor> = match load.executor()? {
            ExecutorKind::Thread => {
                Box::new(ThreadExecutor::new(store).pinned(load.pin.unwrap_or(false)))
            }
            ExecutorKind::Process => Box::new(ProcessExecutor::new(&opt.store)?),
        };
        orchestrator = orchestrator.with_executor(executor);
    }
    Ok(Benchmark {
        orchestrator,
        load: opt.load,
        mixed: opt.mixed,
    })
}

impl Benchmark {
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run the data load and then the mixed workload, whichever are configured, printing each
    /// report as soon as it is ready.
    pub fn run(&self) -> Result<Vec<BenchmarkReport>, Error> {
        let mut reports = Vec::new();
        if let Some(ref load) = self.load {
            let report =
                self.orchestrator
                    .load_test(load.total_rows, load.batch_size, load.workers())?;
            println!("{}", report.line(load.cdf.unwrap_or(false)));
            reports.push(report);
        }
        if let Some(ref mixed) = self.mixed {
            let cdf = mixed.cdf.unwrap_or(false);
            let MixedReport { read, write } =
                self.orchestrator.mixed_read_write_test(mixed.duration()?)?;
            println!("{}", read.line(cdf));
            println!("{}", write.line(cdf));
            reports.push(read);
            reports.push(write);
        }
        Ok(reports)
    }
}

// }}} bencher

// {{{ tests


// }}} tests
