//! Aggregated benchmark results.
//!
//! ## Output Format
//!
//! All outputs are in plain text, one line per report, so they are easy to process with shell
//! scripts and tools including gnuplot. A report line looks like the following:
//!
//! ```txt
//! Data Load run_time_ms 1520 total 100000 success 99990 failure 10 lost 0 ops_per_sec 65789.47 min_ms 1 max_ms 48 p50_ms 2 p75_ms 3 p90_ms 4 p95_ms 6 p99_ms 12 p9999_ms 48
//! ```
//!
//! - `run_time_ms`: wall-clock time of the data load, or the time spent inside operations of one
//!   kind for the mixed workload.
//! - `total`: operations attempted, equal to `success + failure`.
//! - `lost`: workers that never reported. Their rows are not part of `total`.
//! - `min_ms` to `p9999_ms`: latency distribution. For the data load a sample is one batch.
//!
//! When `cdf` is enabled, the latency CDF is appended to the same line as a sequence of
//! `<ms> <percentile>` tuples, in steps of one millisecond, up to the maximum latency:
//!
//! ```txt
//! ... p9999_ms 48 cdf_ms percentile 1 10.00 2 55.00 3 80.00 ...
//! ```

use crate::latency::LatencyRecorder;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const DATA_LOAD: &str = "Data Load";
pub const RANDOM_READ: &str = "Random Read";
pub const RANDOM_WRITE: &str = "Random Write";

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BenchmarkReport {
    pub operation: String,
    pub run_time_ms: u64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub operations: u64,
    /// Operations per second over `run_time_ms`.
    pub throughput: f64,
    pub p50_ms: u64,
    pub p75_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub p9999_ms: u64,
    pub success: u64,
    pub failure: u64,
    /// Workers whose execution context ended without a result.
    pub workers_lost: usize,
    /// `(ms, percentile)` points of the latency CDF.
    pub cdf: Vec<(u64, f64)>,
}

impl BenchmarkReport {
    pub fn new(
        operation: &str,
        run_time: Duration,
        latency: &LatencyRecorder,
        success: u64,
        failure: u64,
        workers_lost: usize,
    ) -> Self {
        let operations = success + failure;
        let secs = run_time.as_secs_f64();
        let throughput = if secs > 0.0 {
            operations as f64 / secs
        } else {
            0.0
        };
        Self {
            operation: operation.to_string(),
            run_time_ms: run_time.as_millis() as u64,
            min_latency_ms: latency.min(),
            max_latency_ms: latency.max(),
            operations,
            throughput,
            p50_ms: latency.percentile(50.0),
            p75_ms: latency.percentile(75.0),
            p90_ms: latency.percentile(90.0),
            p95_ms: latency.percentile(95.0),
            p99_ms: latency.percentile(99.0),
            p9999_ms: latency.percentile(99.99),
            success,
            failure,
            workers_lost,
            cdf: latency.cdf(),
        }
    }

    /// Whether some workers never reported, so the totals cover only part of the requested rows.
    pub fn is_partial(&self) -> bool {
        self.workers_lost > 0
    }

    /// The report line, optionally followed by the CDF.
    pub fn line(&self, cdf: bool) -> String {
        let mut line = self.to_string();
        if cdf {
            line.push_str(" cdf_ms percentile");
            for (ms, p) in self.cdf.iter() {
                line.push_str(&format!(" {} {:.2}", ms, p));
            }
        }
        line
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run_time_ms {} total {} success {} failure {} lost {} ops_per_sec {:.2} \
             min_ms {} max_ms {} p50_ms {} p75_ms {} p90_ms {} p95_ms {} p99_ms {} p9999_ms {}",
            self.operation,
            self.run_time_ms,
            self.operations,
            self.success,
            self.failure,
            self.workers_lost,
            self.throughput,
            self.min_latency_ms,
            self.max_latency_ms,
            self.p50_ms,
            self.p75_ms,
            self.p90_ms,
            self.p95_ms,
            self.p99_ms,
            self.p9999_ms,
        )
    }
}

/// The two halves of the mixed read/write workload.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MixedReport {
    pub read: BenchmarkReport,
    pub write: BenchmarkReport,
}
