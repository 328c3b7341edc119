//! Latency distribution tracking.
//!
//! Each worker owns a [`LatencyRecorder`]. Recorders are only combined at the orchestrator, after
//! every worker is done, either directly with [`LatencyRecorder::merge`] or after crossing a
//! process boundary in their serialized form.

use crate::error::Error;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use hdrhistogram::Histogram;
use std::io::Cursor;
use std::time::Duration;

/// Smallest trackable latency, in milliseconds.
pub const LOWEST_MS: u64 = 1;

/// Largest trackable latency, in milliseconds (one hour).
pub const HIGHEST_MS: u64 = 3_600_000;

/// Significant decimal digits kept by the histogram.
pub const SIGFIG: u8 = 3;

/// A bucketed latency histogram in milliseconds.
#[derive(Clone, Debug)]
pub struct LatencyRecorder {
    hdr: Histogram<u64>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        // the bounds are constants that hdrhistogram accepts
        let hdr = Histogram::new_with_bounds(LOWEST_MS, HIGHEST_MS, SIGFIG)
            .expect("latency histogram bounds are valid");
        Self { hdr }
    }

    /// Add one observation. Values outside `[LOWEST_MS, HIGHEST_MS]` are clamped, so an outlier
    /// never aborts a run.
    pub fn record(&mut self, ms: u64) {
        let ms = ms.clamp(LOWEST_MS, HIGHEST_MS);
        if let Err(e) = self.hdr.record(ms) {
            log::warn!("Dropping latency sample {} ms: {:?}", ms, e);
        }
    }

    /// Record a measured interval, rounded to the nearest millisecond.
    pub fn record_duration(&mut self, d: Duration) {
        let ms = (d.as_micros() + 500) / 1000;
        self.record(u64::try_from(ms).unwrap_or(HIGHEST_MS));
    }

    /// The value below which `p` percent of the samples fall. Zero if nothing was recorded.
    pub fn percentile(&self, p: f64) -> u64 {
        if self.hdr.is_empty() {
            return 0;
        }
        self.hdr.value_at_percentile(p.clamp(0.0, 100.0))
    }

    pub fn min(&self) -> u64 {
        if self.hdr.is_empty() {
            return 0;
        }
        self.hdr.min()
    }

    pub fn max(&self) -> u64 {
        if self.hdr.is_empty() {
            return 0;
        }
        self.hdr.max()
    }

    pub fn mean(&self) -> f64 {
        if self.hdr.is_empty() {
            return 0.0;
        }
        self.hdr.mean()
    }

    /// Number of recorded samples.
    pub fn len(&self) -> u64 {
        self.hdr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdr.is_empty()
    }

    /// Fold all samples of `other` into this recorder.
    pub fn merge(&mut self, other: &LatencyRecorder) -> Result<(), Error> {
        self.hdr
            .add(&other.hdr)
            .map_err(|e| Error::Histogram(format!("failed to merge histograms: {:?}", e)))
    }

    /// Encode in the HdrHistogram V2 format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        V2Serializer::new()
            .serialize(&self.hdr, &mut buf)
            .map_err(|e| Error::Histogram(format!("failed to serialize histogram: {:?}", e)))?;
        Ok(buf)
    }

    /// Decode a histogram produced by [`LatencyRecorder::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let decoded: Histogram<u64> = Deserializer::new()
            .deserialize(&mut Cursor::new(bytes))
            .map_err(|e| Error::Histogram(format!("failed to deserialize histogram: {:?}", e)))?;
        // re-home the samples into a histogram with the canonical bounds so later merges agree
        let mut recorder = Self::new();
        recorder
            .hdr
            .add(&decoded)
            .map_err(|e| Error::Histogram(format!("histogram out of bounds: {:?}", e)))?;
        Ok(recorder)
    }

    /// Cumulative distribution in steps of one millisecond, up to the largest sample. Each entry
    /// is `(ms, percent of samples at or below ms)`.
    pub fn cdf(&self) -> Vec<(u64, f64)> {
        let mut points = Vec::new();
        if self.hdr.is_empty() {
            return points;
        }
        let total = self.hdr.len() as f64;
        let max = self.hdr.max();
        let mut cdf = 0u64;
        for v in self.hdr.iter_linear(1) {
            let ms = v.value_iterated_to();
            cdf += v.count_since_last_iteration();
            if ms < LOWEST_MS {
                continue;
            }
            points.push((ms, cdf as f64 * 100.0 / total));
            if ms >= max {
                break;
            }
        }
        points
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}
