//! Response-time collection and summary statistics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Which way a dispatched request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Append-only log of elapsed times, shared by all in-flight dispatches.
pub struct StatsCollector {
    inner: Mutex<Samples>,
}

struct Samples {
    /// Elapsed time of every dispatch in milliseconds, in completion order.
    response_times: Vec<f64>,
    /// Same samples in microseconds, for percentiles.
    histogram: Option<Histogram<u64>>,
    successes: u64,
    failures: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Samples {
                response_times: Vec::new(),
                // Three significant figures; auto-resizing, so creation cannot
                // fail in practice. Percentiles are skipped if it ever does.
                histogram: Histogram::new(3).ok(),
                successes: 0,
                failures: 0,
            }),
        }
    }

    /// Append one elapsed-time sample.
    pub fn record(&self, elapsed: Duration, outcome: Outcome) {
        let ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        self.push(ms, outcome);
    }

    /// Append a sample given directly in milliseconds.
    pub fn record_ms(&self, elapsed_ms: f64, outcome: Outcome) {
        self.push(elapsed_ms.max(0.0), outcome);
    }

    fn push(&self, ms: f64, outcome: Outcome) {
        let mut samples = self.lock();
        samples.response_times.push(ms);
        if let Some(histogram) = samples.histogram.as_mut() {
            histogram.saturating_record((ms * 1000.0).round() as u64);
        }
        match outcome {
            Outcome::Success => samples.successes += 1,
            Outcome::Failure => samples.failures += 1,
        }
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.lock().response_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the recorded response times in milliseconds.
    pub fn response_times(&self) -> Vec<f64> {
        self.lock().response_times.clone()
    }

    /// Compute aggregate statistics over everything recorded so far.
    pub fn summarize(&self) -> Summary {
        let samples = self.lock();
        let times = &samples.response_times;

        if times.is_empty() {
            return Summary {
                successes: samples.successes,
                failures: samples.failures,
                ..Summary::default()
            };
        }

        let count = times.len();
        let mean = times.iter().sum::<f64>() / count as f64;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let percentile = |q: f64| {
            samples
                .histogram
                .as_ref()
                .map(|h| h.value_at_quantile(q) as f64 / 1000.0)
        };

        Summary {
            samples: count as u64,
            successes: samples.successes,
            failures: samples.failures,
            avg_response_time: Some(mean),
            min_response_time: Some(min),
            max_response_time: Some(max),
            p50: percentile(0.50),
            p90: percentile(0.90),
            p99: percentile(0.99),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Samples> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate response-time statistics. Times are in milliseconds.
///
/// Every timing field is `None` when no samples were recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub samples: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_response_time: Option<f64>,
    pub min_response_time: Option<f64>,
    pub max_response_time: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
}

impl Summary {
    /// Share of samples that ended in success, between 0 and 1.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.successes + self.failures;
        (total > 0).then(|| self.successes as f64 / total as f64)
    }
}
