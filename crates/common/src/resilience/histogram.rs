//! Histogram for tracking latency distributions
//!
//! Logarithmic buckets between 1µs and 10 minutes, roughly 10% wide. Each
//! scrape of runtime gauges takes a snapshot and resets the counters, so the
//! reported percentiles describe the interval since the previous scrape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Histogram for tracking latency measurements
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Arc<[AtomicU64]>,
    count: Arc<AtomicU64>,
    sum_micros: Arc<AtomicU64>,
    max_micros: Arc<AtomicU64>,
}

impl Histogram {
    const NUM_BUCKETS: usize = 200;
    const MIN_MICROS: u64 = 1;
    const MAX_MICROS: u64 = 600_000_000;

    /// Create a new histogram
    pub fn new() -> Self {
        let buckets: Vec<AtomicU64> = (0..Self::NUM_BUCKETS).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets: buckets.into(),
            count: Arc::new(AtomicU64::new(0)),
            sum_micros: Arc::new(AtomicU64::new(0)),
            max_micros: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a duration measurement
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX).min(Self::MAX_MICROS);
        self.buckets[Self::bucket_of(micros)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Acquire)).collect(),
            count: self.count.load(Ordering::Acquire),
            sum_micros: self.sum_micros.load(Ordering::Acquire),
            max_micros: self.max_micros.load(Ordering::Acquire),
        }
    }

    /// Snapshot and reset in one pass
    ///
    /// A measurement racing with this call lands either in the returned
    /// snapshot or in the next one; `count` may disagree with the bucket sum
    /// by that measurement.
    pub fn take_snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.iter().map(|b| b.swap(0, Ordering::AcqRel)).collect(),
            count: self.count.swap(0, Ordering::AcqRel),
            sum_micros: self.sum_micros.swap(0, Ordering::AcqRel),
            max_micros: self.max_micros.swap(0, Ordering::AcqRel),
        }
    }

    /// Get the number of recorded measurements
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn bucket_of(micros: u64) -> usize {
        if micros <= Self::MIN_MICROS {
            return 0;
        }
        let ratio_ln = Self::ratio().ln();
        let index = ((micros as f64).ln() / ratio_ln).floor() as usize;
        index.min(Self::NUM_BUCKETS - 1)
    }

    /// Geometric midpoint of a bucket
    fn bucket_value(index: usize) -> u64 {
        if index == 0 {
            return Self::MIN_MICROS;
        }
        Self::ratio().powf(index as f64 + 0.5).round() as u64
    }

    fn ratio() -> f64 {
        static RATIO: OnceLock<f64> = OnceLock::new();
        *RATIO.get_or_init(|| {
            (Self::MAX_MICROS as f64 / Self::MIN_MICROS as f64)
                .powf(1.0 / (Self::NUM_BUCKETS as f64 - 1.0))
        })
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of histogram statistics
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    buckets: Vec<u64>,
    count: u64,
    sum_micros: u64,
    max_micros: u64,
}

impl HistogramSnapshot {
    /// Get the total number of measurements
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the mean latency
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.sum_micros / self.count))
    }

    /// Get the maximum latency
    pub fn max(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.max_micros))
    }

    /// Latency below which a `p` fraction (0.0 to 1.0) of measurements fall.
    ///
    /// Never reports more than the recorded maximum.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let total: u64 = self.buckets.iter().sum();
        if total == 0 || !(0.0..=1.0).contains(&p) {
            return None;
        }

        let rank = ((total as f64) * p).ceil().max(1.0) as u64;
        let mut accumulated = 0u64;
        for (index, &count) in self.buckets.iter().enumerate() {
            accumulated += count;
            if accumulated >= rank {
                let micros = Histogram::bucket_value(index).min(self.max_micros.max(1));
                return Some(Duration::from_micros(micros));
            }
        }
        self.max()
    }
}
