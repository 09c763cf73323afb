//! Windowed sample cache
//!
//! Samples are keyed by `(service, api, kind)`. Entries older than the window
//! are dropped lazily whenever a key is read.

use std::collections::BTreeMap;
use std::time::Duration;

use bulwark_domain::{MetricKey, OptimizerMetricSample};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug)]
pub struct MetricsCache {
    window: chrono::Duration,
    samples: DashMap<MetricKey, Vec<OptimizerMetricSample>>,
}

impl MetricsCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            samples: DashMap::new(),
        }
    }

    pub fn record(&self, sample: OptimizerMetricSample) {
        self.samples.entry(sample.key()).or_default().push(sample);
    }

    pub fn record_all(&self, samples: impl IntoIterator<Item = OptimizerMetricSample>) {
        for sample in samples {
            self.record(sample);
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Samples for `key` still inside the window at `now`
    pub fn samples(&self, key: &MetricKey, now: DateTime<Utc>) -> Vec<OptimizerMetricSample> {
        let cutoff = self.cutoff(now);
        match self.samples.get_mut(key) {
            Some(mut entry) => {
                entry.retain(|sample| sample.observed_at > cutoff);
                entry.clone()
            }
            None => Vec::new(),
        }
    }

    /// Values of every live key, evicting expired samples and empty keys
    pub fn snapshot(&self, now: DateTime<Utc>) -> BTreeMap<MetricKey, Vec<f64>> {
        let cutoff = self.cutoff(now);
        let mut values = BTreeMap::new();
        self.samples.retain(|key, samples| {
            samples.retain(|sample| sample.observed_at > cutoff);
            if samples.is_empty() {
                return false;
            }
            values.insert(key.clone(), samples.iter().map(|sample| sample.value).collect());
            true
        });
        values
    }

    /// Keys currently held, including ones not yet evicted
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
