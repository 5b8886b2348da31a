use crate::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// One health observation for a (service, environment) pair.
/// Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub service: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub error_count: u64,
    pub request_count: u64,
    pub latency_p95_ms: f64,
}

/// Aggregated view of the retained samples for one (service, environment).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub service: String,
    pub environment: String,
    /// Percentage: 1.0 means 1% of requests errored.
    pub error_rate_pct: f64,
    pub p95_ms: f64,
    pub window_duration_s: u64,
    pub sample_count: usize,
}

/// Rolling per-(service, environment) aggregation of health samples.
/// Retains only samples within the configured window; concurrent
/// record/snapshot is safe.
pub struct SignalWindow {
    retention_s: u64,
    min_window_s: u64,
    buffers: Mutex<HashMap<(String, String), Vec<SignalSample>>>,
}

impl SignalWindow {
    pub fn new(retention_s: u64, min_window_s: u64) -> Self {
        Self {
            retention_s,
            min_window_s,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a sample and evict everything older than the retention window,
    /// measured from the newest retained timestamp.
    pub fn record(&self, sample: SignalSample) {
        let key = (sample.service.clone(), sample.environment.clone());
        let mut buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let buf = buffers.entry(key).or_default();
        buf.push(sample);

        let newest = buf
            .iter()
            .map(|s| s.timestamp)
            .max()
            .unwrap_or_else(Utc::now);
        let horizon = newest - Duration::seconds(self.retention_s as i64);
        buf.retain(|s| s.timestamp >= horizon);
    }

    /// Known (service, environment) pairs, for the periodic evaluation cycle.
    pub fn tracked(&self) -> Vec<(String, String)> {
        let buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffers.keys().cloned().collect()
    }

    pub fn snapshot(&self, service: &str, environment: &str) -> Result<WindowStats, PipelineError> {
        self.snapshot_at(service, environment, Utc::now())
    }

    /// Snapshot against an explicit `now`, evicting anything the retention
    /// window no longer covers. Below the minimum window this is
    /// `InsufficientSignalData` and the detector must not fire.
    pub fn snapshot_at(
        &self,
        service: &str,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Result<WindowStats, PipelineError> {
        let key = (service.to_string(), environment.to_string());
        let buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let horizon = now - Duration::seconds(self.retention_s as i64);
        let retained: Vec<&SignalSample> = buffers
            .get(&key)
            .map(|buf| buf.iter().filter(|s| s.timestamp >= horizon).collect())
            .unwrap_or_default();

        let oldest = retained.iter().map(|s| s.timestamp).min();
        let newest = retained.iter().map(|s| s.timestamp).max();
        let window_s = match (oldest, newest) {
            (Some(a), Some(b)) => (b - a).num_seconds().max(0) as u64,
            _ => 0,
        };

        if retained.is_empty() || window_s < self.min_window_s {
            return Err(PipelineError::InsufficientSignalData {
                service: service.to_string(),
                environment: environment.to_string(),
                window_s,
                min_window_s: self.min_window_s,
            });
        }

        let errors: u64 = retained.iter().map(|s| s.error_count).sum();
        let requests: u64 = retained.iter().map(|s| s.request_count).sum();
        let error_rate_pct = if requests == 0 {
            0.0
        } else {
            100.0 * errors as f64 / requests as f64
        };

        Ok(WindowStats {
            service: service.to_string(),
            environment: environment.to_string(),
            error_rate_pct,
            p95_ms: percentile_95(retained.iter().map(|s| s.latency_p95_ms)),
            window_duration_s: window_s,
            sample_count: retained.len(),
        })
    }
}

/// Nearest-rank p95 over the retained latency observations.
fn percentile_95(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((0.95 * sorted.len() as f64).ceil() as usize).max(1);
    sorted[rank - 1]
}
