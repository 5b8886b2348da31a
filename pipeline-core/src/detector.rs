use crate::config::DetectorConfig;
use crate::incident::{Incident, Severity, SuspectedCause};
use crate::signals::WindowStats;
use chrono::{DateTime, Utc};

/// Outcome of classifying one window snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detection {
    pub severity: Severity,
    pub suspected_cause: SuspectedCause,
}

/// Applies ordered threshold rules to window snapshots.
///
/// Error and latency are checked independently; the resulting severity is the
/// max of the two. Severity upgrades on an already-open incident are handled
/// by the case store (never a silent downgrade; downgrade happens only via
/// sustained clearance and closure).
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// `None` means the snapshot does not warrant an incident.
    pub fn classify(&self, stats: &WindowStats) -> Option<Detection> {
        let c = &self.config;
        let err_sev = grade(stats.error_rate_pct, c.err_med_pct, c.err_high_pct);
        let lat_sev = grade(stats.p95_ms, c.p95_med_ms, c.p95_high_ms);
        let severity = err_sev.max(lat_sev)?;

        let err_decisive = err_sev == Some(severity);
        let lat_decisive = lat_sev == Some(severity);
        let suspected_cause = match (err_decisive, lat_decisive) {
            (true, true) => SuspectedCause::Mixed,
            (true, false) => SuspectedCause::ErrorSpike,
            _ => SuspectedCause::LatencyDegradation,
        };

        Some(Detection {
            severity,
            suspected_cause,
        })
    }

    /// Build a fresh incident from a snapshot, if thresholds are crossed.
    /// Duplicate suppression against already-open incidents lives in the
    /// case store, keyed on (service, environment).
    pub fn evaluate(&self, stats: &WindowStats, now: DateTime<Utc>) -> Option<Incident> {
        self.classify(stats).map(|d| {
            Incident::open(d.severity, d.suspected_cause, stats.clone(), now)
        })
    }
}

fn grade(value: f64, med: f64, high: f64) -> Option<Severity> {
    if value >= high {
        Some(Severity::High)
    } else if value >= med {
        Some(Severity::Medium)
    } else {
        None
    }
}
