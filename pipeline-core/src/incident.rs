use crate::error::PipelineError;
use crate::signals::WindowStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Which metric family drove detection. Steers the plan generator's
/// deterministic template choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspectedCause {
    ErrorSpike,
    LatencyDegradation,
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Open,
    /// A plan is executing against the real target.
    Mitigating,
    /// All actions succeeded; waiting for the triggering condition to clear.
    ResolvedPendingVerification,
    Closed,
}

impl IncidentStatus {
    pub fn allowed_transitions(self) -> &'static [IncidentStatus] {
        use IncidentStatus::*;
        match self {
            Open => &[Mitigating, Closed],
            Mitigating => &[ResolvedPendingVerification, Open],
            ResolvedPendingVerification => &[Closed, Open],
            Closed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IncidentStatus::Closed)
    }
}

pub fn validate_transition(
    from: IncidentStatus,
    to: IncidentStatus,
) -> Result<(), PipelineError> {
    if from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        Err(PipelineError::IllegalTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// A detected, tracked instance of a service health violation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub service: String,
    pub environment: String,
    pub severity: Severity,
    pub opened_at: DateTime<Utc>,
    /// The window stats that triggered detection.
    pub signal_snapshot: WindowStats,
    pub suspected_cause: SuspectedCause,
    pub status: IncidentStatus,
}

impl Incident {
    pub fn open(
        severity: Severity,
        suspected_cause: SuspectedCause,
        snapshot: WindowStats,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service: snapshot.service.clone(),
            environment: snapshot.environment.clone(),
            severity,
            opened_at,
            signal_snapshot: snapshot,
            suspected_cause,
            status: IncidentStatus::Open,
        }
    }

    pub fn transition(&mut self, to: IncidentStatus) -> Result<(), PipelineError> {
        validate_transition(self.status, to)?;
        self.status = to;
        Ok(())
    }
}
