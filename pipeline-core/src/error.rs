use thiserror::Error;

/// Failure taxonomy for the decision/execution pipeline.
///
/// Every terminal denial or failure carries enough human-readable detail to
/// reconstruct the decision without re-running code; failures are always local
/// to one incident/plan.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The signal window has not accumulated enough data to judge. The
    /// detector treats this as "defer", not as a fault.
    #[error("insufficient signal data for {service}/{environment}: window {window_s}s < minimum {min_window_s}s")]
    InsufficientSignalData {
        service: String,
        environment: String,
        window_s: u64,
        min_window_s: u64,
    },

    /// No schema-valid plan could be constructed for the incident.
    #[error("invalid plan for incident {incident_id}: {reason}")]
    InvalidPlan { incident_id: String, reason: String },

    /// A denied verdict is terminal for its plan; only a new plan may retry.
    #[error("policy denied plan {plan_id}: {reasons}")]
    PolicyDenied { plan_id: String, reasons: String },

    /// One or more actions failed dry-run; the whole plan is blocked.
    #[error("validation failed for plan {plan_id}: {detail}")]
    ValidationFailed { plan_id: String, detail: String },

    /// A live action failed mid-plan.
    #[error("action {index} ({kind}) of plan {plan_id} failed: {detail}")]
    ActionExecutionFailed {
        plan_id: String,
        index: usize,
        kind: String,
        detail: String,
    },

    /// The plan sat in awaiting-approval past the configured timeout.
    #[error("plan {plan_id} expired while awaiting approval")]
    ApprovalTimeout { plan_id: String },

    /// The plan is not eligible for the requested step (gating invariant).
    #[error("plan {plan_id} not eligible: {reason}")]
    NotEligible { plan_id: String, reason: String },

    #[error("illegal incident status transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("unknown incident {0}")]
    UnknownIncident(String),

    #[error("unknown plan {0}")]
    UnknownPlan(String),

    #[error("audit store: {0}")]
    Audit(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PipelineError {
    /// Insufficient data is a defer signal rather than a fault.
    pub fn is_defer(&self) -> bool {
        matches!(self, PipelineError::InsufficientSignalData { .. })
    }
}
