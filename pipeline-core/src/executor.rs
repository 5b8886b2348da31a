use crate::backend::ExecutionBackend;
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
}

/// One attempt against one action. Append-only: rollback attempts are new
/// records, past records are never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub action_index: usize,
    pub action_kind: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Completed,
    Failed {
        failed_index: usize,
        /// True when the failed action cannot be undone: terminal for the
        /// plan and surfaced as a high-priority audit event.
        irreversible: bool,
        rolled_back: usize,
        rollback_failures: usize,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub records: Vec<ExecutionRecord>,
    pub outcome: ExecutionOutcome,
}

/// Runs validated actions against the real target, strictly in declared
/// order. Eligibility (verdict, approvals, validations) is enforced by the
/// case store before this is ever invoked.
pub struct Executor;

impl Executor {
    pub fn execute(plan: &Plan, backend: &dyn ExecutionBackend) -> ExecutionReport {
        let mut records = Vec::new();

        for (index, action) in plan.actions.iter().enumerate() {
            let started_at = Utc::now();
            tracing::info!(plan_id = %plan.id, index, action = %action.describe(), "executing action");
            match backend.apply(action) {
                Ok(_) => {
                    records.push(ExecutionRecord {
                        action_index: index,
                        action_kind: action.kind().to_string(),
                        status: ExecutionStatus::Succeeded,
                        started_at,
                        finished_at: Utc::now(),
                        error_detail: None,
                    });
                }
                Err(err) => {
                    records.push(ExecutionRecord {
                        action_index: index,
                        action_kind: action.kind().to_string(),
                        status: ExecutionStatus::Failed,
                        started_at,
                        finished_at: Utc::now(),
                        error_detail: Some(err.clone()),
                    });
                    let (rolled_back, rollback_failures) =
                        Self::compensate_prior(plan, backend, index, &mut records);
                    return ExecutionReport {
                        plan_id: plan.id.clone(),
                        records,
                        outcome: ExecutionOutcome::Failed {
                            failed_index: index,
                            irreversible: !plan.actions[index].reversible(),
                            rolled_back,
                            rollback_failures,
                        },
                    };
                }
            }
        }

        ExecutionReport {
            plan_id: plan.id.clone(),
            records,
            outcome: ExecutionOutcome::Completed,
        }
    }

    /// Best-effort compensating rollback of already-succeeded reversible
    /// actions, newest first. Failures are recorded, never auto-retried.
    fn compensate_prior(
        plan: &Plan,
        backend: &dyn ExecutionBackend,
        failed_index: usize,
        records: &mut Vec<ExecutionRecord>,
    ) -> (usize, usize) {
        let mut rolled_back = 0;
        let mut failures = 0;

        for index in (0..failed_index).rev() {
            let action = &plan.actions[index];
            if !action.reversible() {
                continue;
            }
            let started_at = Utc::now();
            match backend.compensate(action) {
                Ok(()) => {
                    rolled_back += 1;
                    records.push(ExecutionRecord {
                        action_index: index,
                        action_kind: action.kind().to_string(),
                        status: ExecutionStatus::RolledBack,
                        started_at,
                        finished_at: Utc::now(),
                        error_detail: None,
                    });
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(plan_id = %plan.id, index, %err, "compensating rollback failed");
                    records.push(ExecutionRecord {
                        action_index: index,
                        action_kind: action.kind().to_string(),
                        status: ExecutionStatus::RollbackFailed,
                        started_at,
                        finished_at: Utc::now(),
                        error_detail: Some(err),
                    });
                }
            }
        }
        (rolled_back, failures)
    }
}
