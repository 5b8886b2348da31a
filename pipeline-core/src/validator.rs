use crate::backend::ExecutionBackend;
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One dry-run result for one action. Attempts are recorded independently;
/// dry-run may be retried without limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub action_index: usize,
    pub action_kind: String,
    pub attempt: u32,
    pub passed: bool,
    pub detail: String,
    pub executed_at: DateTime<Utc>,
}

/// Dry-runs a plan's actions through the backend's simulation mode and
/// compares each predicted post-state against the action's declared expected
/// outcome. A single failing action blocks the whole plan.
pub struct Validator;

impl Validator {
    pub fn dry_run(
        plan: &Plan,
        backend: &dyn ExecutionBackend,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Vec<ValidationResult> {
        plan.actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                let (passed, detail) = match backend.dry_run(action) {
                    Ok(predicted) => {
                        let expected = action.expected_outcome();
                        if predicted == expected {
                            (true, "predicted state matches declared outcome".to_string())
                        } else {
                            (
                                false,
                                format!(
                                    "predicted state {predicted} diverges from declared outcome {expected}"
                                ),
                            )
                        }
                    }
                    Err(err) => (false, format!("dry-run refused: {err}")),
                };
                ValidationResult {
                    action_index: index,
                    action_kind: action.kind().to_string(),
                    attempt,
                    passed,
                    detail,
                    executed_at: now,
                }
            })
            .collect()
    }

    pub fn all_passed(results: &[ValidationResult]) -> bool {
        !results.is_empty() && results.iter().all(|r| r.passed)
    }
}
