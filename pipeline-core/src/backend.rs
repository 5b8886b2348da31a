use crate::actions::Action;

/// Contract every execution target must satisfy: an idempotent, non-mutating
/// dry-run mode, live application, and best-effort compensation for
/// reversible actions.
pub trait ExecutionBackend: Send + Sync {
    /// Report the predicted post-state this action would produce, without
    /// touching the real target. Safe to repeat.
    fn dry_run(&self, action: &Action) -> Result<serde_json::Value, String>;

    /// Apply the action against the real target.
    fn apply(&self, action: &Action) -> Result<serde_json::Value, String>;

    /// Undo a previously applied action. Only called for reversible actions.
    fn compensate(&self, action: &Action) -> Result<(), String>;
}

/// In-process simulation backend used for demos and tests.
///
/// Failure injection by target name: a service containing `fail-dry-run`
/// fails simulation, `fail-apply` fails live execution, `fail-rollback`
/// fails compensation.
#[derive(Default)]
pub struct SimulatedBackend;

impl SimulatedBackend {
    fn injected_failure(action: &Action, marker: &str) -> Option<String> {
        let global_key = match action {
            Action::FeatureFlagToggle { key, .. } => key.clone(),
            _ => String::new(),
        };
        action
            .declared_services()
            .iter()
            .chain(std::iter::once(&global_key))
            .find(|s| s.contains(marker))
            .map(|s| format!("simulated failure ({marker}) for '{s}'"))
    }
}

impl ExecutionBackend for SimulatedBackend {
    fn dry_run(&self, action: &Action) -> Result<serde_json::Value, String> {
        if let Some(err) = Self::injected_failure(action, "fail-dry-run") {
            return Err(err);
        }
        // The simulation predicts exactly the declared outcome.
        Ok(action.expected_outcome())
    }

    fn apply(&self, action: &Action) -> Result<serde_json::Value, String> {
        if let Some(err) = Self::injected_failure(action, "fail-apply") {
            return Err(err);
        }
        Ok(serde_json::json!({
            "status": "done",
            "action": action.describe(),
            "outcome": action.expected_outcome(),
        }))
    }

    fn compensate(&self, action: &Action) -> Result<(), String> {
        if let Some(err) = Self::injected_failure(action, "fail-rollback") {
            return Err(err);
        }
        Ok(())
    }
}
