use crate::audit::AuditEvent;
use crate::executor::ExecutionStatus;
use crate::policy::Decision;
use crate::state::{IncidentCase, PlanRecord};
use std::fmt::Write;

/// Render a post-incident report from the case record and its audit trail.
/// Pure presentation: everything in the output is already persisted state.
pub fn render_markdown(case: &IncidentCase, events: &[AuditEvent]) -> String {
    let mut out = String::new();
    let incident = &case.incident;

    let _ = writeln!(out, "# Incident {}", incident.id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Service:** {} ({})", incident.service, incident.environment);
    let _ = writeln!(out, "- **Severity:** {:?}", incident.severity);
    let _ = writeln!(out, "- **Status:** {:?}", incident.status);
    let _ = writeln!(out, "- **Suspected cause:** {:?}", incident.suspected_cause);
    let _ = writeln!(out, "- **Opened:** {}", incident.opened_at.to_rfc3339());

    let _ = writeln!(out);
    let _ = writeln!(out, "## Triggering signal");
    let _ = writeln!(out);
    let snap = &incident.signal_snapshot;
    let _ = writeln!(out, "- error rate: {:.2}%", snap.error_rate_pct);
    let _ = writeln!(out, "- p95 latency: {:.0} ms", snap.p95_ms);
    let _ = writeln!(
        out,
        "- window: {}s over {} samples",
        snap.window_duration_s, snap.sample_count
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "## Plans");
    if case.plans.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "No remediation plans were proposed.");
    }
    for record in &case.plans {
        render_plan(&mut out, record);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Timeline");
    let _ = writeln!(out);
    if events.is_empty() {
        let _ = writeln!(out, "No audit events recorded.");
    }
    for event in events {
        let _ = writeln!(
            out,
            "- `{}` **{:?}** {}",
            event.timestamp.to_rfc3339(),
            event.kind,
            event.description
        );
    }

    out
}

fn render_plan(out: &mut String, record: &PlanRecord) {
    let plan = &record.plan;
    let _ = writeln!(out);
    let _ = writeln!(out, "### Plan {} ({:?})", plan.id, record.state);
    let _ = writeln!(out);
    let _ = writeln!(out, "_{}_", plan.rationale);
    let _ = writeln!(out);
    for (index, action) in plan.actions.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", index + 1, action.describe());
    }

    if let Some(verdict) = record.effective_verdict() {
        let _ = writeln!(out);
        let verdict_line = match verdict.decision {
            Decision::Allow => "allowed".to_string(),
            Decision::AllowWithApproval => {
                format!("allowed, {} approval(s) required", verdict.required_approvals)
            }
            Decision::Deny => "denied".to_string(),
        };
        let _ = writeln!(out, "**Policy:** {verdict_line}");
        for reason in &verdict.reasons {
            let _ = writeln!(out, "- `{}`: {}", reason.rule, reason.explanation);
        }
    }

    if !record.approvals.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Approvals:**");
        for approval in &record.approvals {
            let _ = writeln!(
                out,
                "- {} ({}) at {}",
                approval.approver_identity,
                approval.scope,
                approval.granted_at.to_rfc3339()
            );
        }
    }

    if !record.validations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Validation:**");
        for result in &record.validations {
            let mark = if result.passed { "pass" } else { "FAIL" };
            let _ = writeln!(
                out,
                "- attempt {} action {} ({}): {mark} - {}",
                result.attempt, result.action_index, result.action_kind, result.detail
            );
        }
    }

    if !record.executions.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Execution:**");
        for exec in &record.executions {
            let status = match exec.status {
                ExecutionStatus::Pending => "pending",
                ExecutionStatus::Succeeded => "succeeded",
                ExecutionStatus::Failed => "failed",
                ExecutionStatus::RolledBack => "rolled back",
                ExecutionStatus::RollbackFailed => "rollback FAILED",
            };
            let detail = exec
                .error_detail
                .as_deref()
                .map(|d| format!(" - {d}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "- action {} ({}): {status}{detail}",
                exec.action_index, exec.action_kind
            );
        }
    }
}
