use crate::config::PolicyConfig;
use crate::incident::{Incident, Severity};
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    AllowWithApproval,
    Deny,
}

/// One (rule, explanation) pair. Reasons are ordered by rule evaluation order
/// and sufficient to reconstruct the decision without re-running code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub rule: String,
    pub explanation: String,
}

impl Reason {
    fn new(rule: &str, explanation: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            explanation: explanation.into(),
        }
    }
}

/// Immutable audit artifact. Never mutated after creation; re-evaluation
/// produces a new verdict, and a deny permanently blocks its plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verdict {
    pub plan_id: String,
    pub decision: Decision,
    pub reasons: Vec<Reason>,
    /// Approvals needed before execution; zero when decision is Allow.
    pub required_approvals: u32,
    pub evaluated_at: DateTime<Utc>,
}

impl Verdict {
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(|r| format!("{}: {}", r.rule, r.explanation))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Evaluates candidate plans against the guardrail rules.
///
/// Hard safety violations deny immediately, before any approval-gating rule
/// is considered, so a plan can never accumulate approvals that paper over a
/// hard violation. Evaluation is a pure function of (plan, incident, config,
/// now).
pub struct PolicyGuard {
    config: PolicyConfig,
}

impl PolicyGuard {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, plan: &Plan, incident: &Incident, now: DateTime<Utc>) -> Verdict {
        let c = &self.config;
        let environment = incident.environment.to_lowercase();
        let is_prod = c.is_prod(&environment);

        // Hard denials, first wins.
        if !c.env_allowlist.contains(&environment) {
            return self.deny(
                plan,
                now,
                Reason::new(
                    "env-not-allowlisted",
                    format!(
                        "environment '{environment}' is not in allowlist {:?}",
                        c.env_allowlist
                    ),
                ),
            );
        }

        if is_prod && c.block_global_ff_in_prod {
            if let Some(action) = plan.actions.iter().find(|a| a.is_global_flag()) {
                return self.deny(
                    plan,
                    now,
                    Reason::new(
                        "global-ff-in-prod",
                        format!(
                            "global feature-flag action '{}' is blocked in production",
                            action.describe()
                        ),
                    ),
                );
            }
        }

        if is_prod && plan.blast_radius() > c.max_targets_prod {
            return self.deny(
                plan,
                now,
                Reason::new(
                    "blast-radius-exceeded",
                    format!(
                        "declared blast radius {} exceeds production limit {}",
                        plan.blast_radius(),
                        c.max_targets_prod
                    ),
                ),
            );
        }

        if c.require_backup_for_schema {
            if let Some(action) = plan
                .actions
                .iter()
                .find(|a| a.is_schema_migration() && a.backup_attestation().is_none())
            {
                return self.deny(
                    plan,
                    now,
                    Reason::new(
                        "backup-required",
                        format!(
                            "schema migration '{}' has no backup attestation",
                            action.describe()
                        ),
                    ),
                );
            }
        }

        // Approval-gating rules accumulate.
        let mut reasons = Vec::new();
        let mut elevated = false;

        if is_prod && c.in_peak(now.time()) {
            reasons.push(Reason::new(
                "peak-window",
                format!(
                    "inside peak window {}-{} in production",
                    c.peak_start, c.peak_end
                ),
            ));
        }

        let sensitive_hit = plan.actions.iter().find_map(|a| {
            if a.is_global() && !c.sensitive_services.is_empty() {
                return Some("global action reaches sensitive services".to_string());
            }
            a.declared_services()
                .iter()
                .find(|s| c.sensitive_services.contains(&s.to_lowercase()))
                .map(|s| format!("action '{}' targets sensitive service '{s}'", a.describe()))
        });
        if let Some(explanation) = sensitive_hit {
            reasons.push(Reason::new("sensitive-service", explanation));
            elevated = true;
        }

        if c.require_approval_for_writes && plan.has_irreversible_action() {
            reasons.push(Reason::new(
                "write-approval",
                "plan contains a non-reversible action",
            ));
        }

        if reasons.is_empty() {
            return Verdict {
                plan_id: plan.id.clone(),
                decision: Decision::Allow,
                reasons: vec![Reason::new("allow", "no guardrail rule matched")],
                required_approvals: 0,
                evaluated_at: now,
            };
        }

        if incident.severity == Severity::High && is_prod {
            elevated = true;
        }
        let required = if elevated {
            c.approvals_required_elevated
        } else {
            c.approvals_required
        };

        Verdict {
            plan_id: plan.id.clone(),
            decision: Decision::AllowWithApproval,
            reasons,
            required_approvals: required.max(1),
            evaluated_at: now,
        }
    }

    fn deny(&self, plan: &Plan, now: DateTime<Utc>, reason: Reason) -> Verdict {
        Verdict {
            plan_id: plan.id.clone(),
            decision: Decision::Deny,
            reasons: vec![reason],
            required_approvals: 0,
            evaluated_at: now,
        }
    }
}
