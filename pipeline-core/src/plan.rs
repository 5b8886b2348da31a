use crate::actions::{Action, FlagOp, FlagScope};
use crate::error::PipelineError;
use crate::incident::{Incident, Severity, SuspectedCause};
use crate::kb::{above_floor, AdvisorySnippet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanSource {
    Manual,
    Generated,
}

/// An ordered remediation proposal for one incident. A plan stays a proposal
/// until a verdict (and any required approvals) selects it as active.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub incident_id: String,
    pub actions: Vec<Action>,
    pub generated_at: DateTime<Utc>,
    pub source: PlanSource,
    pub rationale: String,
}

impl Plan {
    pub fn new(
        incident_id: &str,
        actions: Vec<Action>,
        source: PlanSource,
        rationale: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id: incident_id.to_string(),
            actions,
            generated_at,
            source,
            rationale: rationale.into(),
        }
    }

    /// Total declared blast radius across actions.
    pub fn blast_radius(&self) -> u32 {
        self.actions
            .iter()
            .fold(0u32, |acc, a| acc.saturating_add(a.blast_radius()))
    }

    pub fn has_irreversible_action(&self) -> bool {
        self.actions.iter().any(|a| !a.reversible())
    }
}

/// Maps incident characteristics to candidate plans via a deterministic
/// template catalogue; advisory snippets may add alternative reversible
/// candidates but are never trusted for safety decisions.
pub struct PlanGenerator {
    kb_min_score: f64,
}

impl PlanGenerator {
    pub fn new(kb_min_score: f64) -> Self {
        Self { kb_min_score }
    }

    pub fn generate(
        &self,
        incident: &Incident,
        advisory: Vec<AdvisorySnippet>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Plan>, PipelineError> {
        let service = incident.service.trim().to_string();
        if service.is_empty() {
            return Err(PipelineError::InvalidPlan {
                incident_id: incident.id.clone(),
                reason: "incident has no service".into(),
            });
        }

        let mut candidates: Vec<(Vec<Action>, String)> = Vec::new();
        match incident.suspected_cause {
            SuspectedCause::ErrorSpike => {
                candidates.push(rollback_template(&service));
                if incident.severity == Severity::High {
                    candidates.push(safe_mode_template(&service));
                }
            }
            SuspectedCause::LatencyDegradation => {
                candidates.push(scale_out_template(&service, incident.severity));
                candidates.push(restart_template(&service));
            }
            SuspectedCause::Mixed => {
                candidates.push(rollback_template(&service));
                candidates.push(scale_out_template(&service, incident.severity));
            }
        }

        for snippet in above_floor(advisory, self.kb_min_score) {
            if let Some(candidate) = candidate_from_snippet(&service, &snippet) {
                candidates.push(candidate);
            }
        }

        let mut plans = Vec::new();
        for (actions, rationale) in candidates {
            if let Some(reason) = actions.iter().find_map(|a| a.validate().err()) {
                tracing::warn!(
                    incident_id = %incident.id,
                    %reason,
                    "dropping candidate plan that failed schema validation"
                );
                continue;
            }
            if plans
                .iter()
                .any(|p: &Plan| p.actions == actions)
            {
                continue; // advisory duplicated a template
            }
            plans.push(Plan::new(
                &incident.id,
                actions,
                PlanSource::Generated,
                rationale,
                now,
            ));
        }

        if plans.is_empty() {
            return Err(PipelineError::InvalidPlan {
                incident_id: incident.id.clone(),
                reason: "no schema-valid candidate plan could be constructed".into(),
            });
        }
        Ok(plans)
    }
}

fn rollback_template(service: &str) -> (Vec<Action>, String) {
    (
        vec![
            Action::Rollback {
                service: service.into(),
                to_version: "previous".into(),
            },
            Action::Restart {
                targets: vec![service.into()],
            },
        ],
        "error spike suggests a bad deploy; roll back to last known good".into(),
    )
}

fn safe_mode_template(service: &str) -> (Vec<Action>, String) {
    (
        vec![Action::FeatureFlagToggle {
            key: format!("{service}.safe_mode"),
            op: FlagOp::Enable,
            scope: FlagScope::Service(service.into()),
        }],
        "disable risky paths for this service only, without global impact".into(),
    )
}

fn scale_out_template(service: &str, severity: Severity) -> (Vec<Action>, String) {
    let replicas = match severity {
        Severity::High => 3,
        _ => 2,
    };
    (
        vec![Action::Scale {
            service: service.into(),
            replicas,
        }],
        "latency degradation suggests saturation; add headroom".into(),
    )
}

fn restart_template(service: &str) -> (Vec<Action>, String) {
    (
        vec![Action::Restart {
            targets: vec![service.into()],
        }],
        "rolling restart to shed degraded workers".into(),
    )
}

/// Keyword mapping from opaque advisory text onto the fixed action catalogue.
/// Irreversible kinds (schema migrations) are never constructed from advisory
/// input.
fn candidate_from_snippet(service: &str, snippet: &AdvisorySnippet) -> Option<(Vec<Action>, String)> {
    let text = snippet.text.to_lowercase();
    let preview: String = snippet.text.chars().take(80).collect();
    let rationale = format!("advisory runbook (score {:.2}): {preview}", snippet.score);

    let actions = if text.contains("rollback") || text.contains("roll back") {
        vec![Action::Rollback {
            service: service.into(),
            to_version: "previous".into(),
        }]
    } else if text.contains("scale") {
        vec![Action::Scale {
            service: service.into(),
            replicas: 2,
        }]
    } else if text.contains("restart") {
        vec![Action::Restart {
            targets: vec![service.into()],
        }]
    } else if text.contains("feature flag") || text.contains("safe mode") {
        vec![Action::FeatureFlagToggle {
            key: format!("{service}.safe_mode"),
            op: FlagOp::Enable,
            scope: FlagScope::Service(service.into()),
        }]
    } else {
        return None;
    };
    Some((actions, rationale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::WindowStats;

    fn incident(severity: Severity, cause: SuspectedCause) -> Incident {
        Incident::open(
            severity,
            cause,
            WindowStats {
                service: "checkout".into(),
                environment: "prod".into(),
                error_rate_pct: 1.5,
                p95_ms: 400.0,
                window_duration_s: 120,
                sample_count: 4,
            },
            Utc::now(),
        )
    }

    #[test]
    fn error_spike_yields_rollback_first() {
        let plans = PlanGenerator::new(0.25)
            .generate(
                &incident(Severity::High, SuspectedCause::ErrorSpike),
                vec![],
                Utc::now(),
            )
            .expect("plans");
        assert_eq!(plans.len(), 2);
        assert!(matches!(plans[0].actions[0], Action::Rollback { .. }));
        assert!(matches!(
            plans[1].actions[0],
            Action::FeatureFlagToggle { .. }
        ));
        assert_eq!(plans[0].source, PlanSource::Generated);
    }

    #[test]
    fn latency_yields_scale_out() {
        let plans = PlanGenerator::new(0.25)
            .generate(
                &incident(Severity::Medium, SuspectedCause::LatencyDegradation),
                vec![],
                Utc::now(),
            )
            .expect("plans");
        assert!(matches!(
            plans[0].actions[0],
            Action::Scale { replicas: 2, .. }
        ));
    }

    #[test]
    fn advisory_below_floor_is_ignored() {
        let plans = PlanGenerator::new(0.25)
            .generate(
                &incident(Severity::Medium, SuspectedCause::LatencyDegradation),
                vec![AdvisorySnippet {
                    text: "rollback the deploy".into(),
                    score: 0.1,
                }],
                Utc::now(),
            )
            .expect("plans");
        assert!(!plans
            .iter()
            .any(|p| matches!(p.actions[0], Action::Rollback { .. })));
    }

    #[test]
    fn advisory_adds_reversible_candidate() {
        let plans = PlanGenerator::new(0.25)
            .generate(
                &incident(Severity::Medium, SuspectedCause::LatencyDegradation),
                vec![AdvisorySnippet {
                    text: "Rollback checkout to the previous release".into(),
                    score: 0.9,
                }],
                Utc::now(),
            )
            .expect("plans");
        assert!(plans
            .iter()
            .any(|p| matches!(p.actions[0], Action::Rollback { .. })));
    }

    #[test]
    fn advisory_never_introduces_schema_migrations() {
        let plans = PlanGenerator::new(0.25)
            .generate(
                &incident(Severity::High, SuspectedCause::Mixed),
                vec![AdvisorySnippet {
                    text: "run the schema migration to fix the index".into(),
                    score: 0.99,
                }],
                Utc::now(),
            )
            .expect("plans");
        assert!(!plans.iter().any(|p| p.has_irreversible_action()));
    }

    #[test]
    fn plan_blast_radius_sums_actions() {
        let plan = Plan::new(
            "inc-1",
            vec![
                Action::Restart {
                    targets: vec!["a".into(), "b".into()],
                },
                Action::Scale {
                    service: "a".into(),
                    replicas: 2,
                },
            ],
            PlanSource::Manual,
            "test",
            Utc::now(),
        );
        assert_eq!(plan.blast_radius(), 3);
    }
}
