use crate::error::PipelineError;
use crate::executor::{ExecutionOutcome, ExecutionRecord, ExecutionReport};
use crate::incident::{Incident, IncidentStatus, Severity};
use crate::plan::Plan;
use crate::policy::{Decision, Verdict};
use crate::validator::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Approval {
    pub plan_id: String,
    pub approver_identity: String,
    pub granted_at: DateTime<Utc>,
    pub scope: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanState {
    Proposed,
    /// Terminal: a denied verdict permanently blocks this plan.
    Denied,
    AwaitingApproval,
    Approved,
    Validated,
    Executing,
    Executed,
    Failed,
    /// Terminal: approvals did not arrive within the configured timeout.
    Expired,
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanState::Denied | PlanState::Executed | PlanState::Failed | PlanState::Expired
        )
    }

    /// States in which a plan occupies the incident's single active slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlanState::AwaitingApproval
                | PlanState::Approved
                | PlanState::Validated
                | PlanState::Executing
        )
    }
}

/// Everything the pipeline ever decided about one plan: verdicts, approvals,
/// validation attempts, and execution records, all append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan: Plan,
    pub verdicts: Vec<Verdict>,
    pub approvals: Vec<Approval>,
    pub validations: Vec<ValidationResult>,
    pub executions: Vec<ExecutionRecord>,
    pub state: PlanState,
    pub awaiting_since: Option<DateTime<Utc>>,
}

impl PlanRecord {
    fn new(plan: Plan) -> Self {
        Self {
            plan,
            verdicts: Vec::new(),
            approvals: Vec::new(),
            validations: Vec::new(),
            executions: Vec::new(),
            state: PlanState::Proposed,
            awaiting_since: None,
        }
    }

    pub fn effective_verdict(&self) -> Option<&Verdict> {
        self.verdicts.last()
    }

    pub fn required_approvals(&self) -> u32 {
        self.effective_verdict()
            .map(|v| v.required_approvals)
            .unwrap_or(0)
    }

    fn record_verdict(&mut self, verdict: Verdict) -> Result<PlanState, PipelineError> {
        if let Some(denied) = self
            .verdicts
            .iter()
            .find(|v| v.decision == Decision::Deny)
        {
            return Err(PipelineError::PolicyDenied {
                plan_id: self.plan.id.clone(),
                reasons: format!(
                    "denied verdict is permanent: {}",
                    denied.reason_summary()
                ),
            });
        }

        let evaluated_at = verdict.evaluated_at;
        let decision = verdict.decision;
        self.verdicts.push(verdict);
        match decision {
            Decision::Deny => {
                self.state = PlanState::Denied;
            }
            Decision::AllowWithApproval => {
                if self.state == PlanState::Proposed {
                    self.state = PlanState::AwaitingApproval;
                    self.awaiting_since = Some(evaluated_at);
                }
            }
            Decision::Allow => {
                if self.state == PlanState::Proposed {
                    self.state = PlanState::Approved;
                }
            }
        }
        Ok(self.state)
    }

    fn grant_approval(&mut self, approval: Approval) -> Result<PlanState, PipelineError> {
        if self.state == PlanState::Expired {
            return Err(PipelineError::ApprovalTimeout {
                plan_id: self.plan.id.clone(),
            });
        }
        if self.state != PlanState::AwaitingApproval {
            return Err(PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: format!("cannot approve a plan in state {:?}", self.state),
            });
        }
        // Approvals count distinct identities; one approver cannot satisfy
        // an elevated requirement alone.
        if self
            .approvals
            .iter()
            .any(|a| a.approver_identity == approval.approver_identity)
        {
            return Err(PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: format!(
                    "'{}' has already approved this plan",
                    approval.approver_identity
                ),
            });
        }
        self.approvals.push(approval);
        if self.approvals.len() as u32 >= self.required_approvals() {
            self.state = PlanState::Approved;
        }
        Ok(self.state)
    }

    fn record_validation_attempt(
        &mut self,
        results: Vec<ValidationResult>,
    ) -> Result<PlanState, PipelineError> {
        if self.state.is_terminal() || self.state == PlanState::Executing {
            return Err(PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: format!("cannot validate a plan in state {:?}", self.state),
            });
        }
        self.validations.extend(results);
        if self.state == PlanState::Approved && self.latest_attempt_passed() {
            self.state = PlanState::Validated;
        }
        Ok(self.state)
    }

    pub fn next_validation_attempt(&self) -> u32 {
        self.validations
            .iter()
            .map(|r| r.attempt)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Did the most recent dry-run attempt cover every action and pass?
    pub fn latest_attempt_passed(&self) -> bool {
        let Some(latest) = self.validations.iter().map(|r| r.attempt).max() else {
            return false;
        };
        let results: Vec<&ValidationResult> = self
            .validations
            .iter()
            .filter(|r| r.attempt == latest)
            .collect();
        results.len() == self.plan.actions.len() && results.iter().all(|r| r.passed)
    }

    /// The non-bypassable execution gate: a non-denied verdict, every
    /// required approval, and a fully passing latest dry-run.
    pub fn execution_eligible(&self) -> Result<(), PipelineError> {
        let verdict = self
            .effective_verdict()
            .ok_or_else(|| PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: "no verdict recorded".into(),
            })?;
        match verdict.decision {
            Decision::Deny => {
                return Err(PipelineError::PolicyDenied {
                    plan_id: self.plan.id.clone(),
                    reasons: verdict.reason_summary(),
                })
            }
            Decision::AllowWithApproval => {
                let have = self.approvals.len() as u32;
                let need = verdict.required_approvals;
                if have < need {
                    return Err(PipelineError::NotEligible {
                        plan_id: self.plan.id.clone(),
                        reason: format!("approvals {have} of {need} granted"),
                    });
                }
            }
            Decision::Allow => {}
        }
        if self.state == PlanState::Expired {
            return Err(PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: "plan expired awaiting approval".into(),
            });
        }
        if self.validations.is_empty() {
            return Err(PipelineError::NotEligible {
                plan_id: self.plan.id.clone(),
                reason: "no dry-run attempt recorded".into(),
            });
        }
        if !self.latest_attempt_passed() {
            return Err(PipelineError::ValidationFailed {
                plan_id: self.plan.id.clone(),
                detail: "latest dry-run attempt is incomplete or failing".into(),
            });
        }
        Ok(())
    }

    fn begin_execution(&mut self) -> Result<(), PipelineError> {
        self.execution_eligible()?;
        self.state = PlanState::Executing;
        Ok(())
    }

    fn finish_execution(&mut self, report: ExecutionReport) -> PlanState {
        self.executions.extend(report.records);
        self.state = match report.outcome {
            ExecutionOutcome::Completed => PlanState::Executed,
            ExecutionOutcome::Failed { .. } => PlanState::Failed,
        };
        self.state
    }

    fn expire_if_stale(&mut self, now: DateTime<Utc>, timeout_s: u64) -> bool {
        if self.state != PlanState::AwaitingApproval {
            return false;
        }
        let Some(since) = self.awaiting_since else {
            return false;
        };
        if (now - since).num_seconds() >= timeout_s as i64 {
            self.state = PlanState::Expired;
            true
        } else {
            false
        }
    }
}

/// One incident with its full decision trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncidentCase {
    pub incident: Incident,
    pub plans: Vec<PlanRecord>,
    pub clear_since: Option<DateTime<Utc>>,
}

impl IncidentCase {
    pub fn plan(&self, plan_id: &str) -> Option<&PlanRecord> {
        self.plans.iter().find(|p| p.plan.id == plan_id)
    }

    fn plan_mut(&mut self, plan_id: &str) -> Result<&mut PlanRecord, PipelineError> {
        self.plans
            .iter_mut()
            .find(|p| p.plan.id == plan_id)
            .ok_or_else(|| PipelineError::UnknownPlan(plan_id.to_string()))
    }

    pub fn active_plan(&self) -> Option<&PlanRecord> {
        self.plans.iter().find(|p| p.state.is_active())
    }

    pub fn mid_execution(&self) -> bool {
        self.plans.iter().any(|p| p.state == PlanState::Executing)
    }
}

#[derive(Clone, Debug)]
pub enum Observed {
    Opened(Incident),
    SeverityRaised {
        incident: Incident,
        previous: Severity,
    },
    /// Same or lower severity on an already-open incident: never a duplicate,
    /// never a silent downgrade.
    AlreadyOpen(String),
}

#[derive(Clone, Debug)]
pub enum ClearOutcome {
    NoOpenIncident,
    ClearanceStarted(String),
    /// Condition clear but not yet sustained long enough.
    Sustained { incident_id: String, remaining_s: u64 },
    /// Close refused while an action is mid-execution.
    BlockedMidExecution(String),
    Closed(Incident),
}

/// The single source of truth for "what happened and why": incidents keyed by
/// id, with per-(service, environment) uniqueness enforced under one lock.
pub struct CaseStore {
    clearance_s: u64,
    inner: Mutex<Inner>,
}

struct Inner {
    cases: HashMap<String, IncidentCase>,
    by_key: HashMap<(String, String), String>,
}

impl CaseStore {
    pub fn new(clearance_s: u64) -> Self {
        Self {
            clearance_s,
            inner: Mutex::new(Inner {
                cases: HashMap::new(),
                by_key: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a detection. At most one open incident per
    /// (service, environment); severity only ever upgrades.
    pub fn observe_detection(&self, candidate: Incident) -> Observed {
        let key = (candidate.service.clone(), candidate.environment.clone());
        let mut inner = self.lock();

        if let Some(id) = inner.by_key.get(&key).cloned() {
            if let Some(case) = inner.cases.get_mut(&id) {
                case.clear_since = None; // condition is active again
                if case.incident.status == IncidentStatus::ResolvedPendingVerification {
                    // The condition recurred after execution: back to Open so
                    // remaining candidate plans can be driven.
                    if case.incident.transition(IncidentStatus::Open).is_ok() {
                        tracing::debug!(incident_id = %id, "condition recurred, reopened");
                    }
                }
                if candidate.severity > case.incident.severity {
                    let previous = case.incident.severity;
                    case.incident.severity = candidate.severity;
                    case.incident.signal_snapshot = candidate.signal_snapshot;
                    return Observed::SeverityRaised {
                        incident: case.incident.clone(),
                        previous,
                    };
                }
            }
            return Observed::AlreadyOpen(id);
        }

        let id = candidate.id.clone();
        inner.by_key.insert(key, id.clone());
        inner.cases.insert(
            id,
            IncidentCase {
                incident: candidate.clone(),
                plans: Vec::new(),
                clear_since: None,
            },
        );
        Observed::Opened(candidate)
    }

    /// Register a healthy (or insufficient-data-free) cycle for a pair.
    /// Closure requires the condition to stay clear for the configured
    /// duration and no action mid-execution.
    pub fn observe_clear(
        &self,
        service: &str,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Result<ClearOutcome, PipelineError> {
        let key = (service.to_string(), environment.to_string());
        let mut inner = self.lock();
        let Some(id) = inner.by_key.get(&key).cloned() else {
            return Ok(ClearOutcome::NoOpenIncident);
        };
        let case = inner
            .cases
            .get_mut(&id)
            .ok_or_else(|| PipelineError::UnknownIncident(id.clone()))?;

        let since = match case.clear_since {
            Some(since) => since,
            None => {
                case.clear_since = Some(now);
                return Ok(ClearOutcome::ClearanceStarted(id));
            }
        };

        let elapsed = (now - since).num_seconds().max(0) as u64;
        if elapsed < self.clearance_s {
            return Ok(ClearOutcome::Sustained {
                incident_id: id,
                remaining_s: self.clearance_s - elapsed,
            });
        }

        if case.mid_execution() || case.incident.status == IncidentStatus::Mitigating {
            return Ok(ClearOutcome::BlockedMidExecution(id));
        }

        case.incident.transition(IncidentStatus::Closed)?;
        let closed = case.incident.clone();
        inner.by_key.remove(&key);
        Ok(ClearOutcome::Closed(closed))
    }

    pub fn add_plans(&self, incident_id: &str, plans: Vec<Plan>) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        case.plans.extend(plans.into_iter().map(PlanRecord::new));
        Ok(())
    }

    /// Record a verdict. A non-deny verdict claims the incident's single
    /// active slot; recording it while another plan is active is refused.
    pub fn record_verdict(
        &self,
        incident_id: &str,
        plan_id: &str,
        verdict: Verdict,
    ) -> Result<PlanState, PipelineError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;

        if verdict.decision != Decision::Deny {
            if let Some(active) = case.active_plan() {
                if active.plan.id != plan_id {
                    return Err(PipelineError::NotEligible {
                        plan_id: plan_id.to_string(),
                        reason: format!("plan {} is already active", active.plan.id),
                    });
                }
            }
        }
        case.plan_mut(plan_id)?.record_verdict(verdict)
    }

    pub fn grant_approval(
        &self,
        plan_id: &str,
        approver_identity: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, PlanState, u32), PipelineError> {
        let mut inner = self.lock();
        let incident_id = inner
            .cases
            .values()
            .find(|c| c.plans.iter().any(|p| p.plan.id == plan_id))
            .map(|c| c.incident.id.clone())
            .ok_or_else(|| PipelineError::UnknownPlan(plan_id.to_string()))?;

        let case = inner
            .cases
            .get_mut(&incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.clone()))?;
        let record = case.plan_mut(plan_id)?;
        let state = record.grant_approval(Approval {
            plan_id: plan_id.to_string(),
            approver_identity: approver_identity.to_string(),
            granted_at: now,
            scope: scope.to_string(),
        })?;
        let remaining = record
            .required_approvals()
            .saturating_sub(record.approvals.len() as u32);
        Ok((incident_id, state, remaining))
    }

    pub fn record_validation_attempt(
        &self,
        incident_id: &str,
        plan_id: &str,
        results: Vec<ValidationResult>,
    ) -> Result<PlanState, PipelineError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        case.plan_mut(plan_id)?.record_validation_attempt(results)
    }

    pub fn next_validation_attempt(
        &self,
        incident_id: &str,
        plan_id: &str,
    ) -> Result<u32, PipelineError> {
        let inner = self.lock();
        let case = inner
            .cases
            .get(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        case.plan(plan_id)
            .map(|p| p.next_validation_attempt())
            .ok_or_else(|| PipelineError::UnknownPlan(plan_id.to_string()))
    }

    /// Check the gate and move plan + incident into the executing states.
    pub fn begin_execution(&self, incident_id: &str, plan_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        case.plan_mut(plan_id)?.begin_execution()?;
        case.incident.transition(IncidentStatus::Mitigating)?;
        Ok(())
    }

    pub fn finish_execution(
        &self,
        incident_id: &str,
        plan_id: &str,
        report: ExecutionReport,
    ) -> Result<(PlanState, IncidentStatus), PipelineError> {
        let mut inner = self.lock();
        let case = inner
            .cases
            .get_mut(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        let plan_state = case.plan_mut(plan_id)?.finish_execution(report);
        let next_status = match plan_state {
            PlanState::Executed => IncidentStatus::ResolvedPendingVerification,
            _ => IncidentStatus::Open,
        };
        case.incident.transition(next_status)?;
        Ok((plan_state, case.incident.status))
    }

    /// Move stale awaiting-approval plans to Expired (denied-expired).
    pub fn expire_stale(&self, now: DateTime<Utc>, timeout_s: u64) -> Vec<(String, String)> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        for case in inner.cases.values_mut() {
            for record in &mut case.plans {
                if record.expire_if_stale(now, timeout_s) {
                    expired.push((case.incident.id.clone(), record.plan.id.clone()));
                }
            }
        }
        expired
    }

    pub fn case(&self, incident_id: &str) -> Option<IncidentCase> {
        self.lock().cases.get(incident_id).cloned()
    }

    pub fn incident(&self, incident_id: &str) -> Option<Incident> {
        self.lock()
            .cases
            .get(incident_id)
            .map(|c| c.incident.clone())
    }

    pub fn open_incident_ids(&self) -> Vec<String> {
        let inner = self.lock();
        inner.by_key.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::incident::SuspectedCause;
    use crate::plan::PlanSource;
    use crate::policy::Reason;
    use crate::signals::WindowStats;
    use chrono::Duration;

    fn stats(service: &str, environment: &str) -> WindowStats {
        WindowStats {
            service: service.into(),
            environment: environment.into(),
            error_rate_pct: 1.5,
            p95_ms: 400.0,
            window_duration_s: 120,
            sample_count: 4,
        }
    }

    fn incident(service: &str, environment: &str, severity: Severity) -> Incident {
        Incident::open(
            severity,
            SuspectedCause::ErrorSpike,
            stats(service, environment),
            Utc::now(),
        )
    }

    fn plan_for(incident: &Incident) -> Plan {
        Plan::new(
            &incident.id,
            vec![Action::Rollback {
                service: incident.service.clone(),
                to_version: "previous".into(),
            }],
            PlanSource::Generated,
            "test",
            Utc::now(),
        )
    }

    fn verdict(plan: &Plan, decision: Decision, required: u32) -> Verdict {
        Verdict {
            plan_id: plan.id.clone(),
            decision,
            reasons: vec![Reason {
                rule: "test".into(),
                explanation: "test".into(),
            }],
            required_approvals: required,
            evaluated_at: Utc::now(),
        }
    }

    fn passing_validation(plan: &Plan, attempt: u32) -> Vec<ValidationResult> {
        plan.actions
            .iter()
            .enumerate()
            .map(|(i, a)| ValidationResult {
                action_index: i,
                action_kind: a.kind().to_string(),
                attempt,
                passed: true,
                detail: "ok".into(),
                executed_at: Utc::now(),
            })
            .collect()
    }

    fn completed_report(plan: &Plan) -> ExecutionReport {
        ExecutionReport {
            plan_id: plan.id.clone(),
            records: vec![],
            outcome: ExecutionOutcome::Completed,
        }
    }

    #[test]
    fn at_most_one_open_incident_per_pair() {
        let store = CaseStore::new(300);
        let first = store.observe_detection(incident("checkout", "prod", Severity::Medium));
        let second = store.observe_detection(incident("checkout", "prod", Severity::Medium));
        let other_env = store.observe_detection(incident("checkout", "staging", Severity::Medium));

        assert!(matches!(first, Observed::Opened(_)));
        assert!(matches!(second, Observed::AlreadyOpen(_)));
        assert!(matches!(other_env, Observed::Opened(_)));
    }

    #[test]
    fn severity_upgrades_but_never_downgrades() {
        let store = CaseStore::new(300);
        store.observe_detection(incident("checkout", "prod", Severity::Medium));

        let upgraded = store.observe_detection(incident("checkout", "prod", Severity::High));
        match upgraded {
            Observed::SeverityRaised { incident, previous } => {
                assert_eq!(previous, Severity::Medium);
                assert_eq!(incident.severity, Severity::High);
            }
            other => panic!("expected upgrade, got {other:?}"),
        }

        // A weaker detection never downgrades the open incident.
        let weaker = store.observe_detection(incident("checkout", "prod", Severity::Medium));
        assert!(matches!(weaker, Observed::AlreadyOpen(_)));
    }

    #[test]
    fn denied_verdict_is_permanent() {
        let store = CaseStore::new(300);
        let inc = incident("checkout", "prod", Severity::High);
        let Observed::Opened(inc) = store.observe_detection(inc) else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");

        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::Deny, 0))
            .expect("deny records");
        let again = store.record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::Allow, 0));
        assert!(matches!(again, Err(PipelineError::PolicyDenied { .. })));
    }

    #[test]
    fn execution_gate_requires_verdict_approvals_and_validation() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "prod", Severity::High))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");

        // No verdict yet.
        assert!(store.begin_execution(&inc.id, &plan.id).is_err());

        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::AllowWithApproval, 2))
            .expect("verdict");
        // Approvals missing.
        assert!(store.begin_execution(&inc.id, &plan.id).is_err());

        store
            .grant_approval(&plan.id, "alice", "incident", Utc::now())
            .expect("first approval");
        assert!(store.begin_execution(&inc.id, &plan.id).is_err());
        let (_, state, remaining) = store
            .grant_approval(&plan.id, "bob", "incident", Utc::now())
            .expect("second approval");
        assert_eq!(state, PlanState::Approved);
        assert_eq!(remaining, 0);

        // Validation missing.
        assert!(store.begin_execution(&inc.id, &plan.id).is_err());
        store
            .record_validation_attempt(&inc.id, &plan.id, passing_validation(&plan, 1))
            .expect("validation");

        store.begin_execution(&inc.id, &plan.id).expect("eligible now");
        let (plan_state, status) = store
            .finish_execution(&inc.id, &plan.id, completed_report(&plan))
            .expect("finish");
        assert_eq!(plan_state, PlanState::Executed);
        assert_eq!(status, IncidentStatus::ResolvedPendingVerification);
    }

    #[test]
    fn repeat_approver_does_not_satisfy_elevated_count() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "prod", Severity::High))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");
        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::AllowWithApproval, 2))
            .expect("verdict");

        store
            .grant_approval(&plan.id, "alice", "incident", Utc::now())
            .expect("first approval");
        let repeat = store.grant_approval(&plan.id, "alice", "incident", Utc::now());
        assert!(matches!(repeat, Err(PipelineError::NotEligible { .. })));

        let case = store.case(&inc.id).expect("case");
        let record = case.plan(&plan.id).expect("plan");
        assert_eq!(record.state, PlanState::AwaitingApproval);
        assert_eq!(record.approvals.len(), 1);

        let (_, state, remaining) = store
            .grant_approval(&plan.id, "bob", "incident", Utc::now())
            .expect("distinct second approver");
        assert_eq!(state, PlanState::Approved);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn failed_validation_blocks_execution() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "staging", Severity::Medium))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");
        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::Allow, 0))
            .expect("verdict");

        let mut failing = passing_validation(&plan, 1);
        failing[0].passed = false;
        store
            .record_validation_attempt(&inc.id, &plan.id, failing)
            .expect("attempt recorded");
        let blocked = store.begin_execution(&inc.id, &plan.id);
        assert!(matches!(
            blocked,
            Err(PipelineError::ValidationFailed { .. })
        ));

        // A later passing attempt unblocks.
        store
            .record_validation_attempt(&inc.id, &plan.id, passing_validation(&plan, 2))
            .expect("retry");
        store.begin_execution(&inc.id, &plan.id).expect("eligible");
    }

    #[test]
    fn second_plan_cannot_go_active_while_first_is() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "staging", Severity::Medium))
        else {
            panic!("expected open");
        };
        let plan_a = plan_for(&inc);
        let plan_b = plan_for(&inc);
        store
            .add_plans(&inc.id, vec![plan_a.clone(), plan_b.clone()])
            .expect("add");

        store
            .record_verdict(&inc.id, &plan_a.id, verdict(&plan_a, Decision::Allow, 0))
            .expect("first active");
        let second = store.record_verdict(&inc.id, &plan_b.id, verdict(&plan_b, Decision::Allow, 0));
        assert!(matches!(second, Err(PipelineError::NotEligible { .. })));

        // Denying the second plan is still fine.
        store
            .record_verdict(&inc.id, &plan_b.id, verdict(&plan_b, Decision::Deny, 0))
            .expect("deny is not active");
    }

    #[test]
    fn awaiting_plans_expire_after_timeout() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "prod", Severity::High))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");
        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::AllowWithApproval, 1))
            .expect("verdict");

        let later = Utc::now() + Duration::seconds(901);
        let expired = store.expire_stale(later, 900);
        assert_eq!(expired, vec![(inc.id.clone(), plan.id.clone())]);

        // Expired plans refuse approvals and execution.
        let late = store.grant_approval(&plan.id, "alice", "incident", later);
        assert!(matches!(late, Err(PipelineError::ApprovalTimeout { .. })));
        assert!(store.begin_execution(&inc.id, &plan.id).is_err());
    }

    #[test]
    fn sustained_clearance_closes_the_incident() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "prod", Severity::Medium))
        else {
            panic!("expected open");
        };

        let t0 = Utc::now();
        let started = store.observe_clear("checkout", "prod", t0).expect("clear");
        assert!(matches!(started, ClearOutcome::ClearanceStarted(_)));

        let early = store
            .observe_clear("checkout", "prod", t0 + Duration::seconds(100))
            .expect("clear");
        assert!(matches!(early, ClearOutcome::Sustained { .. }));

        let done = store
            .observe_clear("checkout", "prod", t0 + Duration::seconds(301))
            .expect("clear");
        match done {
            ClearOutcome::Closed(closed) => {
                assert_eq!(closed.id, inc.id);
                assert_eq!(closed.status, IncidentStatus::Closed);
            }
            other => panic!("expected close, got {other:?}"),
        }

        // The pair is free for a fresh incident afterwards.
        let reopened = store.observe_detection(incident("checkout", "prod", Severity::Medium));
        assert!(matches!(reopened, Observed::Opened(_)));
    }

    #[test]
    fn detection_resets_clearance_timer() {
        let store = CaseStore::new(300);
        store.observe_detection(incident("checkout", "prod", Severity::Medium));

        let t0 = Utc::now();
        store.observe_clear("checkout", "prod", t0).expect("clear");
        // Condition comes back: the timer must restart.
        store.observe_detection(incident("checkout", "prod", Severity::Medium));

        let outcome = store
            .observe_clear("checkout", "prod", t0 + Duration::seconds(400))
            .expect("clear");
        assert!(matches!(outcome, ClearOutcome::ClearanceStarted(_)));
    }

    #[test]
    fn recurrence_after_execution_reopens() {
        let store = CaseStore::new(300);
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "staging", Severity::Medium))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");
        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::Allow, 0))
            .expect("verdict");
        store
            .record_validation_attempt(&inc.id, &plan.id, passing_validation(&plan, 1))
            .expect("validation");
        store.begin_execution(&inc.id, &plan.id).expect("executing");
        store
            .finish_execution(&inc.id, &plan.id, completed_report(&plan))
            .expect("finish");

        let observed = store.observe_detection(incident("checkout", "staging", Severity::Medium));
        assert!(matches!(observed, Observed::AlreadyOpen(_)));
        let case = store.case(&inc.id).expect("case");
        assert_eq!(case.incident.status, IncidentStatus::Open);
    }

    #[test]
    fn close_is_blocked_mid_execution() {
        let store = CaseStore::new(0); // close eligible immediately once clear twice
        let Observed::Opened(inc) =
            store.observe_detection(incident("checkout", "staging", Severity::Medium))
        else {
            panic!("expected open");
        };
        let plan = plan_for(&inc);
        store.add_plans(&inc.id, vec![plan.clone()]).expect("add");
        store
            .record_verdict(&inc.id, &plan.id, verdict(&plan, Decision::Allow, 0))
            .expect("verdict");
        store
            .record_validation_attempt(&inc.id, &plan.id, passing_validation(&plan, 1))
            .expect("validation");
        store.begin_execution(&inc.id, &plan.id).expect("executing");

        let t0 = Utc::now();
        store.observe_clear("checkout", "staging", t0).expect("clear");
        let blocked = store
            .observe_clear("checkout", "staging", t0 + Duration::seconds(1))
            .expect("clear");
        assert!(matches!(blocked, ClearOutcome::BlockedMidExecution(_)));

        store
            .finish_execution(&inc.id, &plan.id, completed_report(&plan))
            .expect("finish");
        let closed = store
            .observe_clear("checkout", "staging", t0 + Duration::seconds(2))
            .expect("clear");
        assert!(matches!(closed, ClearOutcome::Closed(_)));
    }
}
