use crate::audit::{AuditEvent, AuditKind, AuditLog};
use crate::backend::ExecutionBackend;
use crate::config::PipelineConfig;
use crate::detector::Detector;
use crate::error::PipelineError;
use crate::executor::{ExecutionOutcome, ExecutionStatus, Executor};
use crate::incident::{Incident, IncidentStatus};
use crate::kb::KnowledgeBase;
use crate::notify::{Notifier, NotifyEvent};
use crate::plan::{Plan, PlanGenerator};
use crate::policy::{Decision, PolicyGuard};
use crate::signals::{SignalSample, SignalWindow};
use crate::state::{CaseStore, ClearOutcome, IncidentCase, Observed, PlanState};
use crate::validator::Validator;
use chrono::{DateTime, Utc};
use std::sync::{mpsc, Arc};

/// Inbound events for the single-threaded decision loop. Samples and
/// approvals arrive from the ingestion surface; ticks drive evaluation.
pub enum PipelineEvent {
    Sample(SignalSample),
    Approval {
        plan_id: String,
        approver_identity: String,
        scope: String,
    },
    Tick,
}

/// Owns the whole decision path: windowing, detection, plan generation,
/// policy, validation, execution, and the audit trail. All state mutation
/// happens on the loop thread; the ingestion surface reads through shared
/// handles.
pub struct Pipeline {
    config: PipelineConfig,
    window: Arc<SignalWindow>,
    detector: Detector,
    generator: PlanGenerator,
    guard: PolicyGuard,
    store: Arc<CaseStore>,
    audit: AuditLog,
    kb: Box<dyn KnowledgeBase>,
    backend: Box<dyn ExecutionBackend>,
    notifier: Box<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        kb: Box<dyn KnowledgeBase>,
        backend: Box<dyn ExecutionBackend>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, PipelineError> {
        let audit = AuditLog::open(&config.audit_db_path)?;
        Ok(Self {
            window: Arc::new(SignalWindow::new(
                config.detector.retention_s,
                config.detector.min_window_s,
            )),
            detector: Detector::new(config.detector.clone()),
            generator: PlanGenerator::new(config.kb_min_score),
            guard: PolicyGuard::new(config.policy.clone()),
            store: Arc::new(CaseStore::new(config.clearance_s)),
            audit,
            kb,
            backend,
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn window(&self) -> Arc<SignalWindow> {
        Arc::clone(&self.window)
    }

    pub fn store(&self) -> Arc<CaseStore> {
        Arc::clone(&self.store)
    }

    pub fn audit(&self) -> AuditLog {
        self.audit.clone()
    }

    /// Blocking event loop; returns when every sender is gone.
    pub fn run(&self, rx: mpsc::Receiver<PipelineEvent>) {
        while let Ok(event) = rx.recv() {
            if let Err(err) = self.handle(event, Utc::now()) {
                if err.is_defer() {
                    tracing::debug!(%err, "evaluation deferred");
                } else {
                    tracing::error!(%err, "pipeline event failed");
                }
            }
        }
        tracing::info!("event channel closed, pipeline stopping");
    }

    pub fn handle(&self, event: PipelineEvent, now: DateTime<Utc>) -> Result<(), PipelineError> {
        match event {
            PipelineEvent::Sample(sample) => {
                self.window.record(sample);
                Ok(())
            }
            PipelineEvent::Approval {
                plan_id,
                approver_identity,
                scope,
            } => self.handle_approval(&plan_id, &approver_identity, &scope, now),
            PipelineEvent::Tick => self.tick_at(now),
        }
    }

    /// One evaluation cycle: expire stale approvals, then re-judge every
    /// tracked (service, environment) pair against its current window.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<(), PipelineError> {
        for (incident_id, plan_id) in self
            .store
            .expire_stale(now, self.config.approval_timeout_s)
        {
            self.audit.append(&AuditEvent::new(
                &incident_id,
                AuditKind::PlanExpired,
                format!(
                    "plan {plan_id} expired after {}s awaiting approval",
                    self.config.approval_timeout_s
                ),
                None,
            ))?;
            self.notifier.notify(&NotifyEvent::plan(
                &incident_id,
                &plan_id,
                "plan expired",
                "approvals did not arrive in time; a fresh plan is required",
            ));
        }

        for (service, environment) in self.window.tracked() {
            if let Err(err) = self.evaluate_pair(&service, &environment, now) {
                if err.is_defer() {
                    tracing::debug!(%service, %environment, %err, "not enough signal yet");
                } else {
                    tracing::warn!(%service, %environment, %err, "pair evaluation failed");
                }
            }
        }
        Ok(())
    }

    fn evaluate_pair(
        &self,
        service: &str,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let stats = self.window.snapshot_at(service, environment, now)?;

        let Some(detection) = self.detector.classify(&stats) else {
            match self.store.observe_clear(service, environment, now)? {
                ClearOutcome::Closed(incident) => {
                    self.audit.append(&AuditEvent::new(
                        &incident.id,
                        AuditKind::IncidentClosed,
                        format!(
                            "condition clear for {}s, incident closed",
                            self.config.clearance_s
                        ),
                        None,
                    ))?;
                    self.notifier.notify(&NotifyEvent::incident(
                        &incident.id,
                        "incident closed",
                        format!("{service}/{environment} healthy again"),
                    ));
                }
                ClearOutcome::BlockedMidExecution(id) => {
                    tracing::debug!(incident_id = %id, "clearance reached but execution in flight");
                }
                _ => {}
            }
            return Ok(());
        };

        let candidate = Incident::open(detection.severity, detection.suspected_cause, stats, now);
        let incident_id = match self.store.observe_detection(candidate) {
            Observed::Opened(incident) => {
                self.audit.append(&AuditEvent::new(
                    &incident.id,
                    AuditKind::IncidentOpened,
                    format!(
                        "{:?} {:?} on {service}/{environment}",
                        incident.severity, incident.suspected_cause
                    ),
                    Some(serde_json::to_value(&incident.signal_snapshot)?),
                ))?;
                self.notifier.notify(&NotifyEvent::incident(
                    &incident.id,
                    "incident opened",
                    format!("{:?} on {service}/{environment}", incident.severity),
                ));
                incident.id
            }
            Observed::SeverityRaised { incident, previous } => {
                self.audit.append(&AuditEvent::new(
                    &incident.id,
                    AuditKind::SeverityRaised,
                    format!("{previous:?} -> {:?}", incident.severity),
                    Some(serde_json::to_value(&incident.signal_snapshot)?),
                ))?;
                self.notifier.notify(&NotifyEvent::incident(
                    &incident.id,
                    "severity raised",
                    format!("{previous:?} -> {:?}", incident.severity),
                ));
                incident.id
            }
            Observed::AlreadyOpen(id) => id,
        };

        self.advance(&incident_id, now)
    }

    /// Drive an open incident as far as its gates allow: propose plans, take
    /// verdicts, validate, and execute once eligible.
    fn advance(&self, incident_id: &str, now: DateTime<Utc>) -> Result<(), PipelineError> {
        let Some(case) = self.store.case(incident_id) else {
            return Ok(());
        };
        if case.incident.status != IncidentStatus::Open {
            return Ok(());
        }

        // Propose on first contact, and again once every prior plan has hit a
        // terminal state while the condition still fires, so an incident whose
        // plans all expired gets a fresh approval window.
        if case.plans.iter().all(|p| p.state.is_terminal()) {
            self.propose_plans(&case, now)?;
        }

        let case = self
            .store
            .case(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;

        if case.active_plan().is_none() {
            self.take_verdicts(&case, now)?;
        }

        let case = self
            .store
            .case(incident_id)
            .ok_or_else(|| PipelineError::UnknownIncident(incident_id.to_string()))?;
        let Some(active) = case.active_plan() else {
            return Ok(());
        };

        match active.state {
            PlanState::Approved => {
                let plan = active.plan.clone();
                let attempt = active.next_validation_attempt();
                if self.validate(incident_id, &plan, attempt, now)? {
                    self.execute(incident_id, &plan)?;
                }
            }
            PlanState::Validated => {
                let plan = active.plan.clone();
                self.execute(incident_id, &plan)?;
            }
            // AwaitingApproval waits for the approval surface; Executing is
            // synchronous and never observed here.
            _ => {}
        }
        Ok(())
    }

    fn propose_plans(&self, case: &IncidentCase, now: DateTime<Utc>) -> Result<(), PipelineError> {
        let incident = &case.incident;
        let query = format!("{} {:?}", incident.service, incident.suspected_cause);
        let advisory = self.kb.retrieve(&query, self.config.kb_top_k);

        let candidates = match self.generator.generate(incident, advisory, now) {
            Ok(plans) => plans,
            Err(err) => {
                tracing::warn!(incident_id = %incident.id, %err, "no candidate plan");
                return Ok(());
            }
        };

        // Denied and failed action sets are not re-proposed: the guard is
        // deterministic, and a failed live run needs a different remedy.
        // Expired plans may return as fresh instances for a new window.
        let plans: Vec<Plan> = candidates
            .into_iter()
            .filter(|candidate| {
                !case.plans.iter().any(|p| {
                    matches!(p.state, PlanState::Denied | PlanState::Failed)
                        && p.plan.actions == candidate.actions
                })
            })
            .collect();
        if plans.is_empty() {
            return Ok(());
        }

        for plan in &plans {
            self.audit.append(&AuditEvent::new(
                &incident.id,
                AuditKind::PlanProposed,
                format!("plan {} with {} action(s)", plan.id, plan.actions.len()),
                Some(serde_json::to_value(plan)?),
            ))?;
        }
        self.store.add_plans(&incident.id, plans)
    }

    /// Evaluate proposed plans in order until one becomes active or all are
    /// denied. A deny is recorded and audited, then the next candidate runs.
    fn take_verdicts(
        &self,
        case: &IncidentCase,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let incident_id = &case.incident.id;
        for record in case.plans.iter().filter(|p| p.state == PlanState::Proposed) {
            let verdict = self.guard.evaluate(&record.plan, &case.incident, now);
            let decision = verdict.decision;
            let summary = verdict.reason_summary();
            let details = serde_json::to_value(&verdict)?;

            self.store
                .record_verdict(incident_id, &record.plan.id, verdict)?;
            self.audit.append(&AuditEvent::new(
                incident_id,
                AuditKind::VerdictRecorded,
                format!("plan {}: {decision:?} ({summary})", record.plan.id),
                Some(details),
            ))?;

            match decision {
                Decision::Deny => {
                    self.audit.append(&AuditEvent::new(
                        incident_id,
                        AuditKind::PlanRejected,
                        format!("plan {} denied: {summary}", record.plan.id),
                        None,
                    ))?;
                    self.notifier.notify(&NotifyEvent::plan(
                        incident_id,
                        &record.plan.id,
                        "plan denied",
                        summary,
                    ));
                }
                Decision::AllowWithApproval => {
                    self.notifier.notify(&NotifyEvent::plan(
                        incident_id,
                        &record.plan.id,
                        "approval required",
                        summary,
                    ));
                    break;
                }
                Decision::Allow => break,
            }
        }
        Ok(())
    }

    fn validate(
        &self,
        incident_id: &str,
        plan: &Plan,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        let results = Validator::dry_run(plan, self.backend.as_ref(), attempt, now);
        let passed = Validator::all_passed(&results);
        let details = serde_json::to_value(&results)?;
        self.store
            .record_validation_attempt(incident_id, &plan.id, results)?;
        self.audit.append(&AuditEvent::new(
            incident_id,
            AuditKind::ValidationRecorded,
            format!(
                "plan {} dry-run attempt {attempt}: {}",
                plan.id,
                if passed { "passed" } else { "failed" }
            ),
            Some(details),
        ))?;
        if !passed {
            self.notifier.notify(&NotifyEvent::plan(
                incident_id,
                &plan.id,
                "validation failed",
                "dry-run diverged from declared outcomes; plan blocked",
            ));
        }
        Ok(passed)
    }

    fn execute(&self, incident_id: &str, plan: &Plan) -> Result<(), PipelineError> {
        self.store.begin_execution(incident_id, &plan.id)?;
        self.audit.append(&AuditEvent::new(
            incident_id,
            AuditKind::ExecutionStarted,
            format!("plan {} executing {} action(s)", plan.id, plan.actions.len()),
            None,
        ))?;

        let report = Executor::execute(plan, self.backend.as_ref());
        let failure = match report.outcome {
            ExecutionOutcome::Failed { failed_index, .. } => report
                .records
                .iter()
                .find(|r| {
                    r.action_index == failed_index && r.status == ExecutionStatus::Failed
                })
                .map(|r| PipelineError::ActionExecutionFailed {
                    plan_id: plan.id.clone(),
                    index: failed_index,
                    kind: r.action_kind.clone(),
                    detail: r.error_detail.clone().unwrap_or_default(),
                }),
            ExecutionOutcome::Completed => None,
        };

        for record in &report.records {
            let kind = match record.status {
                ExecutionStatus::RolledBack | ExecutionStatus::RollbackFailed => {
                    AuditKind::RollbackAttempted
                }
                _ => AuditKind::ActionExecuted,
            };
            self.audit.append(&AuditEvent::new(
                incident_id,
                kind,
                format!(
                    "action {} ({}): {:?}",
                    record.action_index, record.action_kind, record.status
                ),
                Some(serde_json::to_value(record)?),
            ))?;
        }

        let (plan_state, status) = self
            .store
            .finish_execution(incident_id, &plan.id, report)?;
        match plan_state {
            PlanState::Executed => {
                self.audit.append(&AuditEvent::new(
                    incident_id,
                    AuditKind::PlanExecuted,
                    format!("plan {} completed", plan.id),
                    None,
                ))?;
                self.audit.append(&AuditEvent::new(
                    incident_id,
                    AuditKind::IncidentResolved,
                    format!("awaiting sustained clearance, status {status:?}"),
                    None,
                ))?;
                self.notifier.notify(&NotifyEvent::plan(
                    incident_id,
                    &plan.id,
                    "plan executed",
                    "all actions succeeded, awaiting signal clearance",
                ));
            }
            PlanState::Failed => {
                self.audit.append(&AuditEvent::new(
                    incident_id,
                    AuditKind::PlanFailed,
                    format!("plan {} failed, incident back to {status:?}", plan.id),
                    None,
                ))?;
                self.notifier.notify(&NotifyEvent::plan(
                    incident_id,
                    &plan.id,
                    "plan failed",
                    "an action failed during execution, see audit trail",
                ));
            }
            _ => {}
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn handle_approval(
        &self,
        plan_id: &str,
        approver_identity: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let (incident_id, state, remaining) =
            self.store
                .grant_approval(plan_id, approver_identity, scope, now)?;
        self.audit.append(&AuditEvent::new(
            &incident_id,
            AuditKind::ApprovalGranted,
            format!("{approver_identity} approved plan {plan_id}, {remaining} remaining"),
            Some(serde_json::json!({
                "approver": approver_identity,
                "scope": scope,
                "remaining": remaining,
            })),
        ))?;

        if state == PlanState::Approved {
            self.advance(&incident_id, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::kb::NullKnowledgeBase;
    use crate::notify::LogNotifier;
    use chrono::TimeZone;

    // Midday UTC, inside the default peak window, so production plans gate
    // on approvals in these scenarios.
    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_050_000 + secs, 0).unwrap()
    }

    fn sample(
        service: &str,
        environment: &str,
        secs: i64,
        errors: u64,
        requests: u64,
        p95: f64,
    ) -> SignalSample {
        SignalSample {
            service: service.into(),
            environment: environment.into(),
            timestamp: at(secs),
            error_count: errors,
            request_count: requests,
            latency_p95_ms: p95,
        }
    }

    fn pipeline(name: &str) -> Pipeline {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let config = PipelineConfig {
            audit_db_path: format!("/tmp/pipeline-tests/{name}-{nanos}.db"),
            clearance_s: 5,
            ..PipelineConfig::default()
        };
        Pipeline::new(
            config,
            Box::new(NullKnowledgeBase),
            Box::new(SimulatedBackend),
            Box::new(LogNotifier),
        )
        .expect("pipeline")
    }

    fn feed_error_spike(p: &Pipeline, service: &str, environment: &str) {
        for secs in [0, 30, 60] {
            p.handle(
                PipelineEvent::Sample(sample(service, environment, secs, 2, 100, 200.0)),
                at(secs),
            )
            .expect("sample");
        }
    }

    #[test]
    fn staging_error_spike_runs_end_to_end_without_approval() {
        let p = pipeline("e2e-staging");
        feed_error_spike(&p, "checkout", "staging");
        p.tick_at(at(60)).expect("tick");

        let ids = p.store().open_incident_ids();
        assert_eq!(ids.len(), 1);
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(
            case.incident.status,
            IncidentStatus::ResolvedPendingVerification
        );
        assert!(case.plans.iter().any(|pl| pl.state == PlanState::Executed));

        let kinds: Vec<AuditKind> = p
            .audit()
            .events_for_incident(&ids[0])
            .expect("events")
            .iter()
            .map(|e| e.kind)
            .collect();
        for expected in [
            AuditKind::IncidentOpened,
            AuditKind::PlanProposed,
            AuditKind::VerdictRecorded,
            AuditKind::ValidationRecorded,
            AuditKind::ExecutionStarted,
            AuditKind::ActionExecuted,
            AuditKind::PlanExecuted,
            AuditKind::IncidentResolved,
        ] {
            assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
        }
    }

    #[test]
    fn prod_high_severity_waits_for_elevated_approvals() {
        let p = pipeline("e2e-prod");
        feed_error_spike(&p, "checkout", "prod");
        p.tick_at(at(60)).expect("tick");

        let ids = p.store().open_incident_ids();
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.incident.status, IncidentStatus::Open);
        let active = case.active_plan().expect("active plan");
        assert_eq!(active.state, PlanState::AwaitingApproval);
        assert_eq!(active.required_approvals(), 2);
        let plan_id = active.plan.id.clone();

        p.handle(
            PipelineEvent::Approval {
                plan_id: plan_id.clone(),
                approver_identity: "alice".into(),
                scope: "incident".into(),
            },
            at(70),
        )
        .expect("first approval");
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.incident.status, IncidentStatus::Open);

        p.handle(
            PipelineEvent::Approval {
                plan_id,
                approver_identity: "bob".into(),
                scope: "incident".into(),
            },
            at(80),
        )
        .expect("second approval");
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(
            case.incident.status,
            IncidentStatus::ResolvedPendingVerification
        );
    }

    #[test]
    fn unknown_environment_denies_every_candidate() {
        let p = pipeline("e2e-deny");
        feed_error_spike(&p, "checkout", "qa");
        p.tick_at(at(60)).expect("tick");

        let ids = p.store().open_incident_ids();
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.incident.status, IncidentStatus::Open);
        assert!(case.active_plan().is_none());
        assert!(case
            .plans
            .iter()
            .all(|pl| pl.state == PlanState::Denied));

        let kinds: Vec<AuditKind> = p
            .audit()
            .events_for_incident(&ids[0])
            .expect("events")
            .iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&AuditKind::PlanRejected));

        // Further ticks never re-propose action sets the guard already denied.
        p.tick_at(at(70)).expect("second tick");
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.plans.len(), 2);
    }

    #[test]
    fn fresh_plans_are_proposed_after_expiry() {
        let p = pipeline("e2e-regen");
        feed_error_spike(&p, "checkout", "prod");
        p.tick_at(at(60)).expect("tick");
        let ids = p.store().open_incident_ids();
        let case = p.store().case(&ids[0]).expect("case");
        let initial = case.plans.len();
        assert!(case.active_plan().is_some());

        // The condition keeps firing while both approval windows lapse.
        for secs in [900, 930, 960] {
            p.handle(
                PipelineEvent::Sample(sample("checkout", "prod", secs, 2, 100, 200.0)),
                at(secs),
            )
            .expect("sample");
        }
        p.tick_at(at(961)).expect("first expiry tick");
        for secs in [1800, 1830, 1860] {
            p.handle(
                PipelineEvent::Sample(sample("checkout", "prod", secs, 2, 100, 200.0)),
                at(secs),
            )
            .expect("sample");
        }
        p.tick_at(at(1862)).expect("second expiry tick");

        let case = p.store().case(&ids[0]).expect("case");
        assert!(
            case.plans.len() > initial,
            "expected regenerated candidates beyond the first {initial}"
        );
        assert!(
            case.plans
                .iter()
                .filter(|pl| pl.state == PlanState::Expired)
                .count()
                >= 2
        );
        let active = case.active_plan().expect("fresh plan active");
        assert_eq!(active.state, PlanState::AwaitingApproval);
    }

    #[test]
    fn failed_execution_returns_incident_to_open() {
        let p = pipeline("e2e-exec-fail");
        feed_error_spike(&p, "checkout-fail-apply", "staging");
        p.tick_at(at(60)).expect("tick");

        let ids = p.store().open_incident_ids();
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.incident.status, IncidentStatus::Open);
        assert!(case.plans.iter().any(|pl| pl.state == PlanState::Failed));

        let kinds: Vec<AuditKind> = p
            .audit()
            .events_for_incident(&ids[0])
            .expect("events")
            .iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&AuditKind::PlanFailed));
    }

    #[test]
    fn sustained_clearance_closes_after_resolution() {
        let p = pipeline("e2e-close");
        feed_error_spike(&p, "checkout", "staging");
        p.tick_at(at(60)).expect("tick");
        let ids = p.store().open_incident_ids();
        let incident_id = ids[0].clone();

        // Healthy traffic well past retention, so the spike ages out.
        for secs in [400, 430, 460] {
            p.handle(
                PipelineEvent::Sample(sample("checkout", "staging", secs, 0, 100, 200.0)),
                at(secs),
            )
            .expect("sample");
        }
        p.tick_at(at(460)).expect("clearance starts");
        assert_eq!(p.store().open_incident_ids().len(), 1);

        p.tick_at(at(470)).expect("clearance sustained");
        assert!(p.store().open_incident_ids().is_empty());

        let kinds: Vec<AuditKind> = p
            .audit()
            .events_for_incident(&incident_id)
            .expect("events")
            .iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&AuditKind::IncidentClosed));
    }

    #[test]
    fn insufficient_data_defers_without_closing() {
        let p = pipeline("e2e-defer");
        feed_error_spike(&p, "checkout", "staging");
        p.tick_at(at(60)).expect("tick");
        assert_eq!(p.store().open_incident_ids().len(), 1);

        // A single fresh sample leaves a zero-width window: neither a
        // detection nor a clearance observation.
        p.handle(
            PipelineEvent::Sample(sample("checkout", "staging", 400, 0, 100, 200.0)),
            at(400),
        )
        .expect("sample");
        p.tick_at(at(400)).expect("tick");
        p.tick_at(at(410)).expect("tick");
        assert_eq!(p.store().open_incident_ids().len(), 1);
    }

    #[test]
    fn awaiting_approval_expires_on_timeout() {
        let p = pipeline("e2e-expire");
        feed_error_spike(&p, "checkout", "prod");
        p.tick_at(at(60)).expect("tick");
        let ids = p.store().open_incident_ids();
        let case = p.store().case(&ids[0]).expect("case");
        let plan_id = case.active_plan().expect("active").plan.id.clone();

        p.tick_at(at(60 + 901)).expect("expiry tick");
        let case = p.store().case(&ids[0]).expect("case");
        assert_eq!(case.plan(&plan_id).expect("plan").state, PlanState::Expired);

        // Late approvals are refused.
        let err = p.handle(
            PipelineEvent::Approval {
                plan_id,
                approver_identity: "alice".into(),
                scope: "incident".into(),
            },
            at(1000),
        );
        assert!(err.is_err());
    }
}
