//! Automated incident-response pipeline: signal windowing, threshold
//! detection, deterministic plan generation, policy guardrails, approval
//! gating, dry-run validation, ordered execution, and an append-only audit
//! trail.
//!
//! The ingestion surface lives in a separate crate; everything here is
//! transport-agnostic and driven through [`pipeline::PipelineEvent`].

pub mod actions;
pub mod audit;
pub mod backend;
pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod incident;
pub mod kb;
pub mod notify;
pub mod pipeline;
pub mod plan;
pub mod policy;
pub mod report;
pub mod signals;
pub mod state;
pub mod validator;

pub use actions::Action;
pub use audit::{AuditEvent, AuditKind, AuditLog};
pub use backend::{ExecutionBackend, SimulatedBackend};
pub use config::{DetectorConfig, PipelineConfig, PolicyConfig};
pub use detector::Detector;
pub use error::PipelineError;
pub use executor::{ExecutionOutcome, ExecutionReport, Executor};
pub use incident::{Incident, IncidentStatus, Severity, SuspectedCause};
pub use kb::{AdvisorySnippet, KnowledgeBase, NullKnowledgeBase};
pub use notify::{LogNotifier, Notifier, NotifyEvent};
pub use pipeline::{Pipeline, PipelineEvent};
pub use plan::{Plan, PlanGenerator, PlanSource};
pub use policy::{Decision, PolicyGuard, Verdict};
pub use signals::{SignalSample, SignalWindow, WindowStats};
pub use state::{CaseStore, IncidentCase, PlanState};
pub use validator::{ValidationResult, Validator};
