use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use pipeline_core::audit::AuditLog;
use pipeline_core::pipeline::PipelineEvent;
use pipeline_core::report;
use pipeline_core::signals::SignalSample;
use pipeline_core::state::CaseStore;
use pipeline_core::Action;
use serde::{Deserialize, Serialize};
use signal_registry::{validate_sample_v1, CanonicalSampleV1};
use std::sync::{mpsc, Arc};

/// Every telemetry source shape plugs in through one of these.
pub trait SampleAdapter: Send + Sync + 'static {
    fn parse(&self, payload: &serde_json::Value) -> Result<CanonicalSampleV1, String>;
}

/// Flat payloads that already look like the canonical sample.
pub struct GenericAdapter;

/// Nested metrics-exporter payloads: resource labels plus counter/gauge maps.
pub struct MetricsAdapter;

impl SampleAdapter for GenericAdapter {
    fn parse(&self, payload: &serde_json::Value) -> Result<CanonicalSampleV1, String> {
        let sample = CanonicalSampleV1 {
            schema: "sample.v1".into(),
            service: str_field(payload, "service").unwrap_or_default(),
            environment: str_field(payload, "environment")
                .or_else(|| str_field(payload, "env"))
                .unwrap_or_default(),
            error_count: u64_field(payload, "error_count").unwrap_or(0),
            request_count: u64_field(payload, "request_count").unwrap_or(0),
            latency_p95_ms: f64_field(payload, "latency_p95_ms").unwrap_or(0.0),
            observed_at: str_field(payload, "observed_at")
                .unwrap_or_else(|| Utc::now().timestamp().to_string()),
        };
        validate_sample_v1(&sample)?;
        Ok(sample)
    }
}

impl SampleAdapter for MetricsAdapter {
    fn parse(&self, payload: &serde_json::Value) -> Result<CanonicalSampleV1, String> {
        let resource = payload
            .get("resource")
            .ok_or_else(|| "metrics payload missing resource".to_string())?;
        let counters = payload
            .get("counters")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let gauges = payload
            .get("gauges")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let sample = CanonicalSampleV1 {
            schema: "sample.v1".into(),
            service: str_field(resource, "service").unwrap_or_default(),
            environment: str_field(resource, "environment")
                .or_else(|| str_field(resource, "env"))
                .unwrap_or_default(),
            error_count: u64_field(&counters, "errors").unwrap_or(0),
            request_count: u64_field(&counters, "requests").unwrap_or(0),
            latency_p95_ms: f64_field(&gauges, "latency_p95_ms")
                .or_else(|| f64_field(&gauges, "p95_ms"))
                .unwrap_or(0.0),
            observed_at: str_field(payload, "timestamp")
                .unwrap_or_else(|| Utc::now().timestamp().to_string()),
        };
        validate_sample_v1(&sample)?;
        Ok(sample)
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn u64_field(value: &serde_json::Value, key: &str) -> Option<u64> {
    value.get(key).and_then(serde_json::Value::as_u64)
}

fn f64_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    value.get(key).and_then(serde_json::Value::as_f64)
}

/// Epoch seconds or RFC 3339; unparsable timestamps fall back to now.
pub fn parse_observed_at(raw: &str) -> DateTime<Utc> {
    if let Ok(secs) = raw.parse::<i64>() {
        if let chrono::LocalResult::Single(t) = Utc.timestamp_opt(secs, 0) {
            return t;
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn to_signal_sample(canonical: CanonicalSampleV1) -> SignalSample {
    SignalSample {
        timestamp: parse_observed_at(&canonical.observed_at),
        service: canonical.service,
        environment: canonical.environment,
        error_count: canonical.error_count,
        request_count: canonical.request_count,
        latency_p95_ms: canonical.latency_p95_ms,
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tx: mpsc::Sender<PipelineEvent>,
    pub store: Arc<CaseStore>,
    pub audit: AuditLog,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/samples/generic", post(handle_generic_sample))
        .route("/samples/metrics", post(handle_metrics_sample))
        .route(
            "/incidents/:incident_id/plans/:plan_id/approvals",
            post(handle_approval),
        )
        .route("/incidents", get(list_incidents))
        .route("/events", get(event_stream))
        .route("/incidents/:incident_id/events", get(incident_events))
        .route("/incidents/:incident_id/report", get(incident_report))
        .route("/schema/actions", get(action_schema))
        .route("/schema/sample", get(sample_schema))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn handle_generic_sample(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    ingest_sample(&state, GenericAdapter.parse(&payload))
}

async fn handle_metrics_sample(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    ingest_sample(&state, MetricsAdapter.parse(&payload))
}

fn ingest_sample(state: &AppState, parsed: Result<CanonicalSampleV1, String>) -> StatusCode {
    let canonical = match parsed {
        Ok(canonical) => canonical,
        Err(err) => {
            tracing::debug!(%err, "rejected sample");
            return StatusCode::BAD_REQUEST;
        }
    };
    match state
        .tx
        .send(PipelineEvent::Sample(to_signal_sample(canonical)))
    {
        Ok(_) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approver_identity: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "incident".into()
}

async fn handle_approval(
    State(state): State<AppState>,
    Path((incident_id, plan_id)): Path<(String, String)>,
    Json(request): Json<ApprovalRequest>,
) -> StatusCode {
    if request.approver_identity.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    let Some(case) = state.store.case(&incident_id) else {
        return StatusCode::NOT_FOUND;
    };
    if case.plan(&plan_id).is_none() {
        return StatusCode::NOT_FOUND;
    }

    match state.tx.send(PipelineEvent::Approval {
        plan_id,
        approver_identity: request.approver_identity,
        scope: request.scope,
    }) {
        Ok(_) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Debug, Serialize)]
struct IncidentSummary {
    incident_id: String,
    service: Option<String>,
    environment: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    plan_count: usize,
}

async fn list_incidents(
    State(state): State<AppState>,
) -> Result<Json<Vec<IncidentSummary>>, StatusCode> {
    let ids = state
        .audit
        .all_incidents()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summaries = ids
        .into_iter()
        .map(|incident_id| match state.store.case(&incident_id) {
            Some(case) => IncidentSummary {
                incident_id,
                service: Some(case.incident.service),
                environment: Some(case.incident.environment),
                severity: Some(format!("{:?}", case.incident.severity)),
                status: Some(format!("{:?}", case.incident.status)),
                plan_count: case.plans.len(),
            },
            // Known only from the audit trail (e.g. a previous run).
            None => IncidentSummary {
                incident_id,
                service: None,
                environment: None,
                severity: None,
                status: None,
                plan_count: 0,
            },
        })
        .collect();
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    /// Last event id the consumer has already seen.
    #[serde(default)]
    after: i64,
}

/// Incremental cursor over the whole audit trail, for external streaming
/// consumers polling with their last seen id.
async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<pipeline_core::AuditEvent>>, StatusCode> {
    state
        .audit
        .events_after(query.after)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn incident_events(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<Json<Vec<pipeline_core::AuditEvent>>, StatusCode> {
    let events = state
        .audit
        .events_for_incident(&incident_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if events.is_empty() && state.store.case(&incident_id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(events))
}

async fn incident_report(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<([(header::HeaderName, &'static str); 1], String), StatusCode> {
    let Some(case) = state.store.case(&incident_id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let events = state
        .audit
        .events_for_incident(&incident_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        report::render_markdown(&case, &events),
    ))
}

async fn action_schema() -> Json<schemars::Schema> {
    Json(schemars::schema_for!(Action))
}

async fn sample_schema() -> Json<schemars::Schema> {
    Json(schemars::schema_for!(CanonicalSampleV1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_adapter_maps_flat_payload() {
        let payload = serde_json::json!({
            "service": "checkout",
            "environment": "prod",
            "error_count": 3,
            "request_count": 200,
            "latency_p95_ms": 420.5,
            "observed_at": "1700000000",
        });
        let sample = GenericAdapter.parse(&payload).expect("sample");
        assert_eq!(sample.service, "checkout");
        assert_eq!(sample.environment, "prod");
        assert_eq!(sample.error_count, 3);
        assert_eq!(sample.request_count, 200);
    }

    #[test]
    fn generic_adapter_accepts_env_alias() {
        let payload = serde_json::json!({
            "service": "checkout",
            "env": "staging",
            "error_count": 0,
            "request_count": 10,
            "latency_p95_ms": 100.0,
        });
        let sample = GenericAdapter.parse(&payload).expect("sample");
        assert_eq!(sample.environment, "staging");
    }

    #[test]
    fn generic_adapter_rejects_invalid_counts() {
        let payload = serde_json::json!({
            "service": "checkout",
            "environment": "prod",
            "error_count": 20,
            "request_count": 10,
            "latency_p95_ms": 100.0,
        });
        assert!(GenericAdapter.parse(&payload).is_err());
    }

    #[test]
    fn metrics_adapter_digs_nested_shape() {
        let payload = serde_json::json!({
            "resource": {"service": "auth", "env": "prod"},
            "counters": {"requests": 500, "errors": 5},
            "gauges": {"p95_ms": 850.0},
            "timestamp": "2026-01-10T12:00:00Z",
        });
        let sample = MetricsAdapter.parse(&payload).expect("sample");
        assert_eq!(sample.service, "auth");
        assert_eq!(sample.environment, "prod");
        assert_eq!(sample.request_count, 500);
        assert!((sample.latency_p95_ms - 850.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_adapter_requires_resource() {
        let payload = serde_json::json!({"counters": {"requests": 1, "errors": 0}});
        assert!(MetricsAdapter.parse(&payload).is_err());
    }

    #[test]
    fn observed_at_parses_epoch_and_rfc3339() {
        let epoch = parse_observed_at("1700000000");
        assert_eq!(epoch.timestamp(), 1_700_000_000);

        let rfc = parse_observed_at("2026-01-10T12:00:00Z");
        assert_eq!(rfc.to_rfc3339(), "2026-01-10T12:00:00+00:00");
    }
}
