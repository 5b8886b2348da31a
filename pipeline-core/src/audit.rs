use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Audit event kinds. Every verdict, approval, validation, and execution
/// record lands here in creation order; nothing terminal happens silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    IncidentOpened,
    SeverityRaised,
    PlanProposed,
    PlanRejected,
    VerdictRecorded,
    ApprovalGranted,
    PlanExpired,
    ValidationRecorded,
    ExecutionStarted,
    ActionExecuted,
    RollbackAttempted,
    PlanExecuted,
    PlanFailed,
    IncidentResolved,
    IncidentClosed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Option<i64>,
    pub incident_id: String,
    pub kind: AuditKind,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        incident_id: &str,
        kind: AuditKind,
        description: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: None,
            incident_id: incident_id.to_string(),
            kind,
            description: description.into(),
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit trail on sqlite. Events for one incident are
/// retrievable in insertion order for external streaming consumers.
#[derive(Clone)]
pub struct AuditLog {
    db_path: Arc<PathBuf>,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self, PipelineError> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                details TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_incident ON audit_events(incident_id);
            CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_events(timestamp);
            ",
        )?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    pub fn append(&self, event: &AuditEvent) -> Result<i64, PipelineError> {
        let conn = Connection::open(&*self.db_path)?;
        let kind = serde_json::to_string(&event.kind)?;
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO audit_events (incident_id, kind, description, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.incident_id,
                kind,
                event.description,
                details,
                event.timestamp.to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn events_for_incident(&self, incident_id: &str) -> Result<Vec<AuditEvent>, PipelineError> {
        let conn = Connection::open(&*self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, kind, description, details, timestamp
             FROM audit_events
             WHERE incident_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![incident_id], map_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Incremental stream cursor: everything after a known event id.
    pub fn events_after(&self, after_id: i64) -> Result<Vec<AuditEvent>, PipelineError> {
        let conn = Connection::open(&*self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, kind, description, details, timestamp
             FROM audit_events
             WHERE id > ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![after_id], map_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Every incident ever seen, most recently active first.
    pub fn all_incidents(&self) -> Result<Vec<String>, PipelineError> {
        let conn = Connection::open(&*self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT incident_id
             FROM audit_events
             GROUP BY incident_id
             ORDER BY MAX(id) DESC",
        )?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let kind_str: String = row.get(2)?;
    let details_str: Option<String> = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let kind: AuditKind = serde_json::from_str(&kind_str).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;

    let details = details_str
        .map(|s| {
            serde_json::from_str(&s).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
        })
        .transpose()?;

    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;

    Ok(AuditEvent {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        kind,
        description: row.get(3)?,
        details,
        timestamp,
    })
}
