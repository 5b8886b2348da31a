use chrono::NaiveTime;
use std::collections::BTreeSet;

/// Detection thresholds and signal-window sizing.
///
/// Error rates are percentages (1.0 means 1% of requests failed), latency is
/// p95 in milliseconds.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub err_high_pct: f64,
    pub err_med_pct: f64,
    pub p95_high_ms: f64,
    pub p95_med_ms: f64,
    /// Snapshots spanning less than this are insufficient data.
    pub min_window_s: u64,
    /// Samples older than this are evicted from the window.
    pub retention_s: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            err_high_pct: 1.0,
            err_med_pct: 0.5,
            p95_high_ms: 1000.0,
            p95_med_ms: 800.0,
            min_window_s: 30,
            retention_s: 300,
        }
    }
}

/// Guardrail parameters consumed by the policy guard.
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub env_allowlist: BTreeSet<String>,
    pub prod_envs: BTreeSet<String>,
    pub peak_start: NaiveTime,
    pub peak_end: NaiveTime,
    pub max_targets_prod: u32,
    pub sensitive_services: BTreeSet<String>,
    pub require_backup_for_schema: bool,
    pub block_global_ff_in_prod: bool,
    pub require_approval_for_writes: bool,
    pub approvals_required: u32,
    pub approvals_required_elevated: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            env_allowlist: set_of(&["dev", "staging", "prod"]),
            prod_envs: set_of(&["prod", "production"]),
            peak_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            peak_end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
            max_targets_prod: 5,
            sensitive_services: set_of(&["auth", "payments"]),
            require_backup_for_schema: true,
            block_global_ff_in_prod: true,
            require_approval_for_writes: true,
            approvals_required: 1,
            approvals_required_elevated: 2,
        }
    }
}

impl PolicyConfig {
    pub fn is_prod(&self, environment: &str) -> bool {
        self.prod_envs.contains(&environment.to_lowercase())
    }

    /// Peak window check; supports overnight windows (e.g. 22:00-06:00).
    pub fn in_peak(&self, t: NaiveTime) -> bool {
        if self.peak_start <= self.peak_end {
            self.peak_start <= t && t <= self.peak_end
        } else {
            t >= self.peak_start || t <= self.peak_end
        }
    }
}

/// Immutable configuration snapshot, read once at startup and passed
/// explicitly to the detector, policy guard, and orchestrator.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub policy: PolicyConfig,
    /// Awaiting-approval plans older than this expire to denied-expired.
    pub approval_timeout_s: u64,
    /// Sustained clearance required before an incident may auto-close.
    pub clearance_s: u64,
    /// Advisory snippets scoring below this are discarded.
    pub kb_min_score: f64,
    pub kb_top_k: usize,
    pub audit_db_path: String,
    pub tick_interval_s: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            policy: PolicyConfig::default(),
            approval_timeout_s: 900,
            clearance_s: 300,
            kb_min_score: 0.25,
            kb_top_k: 5,
            audit_db_path: "incidents.db".into(),
            tick_interval_s: 15,
        }
    }
}

impl PipelineConfig {
    /// Build the snapshot from the environment. Unset or unparsable values
    /// fall back to defaults; there is no ambient lookup after this call.
    pub fn from_env() -> Self {
        let d = DetectorConfig::default();
        let p = PolicyConfig::default();
        let base = PipelineConfig::default();

        Self {
            detector: DetectorConfig {
                err_high_pct: env_f64("DETECT_ERR_HIGH", d.err_high_pct),
                err_med_pct: env_f64("DETECT_ERR_MED", d.err_med_pct),
                p95_high_ms: env_f64("DETECT_P95_HIGH", d.p95_high_ms),
                p95_med_ms: env_f64("DETECT_P95_MED", d.p95_med_ms),
                min_window_s: env_u64("DETECT_MIN_WINDOW_S", d.min_window_s),
                retention_s: env_u64("SIGNAL_WINDOW_S", d.retention_s),
            },
            policy: PolicyConfig {
                env_allowlist: env_set("ENV_ALLOWLIST", &p.env_allowlist),
                prod_envs: env_set("PROD_ENVS", &p.prod_envs),
                peak_start: env_time("PEAK_START", p.peak_start),
                peak_end: env_time("PEAK_END", p.peak_end),
                max_targets_prod: env_u64("MAX_TARGETS_PROD", u64::from(p.max_targets_prod)) as u32,
                sensitive_services: env_set("SENSITIVE_SERVICES", &p.sensitive_services),
                require_backup_for_schema: env_bool("REQUIRE_BACKUP_FOR_SCHEMA", p.require_backup_for_schema),
                block_global_ff_in_prod: env_bool("BLOCK_GLOBAL_FF_IN_PROD", p.block_global_ff_in_prod),
                require_approval_for_writes: env_bool("REQUIRE_APPROVAL_FOR_WRITES", p.require_approval_for_writes),
                approvals_required: env_u64("APPROVALS_REQUIRED", u64::from(p.approvals_required)) as u32,
                approvals_required_elevated: env_u64(
                    "APPROVALS_REQUIRED_ELEVATED",
                    u64::from(p.approvals_required_elevated),
                ) as u32,
            },
            approval_timeout_s: env_u64("APPROVAL_TIMEOUT_S", base.approval_timeout_s),
            clearance_s: env_u64("INCIDENT_CLEARANCE_S", base.clearance_s),
            kb_min_score: env_f64("KB_MIN_SCORE", base.kb_min_score),
            kb_top_k: env_u64("KB_TOP_K", base.kb_top_k as u64) as usize,
            audit_db_path: std::env::var("AUDIT_DB").unwrap_or(base.audit_db_path),
            tick_interval_s: env_u64("PIPELINE_TICK_S", base.tick_interval_s),
        }
    }
}

fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_set(key: &str, default: &BTreeSet<String>) -> BTreeSet<String> {
    match std::env::var(key) {
        Ok(v) => {
            let parsed: BTreeSet<String> = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if parsed.is_empty() {
                default.clone()
            } else {
                parsed
            }
        }
        Err(_) => default.clone(),
    }
}

fn env_time(key: &str, default: NaiveTime) -> NaiveTime {
    std::env::var(key)
        .ok()
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M:%S").ok())
        .unwrap_or(default)
}
