use action_effects::{Effect, Effectful};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagOp {
    Enable,
    Disable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagScope {
    /// Flag applies to a single service.
    Service(String),
    /// Flag applies platform-wide. Blocked in production by policy.
    Global,
}

/// A remediation step. Immutable once included in a plan; parameters are
/// strongly typed per kind and checked at plan construction time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Revert a service to a previous release.
    Rollback { service: String, to_version: String },
    /// Change the replica count of a service.
    Scale { service: String, replicas: u32 },
    FeatureFlagToggle {
        key: String,
        op: FlagOp,
        scope: FlagScope,
    },
    /// Rolling restart of the named targets.
    Restart { targets: Vec<String> },
    /// Guarded schema migration. Irreversible; policy requires a backup
    /// attestation before it may touch production.
    SchemaMigration {
        database: String,
        change: String,
        backup_attestation: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Rollback { .. } => "rollback",
            Action::Scale { .. } => "scale",
            Action::FeatureFlagToggle { .. } => "feature_flag_toggle",
            Action::Restart { .. } => "restart",
            Action::SchemaMigration { .. } => "schema_migration",
        }
    }

    /// Required-parameter check for this kind. Plans only ever contain
    /// actions that passed this.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Action::Rollback { service, to_version } => {
                require(service, "rollback requires 'service'")?;
                require(to_version, "rollback requires 'to_version'")
            }
            Action::Scale { service, replicas } => {
                require(service, "scale requires 'service'")?;
                if *replicas == 0 {
                    return Err("scale requires 'replicas' >= 1".into());
                }
                Ok(())
            }
            Action::FeatureFlagToggle { key, scope, .. } => {
                require(key, "feature_flag_toggle requires 'key'")?;
                if let FlagScope::Service(service) = scope {
                    require(service, "service-scoped flag requires a service name")?;
                }
                Ok(())
            }
            Action::Restart { targets } => {
                if targets.is_empty() || targets.iter().any(|t| t.trim().is_empty()) {
                    return Err("restart requires non-empty 'targets'".into());
                }
                Ok(())
            }
            Action::SchemaMigration { database, change, .. } => {
                require(database, "schema_migration requires 'database'")?;
                require(change, "schema_migration requires 'change'")
            }
        }
    }

    pub fn reversible(&self) -> bool {
        self.effect().reversible()
    }

    /// Count of distinct targets this action would affect.
    pub fn blast_radius(&self) -> u32 {
        match self {
            Action::Rollback { .. } | Action::Scale { .. } | Action::SchemaMigration { .. } => 1,
            Action::FeatureFlagToggle { scope, .. } => match scope {
                FlagScope::Service(_) => 1,
                FlagScope::Global => u32::MAX,
            },
            Action::Restart { targets } => targets.len() as u32,
        }
    }

    /// Services this action explicitly names.
    pub fn declared_services(&self) -> Vec<String> {
        match self {
            Action::Rollback { service, .. } | Action::Scale { service, .. } => {
                vec![service.clone()]
            }
            Action::FeatureFlagToggle { scope, .. } => match scope {
                FlagScope::Service(service) => vec![service.clone()],
                FlagScope::Global => Vec::new(),
            },
            Action::Restart { targets } => targets.clone(),
            Action::SchemaMigration { database, .. } => vec![database.clone()],
        }
    }

    /// Does this action reach beyond any single declared service?
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Action::FeatureFlagToggle {
                scope: FlagScope::Global,
                ..
            }
        )
    }

    pub fn is_global_flag(&self) -> bool {
        self.is_global()
    }

    pub fn is_schema_migration(&self) -> bool {
        matches!(self, Action::SchemaMigration { .. })
    }

    pub fn backup_attestation(&self) -> Option<&str> {
        match self {
            Action::SchemaMigration {
                backup_attestation, ..
            } => backup_attestation.as_deref(),
            _ => None,
        }
    }

    /// Declared post-state the dry-run prediction must match.
    pub fn expected_outcome(&self) -> serde_json::Value {
        match self {
            Action::Rollback { service, to_version } => serde_json::json!({
                "service": service,
                "version": to_version,
            }),
            Action::Scale { service, replicas } => serde_json::json!({
                "service": service,
                "replicas": replicas,
            }),
            Action::FeatureFlagToggle { key, op, scope } => serde_json::json!({
                "key": key,
                "state": match op { FlagOp::Enable => "enabled", FlagOp::Disable => "disabled" },
                "global": matches!(scope, FlagScope::Global),
            }),
            Action::Restart { targets } => serde_json::json!({
                "restarted": targets,
            }),
            Action::SchemaMigration { database, change, .. } => serde_json::json!({
                "database": database,
                "applied": change,
            }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::Rollback { service, to_version } => {
                format!("rollback {service} to {to_version}")
            }
            Action::Scale { service, replicas } => format!("scale {service} to {replicas}"),
            Action::FeatureFlagToggle { key, op, scope } => {
                let op = match op {
                    FlagOp::Enable => "enable",
                    FlagOp::Disable => "disable",
                };
                match scope {
                    FlagScope::Service(service) => format!("{op} flag '{key}' on {service}"),
                    FlagScope::Global => format!("{op} flag '{key}' globally"),
                }
            }
            Action::Restart { targets } => format!("restart {}", targets.join(", ")),
            Action::SchemaMigration { database, change, .. } => {
                format!("apply schema change '{change}' on {database}")
            }
        }
    }
}

impl Effectful for Action {
    fn effect(&self) -> Effect {
        match self {
            Action::Rollback { .. }
            | Action::Scale { .. }
            | Action::FeatureFlagToggle { .. }
            | Action::Restart { .. } => Effect::Mutate,
            Action::SchemaMigration { .. } => Effect::Irreversible,
        }
    }
}

fn require(value: &str, msg: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(msg.into())
    } else {
        Ok(())
    }
}
