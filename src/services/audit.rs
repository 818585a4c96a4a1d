use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::auth::Actor;
use crate::error::AppResult;
use crate::models::{decode_row, AuditLogRecord};
use crate::repository::table_service::create_row;

/// Statuses that still need attention once their due date has passed.
pub const LIVE_STATUSES: &[&str] = &["open", "in_progress", "waiting", "pending"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// Risk of a mutation: only overdue approvals still pending and overdue
/// tickets that are not closed are high risk, unless the caller overrides.
pub fn compute_risk_level(
    entity_type: &str,
    status: Option<&str>,
    due_at: Option<DateTime<Utc>>,
    explicit: Option<RiskLevel>,
    now: DateTime<Utc>,
) -> RiskLevel {
    if let Some(level) = explicit {
        return level;
    }
    let Some(due_at) = due_at else {
        return RiskLevel::Low;
    };
    if due_at >= now {
        return RiskLevel::Low;
    }

    let status = status
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match entity_type {
        "approval" if status == "pending" => RiskLevel::High,
        "ticket" if status != "closed" => RiskLevel::High,
        _ => RiskLevel::Low,
    }
}

/// True when an audited entity is still live (not resolved) past its due date.
pub fn is_live_overdue(log: &AuditLogRecord, now: DateTime<Utc>) -> bool {
    let live = log
        .status
        .as_deref()
        .is_some_and(|status| {
            LIVE_STATUSES
                .iter()
                .any(|live| live.eq_ignore_ascii_case(status.trim()))
        });
    live && log.due_at.is_some_and(|due_at| due_at < now)
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub source: &'static str,
    pub status: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub property_id: Option<i64>,
    pub description: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_type: &'static str) -> Self {
        Self {
            action,
            entity_type,
            entity_id: None,
            source: "api",
            status: None,
            due_at: None,
            property_id: None,
            description: None,
            risk_level: None,
        }
    }

    pub fn entity_id(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn source(mut self, source: &'static str) -> Self {
        self.source = source;
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn due_at(mut self, due_at: Option<DateTime<Utc>>) -> Self {
        self.due_at = due_at;
        self
    }

    pub fn property_id(mut self, property_id: Option<i64>) -> Self {
        self.property_id = property_id;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    fn into_record(self, actor: &Actor, now: DateTime<Utc>) -> Map<String, Value> {
        let risk = compute_risk_level(
            self.entity_type,
            self.status.as_deref(),
            self.due_at,
            self.risk_level,
            now,
        );

        let mut record = Map::new();
        record.insert("actor_id".to_string(), Value::String(actor.id.clone()));
        record.insert(
            "actor_email".to_string(),
            actor.email.clone().map(Value::String).unwrap_or(Value::Null),
        );
        record.insert("actor_role".to_string(), Value::String(actor.role.clone()));
        record.insert(
            "action".to_string(),
            Value::String(self.action.as_str().to_string()),
        );
        record.insert(
            "entity_type".to_string(),
            Value::String(self.entity_type.to_string()),
        );
        record.insert(
            "entity_id".to_string(),
            self.entity_id.map(Value::String).unwrap_or(Value::Null),
        );
        record.insert("source".to_string(), Value::String(self.source.to_string()));
        record.insert(
            "status".to_string(),
            self.status.map(Value::String).unwrap_or(Value::Null),
        );
        record.insert(
            "due_at".to_string(),
            self.due_at
                .map(|due| Value::String(due.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        record.insert(
            "property_id".to_string(),
            self.property_id.map(Value::from).unwrap_or(Value::Null),
        );
        record.insert(
            "risk_level".to_string(),
            Value::String(risk.as_str().to_string()),
        );
        record.insert(
            "description".to_string(),
            self.description.map(Value::String).unwrap_or(Value::Null),
        );
        record.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
        record
    }
}

/// Persists one audit row and returns it.
pub async fn log_audit(
    pool: &PgPool,
    actor: &Actor,
    entry: AuditEntry,
    now: DateTime<Utc>,
) -> AppResult<AuditLogRecord> {
    let created = create_row(pool, "audit_logs", &entry.into_record(actor, now)).await?;
    decode_row(created)
}

/// Records an audit row after a committed mutation. Failures are logged and
/// never reach the caller.
pub async fn write_audit_log(pool: Option<&PgPool>, actor: &Actor, entry: AuditEntry) {
    let Some(pool) = pool else {
        return;
    };
    let entity_type = entry.entity_type;
    let action = entry.action.as_str();
    if let Err(error) = log_audit(pool, actor, entry, Utc::now()).await {
        tracing::warn!(
            entity_type,
            action,
            actor_id = %actor.id,
            error = %error,
            "Audit log write failed"
        );
    }
}
