use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    models::{decode_rows, AuditLogRecord},
    repository::table_service::{count_rows, fetch_all_rows, list_rows},
    schemas::{clamp_limit, parse_optional_datetime, AuditLogsQuery},
    services::audit::{is_live_overdue, RiskLevel, LIVE_STATUSES},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/audit-logs", axum::routing::get(list_audit_logs))
        .route("/audit-logs/stats", axum::routing::get(audit_log_stats))
}

async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let filters = audit_filters(&query)?;
    let limit = clamp_limit(query.limit);
    let offset = query.offset.max(0);

    if !query.high_risk_only {
        let rows = list_rows(
            pool,
            "audit_logs",
            Some(&filters),
            limit,
            offset,
            "created_at",
            false,
        )
        .await?;
        return Ok(Json(json!({ "data": rows })));
    }

    // High risk includes live entities that went overdue after they were
    // logged, so the stored risk_level alone cannot be filtered in SQL.
    let rows = fetch_all_rows(pool, "audit_logs", Some(&filters), "created_at", false).await?;
    let logs: Vec<AuditLogRecord> = decode_rows(rows)?;
    let data = select_high_risk(logs, Utc::now())
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": data })))
}

async fn audit_log_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    let mut today = Map::new();
    today.insert(
        "created_at__gte".to_string(),
        Value::String(start_of_day(now).to_rfc3339()),
    );

    let mut deletions = Map::new();
    deletions.insert("action".to_string(), Value::String("deleted".to_string()));

    let mut flagged_high = Map::new();
    flagged_high.insert(
        "risk_level".to_string(),
        Value::String(RiskLevel::High.as_str().to_string()),
    );

    let mut live_overdue = Map::new();
    live_overdue.insert(
        "risk_level__ne".to_string(),
        Value::String(RiskLevel::High.as_str().to_string()),
    );
    live_overdue.insert("status__in".to_string(), json!(LIVE_STATUSES));
    live_overdue.insert("due_at__lt".to_string(), Value::String(now.to_rfc3339()));

    let high_risk = count_rows(pool, "audit_logs", Some(&flagged_high)).await?
        + count_rows(pool, "audit_logs", Some(&live_overdue)).await?;

    Ok(Json(json!({
        "total": count_rows(pool, "audit_logs", None).await?,
        "today": count_rows(pool, "audit_logs", Some(&today)).await?,
        "high_risk": high_risk,
        "deletions": count_rows(pool, "audit_logs", Some(&deletions)).await?,
        "retention_days": state.config.audit_retention_days,
    })))
}

fn audit_filters(query: &AuditLogsQuery) -> AppResult<Map<String, Value>> {
    let mut filters = Map::new();
    if let Some(start) = parse_optional_datetime("start_date", query.start_date.as_deref())? {
        filters.insert(
            "created_at__gte".to_string(),
            Value::String(start.to_rfc3339()),
        );
    }
    if let Some(end) = parse_optional_datetime("end_date", query.end_date.as_deref())? {
        filters.insert(
            "created_at__lte".to_string(),
            Value::String(end.to_rfc3339()),
        );
    }
    for (key, value) in [
        ("actor_email", query.actor.as_deref()),
        ("entity_type", query.entity_type.as_deref()),
        ("action", query.action.as_deref()),
        ("source", query.source.as_deref()),
    ] {
        if let Some(value) = value.map(str::trim).filter(|item| !item.is_empty()) {
            filters.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    if let Some(raw) = query
        .risk_level
        .as_deref()
        .map(str::trim)
        .filter(|item| !item.is_empty())
    {
        let level = RiskLevel::parse(raw).ok_or_else(|| {
            AppError::UnprocessableEntity("risk_level must be one of: low, high.".to_string())
        })?;
        filters.insert(
            "risk_level".to_string(),
            Value::String(level.as_str().to_string()),
        );
    }
    Ok(filters)
}

fn select_high_risk(logs: Vec<AuditLogRecord>, now: DateTime<Utc>) -> Vec<AuditLogRecord> {
    logs.into_iter()
        .filter(|log| {
            RiskLevel::parse(&log.risk_level) == Some(RiskLevel::High)
                || is_live_overdue(log, now)
        })
        .collect()
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
