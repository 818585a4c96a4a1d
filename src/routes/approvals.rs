use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::PgConnection;

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    models::{decode_row, ApprovalRecord},
    repository::table_service::{
        create_row_tx, delete_row, get_row, get_row_tx, list_rows, map_db_error, update_row_tx,
    },
    schemas::{
        clamp_limit, normalize_choice, parse_optional_datetime, validate_input, ApprovalPath,
        ApprovalsQuery, CreateApprovalInput, UpdateApprovalInput, APPROVAL_STATUSES,
        APPROVAL_TYPES,
    },
    services::audit::{write_audit_log, AuditAction, AuditEntry},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/approvals",
            axum::routing::get(list_approvals).post(create_approval),
        )
        .route("/approvals/stats", axum::routing::get(approval_stats))
        .route(
            "/approvals/{approval_id}",
            axum::routing::get(get_approval)
                .patch(update_approval)
                .delete(delete_approval),
        )
}

async fn approval_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let (pending, pending_amount, overdue): (i64, f64, i64) = sqlx::query_as(
        "SELECT COUNT(*)::bigint,
                COALESCE(SUM(amount), 0)::float8,
                (COUNT(*) FILTER (WHERE due_at IS NOT NULL AND due_at < $1))::bigint
         FROM approvals
         WHERE status = 'pending'",
    )
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    Ok(Json(json!({
        "pending": pending,
        "pending_amount": pending_amount,
        "overdue": overdue,
    })))
}

async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ApprovalsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = non_empty(query.status.as_deref()) {
        filters.insert(
            "status".to_string(),
            Value::String(status.to_ascii_lowercase()),
        );
    }
    if let Some(approval_type) = non_empty(query.approval_type.as_deref()) {
        filters.insert(
            "type".to_string(),
            Value::String(approval_type.to_ascii_lowercase()),
        );
    }
    if let Some(property_id) = query.property_id {
        filters.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(requested_by) = non_empty(query.requested_by.as_deref()) {
        filters.insert(
            "requested_by".to_string(),
            Value::String(requested_by.to_string()),
        );
    }
    if query.overdue == Some(true) {
        filters.insert("status".to_string(), Value::String("pending".to_string()));
        filters.insert(
            "due_at__lt".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    let rows = list_rows(
        pool,
        "approvals",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_approval(
    State(state): State<AppState>,
    Path(path): Path<ApprovalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    Ok(Json(
        get_row(pool, "approvals", &path.approval_id, "id").await?,
    ))
}

async fn create_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateApprovalInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let actor = require_actor(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let approval_id = payload.id.trim().to_string();
    let due_at = parse_optional_datetime("due_at", payload.due_at.as_deref())?;
    let now = Utc::now();

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(approval_id.clone()));
    record.insert(
        "type".to_string(),
        Value::String(normalize_choice("type", &payload.approval_type, APPROVAL_TYPES)?),
    );
    record.insert(
        "status".to_string(),
        Value::String(normalize_choice("status", &payload.status, APPROVAL_STATUSES)?),
    );
    record.insert("amount".to_string(), Value::from(payload.amount));
    record.insert(
        "ticket_id".to_string(),
        payload.ticket_id.map(Value::from).unwrap_or(Value::Null),
    );
    record.insert(
        "property_id".to_string(),
        payload.property_id.map(Value::from).unwrap_or(Value::Null),
    );
    record.insert(
        "requested_by".to_string(),
        non_empty(payload.requested_by.as_deref())
            .map(|value| Value::String(value.to_string()))
            .unwrap_or(Value::Null),
    );
    record.insert("due_at".to_string(), optional_timestamp(due_at));
    record.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    match get_row_tx(&mut tx, "approvals", &approval_id, "id").await {
        Ok(_) => {
            return Err(AppError::Conflict(format!(
                "Approval id {approval_id} already exists."
            )))
        }
        Err(AppError::NotFound(_)) => {}
        Err(other) => return Err(other),
    }
    let created = create_row_tx(&mut tx, "approvals", &record).await?;
    let approval: ApprovalRecord = decode_row(created.clone())?;
    record_approval_event(
        &mut tx,
        "approval_created",
        &approval,
        format!(
            "Approval {} created: {} - ${:.2}",
            approval.id, approval.approval_type, approval.amount
        ),
        now,
    )
    .await?;
    tx.commit().await.map_err(map_db_error)?;

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        approval_audit(AuditAction::Created, &approval),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_approval(
    State(state): State<AppState>,
    Path(path): Path<ApprovalPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateApprovalInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    let mut patch = approval_patch(&payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    patch.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let current: ApprovalRecord =
        decode_row(get_row_tx(&mut tx, "approvals", &path.approval_id, "id").await?)?;
    let updated = update_row_tx(&mut tx, "approvals", &path.approval_id, &patch, "id").await?;
    let approval: ApprovalRecord = decode_row(updated.clone())?;
    if approval.status != current.status {
        record_approval_event(
            &mut tx,
            "approval_updated",
            &approval,
            format!(
                "Approval {} {} (was {})",
                approval.id, approval.status, current.status
            ),
            now,
        )
        .await?;
    }
    tx.commit().await.map_err(map_db_error)?;

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        approval_audit(AuditAction::Updated, &approval),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_approval(
    State(state): State<AppState>,
    Path(path): Path<ApprovalPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "approvals", &path.approval_id, "id").await?;
    let approval: ApprovalRecord = decode_row(deleted.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Deleted, "approval")
            .entity_id(&approval.id)
            .status(approval.status.clone())
            .property_id(approval.property_id)
            .description(format!("Approval deleted: {}", approval.id)),
    )
    .await;

    Ok(Json(deleted))
}

fn approval_patch(payload: &UpdateApprovalInput) -> AppResult<Map<String, Value>> {
    let mut patch = Map::new();
    if let Some(approval_type) = non_empty(payload.approval_type.as_deref()) {
        patch.insert(
            "type".to_string(),
            Value::String(normalize_choice("type", approval_type, APPROVAL_TYPES)?),
        );
    }
    if let Some(status) = non_empty(payload.status.as_deref()) {
        patch.insert(
            "status".to_string(),
            Value::String(normalize_choice("status", status, APPROVAL_STATUSES)?),
        );
    }
    if let Some(amount) = payload.amount {
        if amount < 0.0 {
            return Err(AppError::UnprocessableEntity(
                "amount must be non-negative.".to_string(),
            ));
        }
        patch.insert("amount".to_string(), Value::from(amount));
    }
    if let Some(ticket_id) = payload.ticket_id {
        patch.insert(
            "ticket_id".to_string(),
            ticket_id.map(Value::from).unwrap_or(Value::Null),
        );
    }
    if let Some(property_id) = payload.property_id {
        patch.insert(
            "property_id".to_string(),
            property_id.map(Value::from).unwrap_or(Value::Null),
        );
    }
    if let Some(requested_by) = &payload.requested_by {
        patch.insert(
            "requested_by".to_string(),
            non_empty(requested_by.as_deref())
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
        );
    }
    if let Some(due_at) = &payload.due_at {
        let parsed = parse_optional_datetime("due_at", due_at.as_deref())?;
        patch.insert("due_at".to_string(), optional_timestamp(parsed));
    }
    Ok(patch)
}

async fn record_approval_event(
    conn: &mut PgConnection,
    event_type: &str,
    approval: &ApprovalRecord,
    description: String,
    now: DateTime<Utc>,
) -> AppResult<Value> {
    let mut event = Map::new();
    event.insert("event_type".to_string(), Value::String(event_type.to_string()));
    event.insert(
        "property_id".to_string(),
        approval.property_id.map(Value::from).unwrap_or(Value::Null),
    );
    event.insert("approval_id".to_string(), Value::String(approval.id.clone()));
    event.insert("description".to_string(), Value::String(description));
    event.insert("due_date".to_string(), optional_timestamp(approval.due_at));
    event.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
    event.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
    create_row_tx(conn, "events", &event).await
}

fn approval_audit(action: AuditAction, approval: &ApprovalRecord) -> AuditEntry {
    AuditEntry::new(action, "approval")
        .entity_id(&approval.id)
        .status(approval.status.clone())
        .due_at(approval.due_at)
        .property_id(approval.property_id)
        .description(format!(
            "Approval {}: {} {:.2}",
            action.as_str(),
            approval.id,
            approval.amount
        ))
}

fn optional_timestamp(value: Option<DateTime<Utc>>) -> Value {
    value
        .map(|timestamp| Value::String(timestamp.to_rfc3339()))
        .unwrap_or(Value::Null)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
