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
    models::{decode_row, TicketRecord},
    repository::table_service::{
        create_row_tx, delete_row, get_row, get_row_tx, list_rows, map_db_error, update_row_tx,
    },
    schemas::{
        clamp_limit, normalize_choice, normalize_maintenance_category, parse_optional_datetime,
        validate_input, CreateTicketInput, TicketPath, TicketsQuery, UpdateTicketInput,
        TICKET_PRIORITIES, TICKET_STATUSES, TICKET_TYPES,
    },
    services::audit::{write_audit_log, AuditAction, AuditEntry},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tickets",
            axum::routing::get(list_tickets).post(create_ticket),
        )
        .route(
            "/tickets/{ticket_id}",
            axum::routing::get(get_ticket)
                .patch(update_ticket)
                .delete(delete_ticket),
        )
}

async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    for (key, value) in [
        ("status", query.status.as_deref()),
        ("priority", query.priority.as_deref()),
        ("type", query.ticket_type.as_deref()),
    ] {
        if let Some(value) = non_empty(value) {
            filters.insert(key.to_string(), Value::String(value.to_ascii_lowercase()));
        }
    }
    if let Some(property_id) = query.property_id {
        filters.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(assigned_to) = non_empty(query.assigned_to.as_deref()) {
        filters.insert(
            "assigned_to".to_string(),
            Value::String(assigned_to.to_string()),
        );
    }
    if let Some(needle) = non_empty(query.q.as_deref()) {
        filters.insert(
            "issue__ilike".to_string(),
            Value::String(format!("%{needle}%")),
        );
    }

    let rows = list_rows(
        pool,
        "tickets",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(path): Path<TicketPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    Ok(Json(get_row(pool, "tickets", &path.ticket_id, "id").await?))
}

async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTicketInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let actor = require_actor(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let ticket_type = normalize_choice("type", &payload.ticket_type, TICKET_TYPES)?;
    let category =
        normalize_maintenance_category(&ticket_type, payload.maintenance_category.as_deref())?;
    let sla_due_at = parse_optional_datetime("sla_due_at", payload.sla_due_at.as_deref())?;
    let now = Utc::now();

    let mut record = Map::new();
    record.insert("property_id".to_string(), Value::from(payload.property_id));
    record.insert("type".to_string(), Value::String(ticket_type));
    record.insert(
        "issue".to_string(),
        Value::String(payload.issue.trim().to_string()),
    );
    record.insert(
        "priority".to_string(),
        Value::String(normalize_choice("priority", &payload.priority, TICKET_PRIORITIES)?),
    );
    record.insert(
        "status".to_string(),
        Value::String(normalize_choice("status", &payload.status, TICKET_STATUSES)?),
    );
    record.insert(
        "assigned_to".to_string(),
        optional_text(payload.assigned_to.as_deref()),
    );
    record.insert(
        "maintenance_category".to_string(),
        category.map(Value::String).unwrap_or(Value::Null),
    );
    record.insert("sla_due_at".to_string(), optional_timestamp(sla_due_at));
    record.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let created = create_row_tx(&mut tx, "tickets", &record).await?;
    let ticket: TicketRecord = decode_row(created.clone())?;
    record_ticket_event(&mut tx, "ticket_created", &ticket, now).await?;
    tx.commit().await.map_err(map_db_error)?;

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        ticket_audit(AuditAction::Created, &ticket),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_ticket(
    State(state): State<AppState>,
    Path(path): Path<TicketPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTicketInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let current: TicketRecord =
        decode_row(get_row_tx(&mut tx, "tickets", &path.ticket_id, "id").await?)?;
    let patch = ticket_patch(&current, &payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut record = patch;
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
    let updated = update_row_tx(&mut tx, "tickets", &path.ticket_id, &record, "id").await?;
    let ticket: TicketRecord = decode_row(updated.clone())?;
    record_ticket_event(&mut tx, "ticket_updated", &ticket, now).await?;
    tx.commit().await.map_err(map_db_error)?;

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        ticket_audit(AuditAction::Updated, &ticket),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_ticket(
    State(state): State<AppState>,
    Path(path): Path<TicketPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "tickets", &path.ticket_id, "id").await?;
    let ticket: TicketRecord = decode_row(deleted.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Deleted, "ticket")
            .entity_id(ticket.id)
            .status(ticket.status.clone())
            .property_id(Some(ticket.property_id))
            .description(format!("Ticket deleted: {}", issue_label(&ticket))),
    )
    .await;

    Ok(Json(deleted))
}

/// Builds the column patch for a ticket update. A ticket that stops being a
/// maintenance ticket loses its stored category.
fn ticket_patch(current: &TicketRecord, payload: &UpdateTicketInput) -> AppResult<Map<String, Value>> {
    let mut patch = Map::new();

    let ticket_type = match non_empty(payload.ticket_type.as_deref()) {
        Some(raw) => {
            let normalized = normalize_choice("type", raw, TICKET_TYPES)?;
            patch.insert("type".to_string(), Value::String(normalized.clone()));
            normalized
        }
        None => current.ticket_type.clone(),
    };

    match &payload.maintenance_category {
        Some(category) => {
            let normalized = normalize_maintenance_category(&ticket_type, category.as_deref())?;
            patch.insert(
                "maintenance_category".to_string(),
                normalized.map(Value::String).unwrap_or(Value::Null),
            );
        }
        None if ticket_type != "maintenance" && current.maintenance_category.is_some() => {
            patch.insert("maintenance_category".to_string(), Value::Null);
        }
        None => {}
    }

    if let Some(property_id) = payload.property_id {
        patch.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(issue) = payload.issue.as_deref() {
        let issue = issue.trim();
        if issue.is_empty() {
            return Err(AppError::UnprocessableEntity(
                "issue cannot be empty.".to_string(),
            ));
        }
        patch.insert("issue".to_string(), Value::String(issue.to_string()));
    }
    if let Some(priority) = non_empty(payload.priority.as_deref()) {
        patch.insert(
            "priority".to_string(),
            Value::String(normalize_choice("priority", priority, TICKET_PRIORITIES)?),
        );
    }
    if let Some(status) = non_empty(payload.status.as_deref()) {
        patch.insert(
            "status".to_string(),
            Value::String(normalize_choice("status", status, TICKET_STATUSES)?),
        );
    }
    if let Some(assigned_to) = &payload.assigned_to {
        patch.insert(
            "assigned_to".to_string(),
            optional_text(assigned_to.as_deref()),
        );
    }
    if let Some(sla_due_at) = &payload.sla_due_at {
        let parsed = parse_optional_datetime("sla_due_at", sla_due_at.as_deref())?;
        patch.insert("sla_due_at".to_string(), optional_timestamp(parsed));
    }

    Ok(patch)
}

async fn record_ticket_event(
    conn: &mut PgConnection,
    event_type: &str,
    ticket: &TicketRecord,
    now: DateTime<Utc>,
) -> AppResult<Value> {
    let mut event = Map::new();
    event.insert("event_type".to_string(), Value::String(event_type.to_string()));
    event.insert("property_id".to_string(), Value::from(ticket.property_id));
    event.insert("ticket_id".to_string(), Value::from(ticket.id));
    event.insert(
        "description".to_string(),
        Value::String(format!("{} ({})", issue_label(ticket), ticket.status)),
    );
    event.insert("due_date".to_string(), optional_timestamp(ticket.sla_due_at));
    event.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
    event.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
    create_row_tx(conn, "events", &event).await
}

fn ticket_audit(action: AuditAction, ticket: &TicketRecord) -> AuditEntry {
    let verb = match action {
        AuditAction::Created => "created",
        AuditAction::Updated => "updated",
        AuditAction::Deleted => "deleted",
    };
    AuditEntry::new(action, "ticket")
        .entity_id(ticket.id)
        .status(ticket.status.clone())
        .due_at(ticket.sla_due_at)
        .property_id(Some(ticket.property_id))
        .description(format!("Ticket {verb}: {}", issue_label(ticket)))
}

fn issue_label(ticket: &TicketRecord) -> String {
    ticket
        .issue
        .as_deref()
        .map(str::trim)
        .filter(|issue| !issue.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("#{}", ticket.id))
}

fn optional_text(value: Option<&str>) -> Value {
    non_empty(value)
        .map(|text| Value::String(text.to_string()))
        .unwrap_or(Value::Null)
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

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use super::ticket_patch;
    use crate::error::AppError;
    use crate::models::TicketRecord;
    use crate::schemas::UpdateTicketInput;

    fn maintenance_ticket() -> TicketRecord {
        TicketRecord {
            id: 9,
            property_id: 2,
            ticket_type: "maintenance".to_string(),
            issue: Some("Boiler".to_string()),
            priority: Some("medium".to_string()),
            status: "open".to_string(),
            assigned_to: None,
            maintenance_category: Some("hvac".to_string()),
            sla_due_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: None,
        }
    }

    #[test]
    fn changing_type_clears_category() {
        let payload = UpdateTicketInput {
            ticket_type: Some("Complaint".to_string()),
            ..UpdateTicketInput::default()
        };
        let patch = ticket_patch(&maintenance_ticket(), &payload).unwrap();
        assert_eq!(patch["type"], Value::String("complaint".to_string()));
        assert_eq!(patch["maintenance_category"], Value::Null);
    }

    #[test]
    fn category_rejected_on_non_maintenance_type() {
        let payload = UpdateTicketInput {
            ticket_type: Some("task".to_string()),
            maintenance_category: Some(Some("plumbing".to_string())),
            ..UpdateTicketInput::default()
        };
        assert!(matches!(
            ticket_patch(&maintenance_ticket(), &payload),
            Err(AppError::UnprocessableEntity(_))
        ));
    }

    #[test]
    fn null_fields_clear_columns() {
        let payload = UpdateTicketInput {
            status: Some("CLOSED".to_string()),
            assigned_to: Some(None),
            sla_due_at: Some(Some("2026-02-01".to_string())),
            ..UpdateTicketInput::default()
        };
        let patch = ticket_patch(&maintenance_ticket(), &payload).unwrap();
        assert_eq!(patch["status"], Value::String("closed".to_string()));
        assert_eq!(patch["assigned_to"], Value::Null);
        assert_eq!(
            patch["sla_due_at"],
            Value::String("2026-02-01T00:00:00+00:00".to_string())
        );
        assert!(!patch.contains_key("maintenance_category"));
    }

    #[test]
    fn empty_update_yields_empty_patch() {
        let patch = ticket_patch(&maintenance_ticket(), &UpdateTicketInput::default()).unwrap();
        assert!(patch.is_empty());
    }
}
