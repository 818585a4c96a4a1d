use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit, parse_optional_datetime, validate_input, CreateEventInput, EventPath,
        EventsQuery, OverdueEventsQuery, UpcomingEventsQuery, UpdateEventInput,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/events", axum::routing::get(list_events).post(create_event))
        .route("/events/upcoming", axum::routing::get(upcoming_events))
        .route("/events/overdue", axum::routing::get(overdue_events))
        .route(
            "/events/{event_id}",
            axum::routing::get(get_event)
                .patch(update_event)
                .delete(delete_event),
        )
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(property_id) = query.property_id {
        filters.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(event_type) = non_empty(query.event_type.as_deref()) {
        filters.insert(
            "event_type".to_string(),
            Value::String(event_type.to_string()),
        );
    }
    if let Some(ticket_id) = linked_ticket(query.ticket_id) {
        filters.insert("ticket_id".to_string(), Value::from(ticket_id));
    }
    if let Some(approval_id) = non_empty(query.approval_id.as_deref()) {
        filters.insert(
            "approval_id".to_string(),
            Value::String(approval_id.to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "events",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn upcoming_events(
    State(state): State<AppState>,
    Query(query): Query<UpcomingEventsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    if !(1..=90).contains(&query.days_ahead) {
        return Err(AppError::UnprocessableEntity(
            "days_ahead must be between 1 and 90.".to_string(),
        ));
    }

    let filters = due_window_filters(query.property_id, Utc::now(), Some(query.days_ahead));
    let rows = list_rows(pool, "events", Some(&filters), 1000, 0, "due_date", true).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn overdue_events(
    State(state): State<AppState>,
    Query(query): Query<OverdueEventsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let filters = due_window_filters(query.property_id, Utc::now(), None);
    let rows = list_rows(pool, "events", Some(&filters), 1000, 0, "due_date", true).await?;
    Ok(Json(json!({ "data": rows })))
}

/// With `days_ahead`, events due between now and now + days; without it,
/// events already past due.
fn due_window_filters(
    property_id: Option<i64>,
    now: DateTime<Utc>,
    days_ahead: Option<i64>,
) -> Map<String, Value> {
    let mut filters = Map::new();
    if let Some(property_id) = property_id {
        filters.insert("property_id".to_string(), Value::from(property_id));
    }
    match days_ahead {
        Some(days) => {
            filters.insert(
                "due_date__gte".to_string(),
                Value::String(now.to_rfc3339()),
            );
            filters.insert(
                "due_date__lte".to_string(),
                Value::String((now + Duration::days(days)).to_rfc3339()),
            );
        }
        None => {
            filters.insert(
                "due_date__lt".to_string(),
                Value::String(now.to_rfc3339()),
            );
        }
    }
    filters
}

async fn get_event(
    State(state): State<AppState>,
    Path(path): Path<EventPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    Ok(Json(get_row(pool, "events", &path.event_id, "id").await?))
}

async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateEventInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_actor(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let due_date = parse_optional_datetime("due_date", payload.due_date.as_deref())?;
    let now = Utc::now();

    let mut record = Map::new();
    record.insert(
        "event_type".to_string(),
        Value::String(payload.event_type.trim().to_string()),
    );
    record.insert("property_id".to_string(), Value::from(payload.property_id));
    record.insert(
        "ticket_id".to_string(),
        linked_ticket(payload.ticket_id)
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "approval_id".to_string(),
        optional_text(payload.approval_id.as_deref()),
    );
    record.insert(
        "description".to_string(),
        optional_text(payload.description.as_deref()),
    );
    record.insert("due_date".to_string(), optional_timestamp(due_date));
    record.insert("created_at".to_string(), Value::String(now.to_rfc3339()));
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));

    let created = create_row(pool, "events", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_event(
    State(state): State<AppState>,
    Path(path): Path<EventPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateEventInput>,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut patch = event_patch(&payload)?;
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    let updated = update_row(pool, "events", &path.event_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(path): Path<EventPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    Ok(Json(delete_row(pool, "events", &path.event_id, "id").await?))
}

fn event_patch(payload: &UpdateEventInput) -> AppResult<Map<String, Value>> {
    let mut patch = Map::new();
    if let Some(event_type) = payload.event_type.as_deref() {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(AppError::UnprocessableEntity(
                "event_type cannot be empty.".to_string(),
            ));
        }
        patch.insert(
            "event_type".to_string(),
            Value::String(event_type.to_string()),
        );
    }
    if let Some(property_id) = payload.property_id {
        let Some(property_id) = property_id else {
            return Err(AppError::UnprocessableEntity(
                "property_id cannot be null.".to_string(),
            ));
        };
        patch.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(ticket_id) = payload.ticket_id {
        patch.insert(
            "ticket_id".to_string(),
            ticket_id
                .and_then(|id| linked_ticket(Some(id)))
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
    }
    if let Some(approval_id) = &payload.approval_id {
        patch.insert(
            "approval_id".to_string(),
            optional_text(approval_id.as_deref()),
        );
    }
    if let Some(description) = &payload.description {
        patch.insert(
            "description".to_string(),
            optional_text(description.as_deref()),
        );
    }
    if let Some(due_date) = &payload.due_date {
        let parsed = parse_optional_datetime("due_date", due_date.as_deref())?;
        patch.insert("due_date".to_string(), optional_timestamp(parsed));
    }
    Ok(patch)
}

/// Clients send ticket id 0 for "no ticket".
fn linked_ticket(ticket_id: Option<i64>) -> Option<i64> {
    ticket_id.filter(|id| *id > 0)
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
