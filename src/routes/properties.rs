use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    models::{decode_row, PropertyRecord},
    repository::table_service::{count_rows, get_row, list_rows, map_db_error, update_row},
    schemas::{
        clamp_limit, normalize_choice, remove_nulls, serialize_to_map, validate_input,
        CreatePropertyInput, PropertiesQuery, PropertyOccupancyInput, PropertyPath,
        UpdatePropertyInput, PROPERTY_STATUSES,
    },
    services::{
        audit::{write_audit_log, AuditAction, AuditEntry},
        property_units::{
            create_property_with_units, delete_property_cascade, update_property_with_units,
            validate_occupancy_within_total,
        },
    },
    state::AppState,
};

const OPEN_HIGH_PRIORITIES: &[&str] = &["high", "urgent"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route("/properties/stats", axum::routing::get(property_stats))
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
        .route(
            "/properties/{property_id}/occupancy",
            axum::routing::patch(update_occupancy),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut builder = property_list_query(&query);
    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?
        .into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

/// Properties with their ticket and occupancy counters, one row each.
fn property_list_query(query: &PropertiesQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT row_to_json(p) AS row FROM (
           SELECT pr.*,
             (SELECT COUNT(*) FROM tickets t WHERE t.property_id = pr.id) AS tickets_count,
             (SELECT COUNT(*) FROM tickets t
                WHERE t.property_id = pr.id AND t.status <> 'closed') AS open_tickets_count,
             (SELECT COUNT(*) FROM tickets t
                WHERE t.property_id = pr.id AND t.status <> 'closed'
                  AND t.priority = ANY(",
    );
    builder.push_bind(
        OPEN_HIGH_PRIORITIES
            .iter()
            .map(|value| (*value).to_string())
            .collect::<Vec<_>>(),
    );
    builder.push(
        ")) AS high_priority_tickets_count,
             (SELECT COUNT(*) FROM units u
                WHERE u.property_id = pr.id AND u.occupied) AS occupied_units_count
           FROM properties pr WHERE 1=1",
    );

    if let Some(status) = non_empty(query.status.as_deref()) {
        builder
            .push(" AND pr.status = ")
            .push_bind(status.to_ascii_lowercase());
    }
    if let Some(manager) = non_empty(query.manager_name.as_deref()) {
        builder
            .push(" AND pr.manager_name ILIKE ")
            .push_bind(format!("%{manager}%"));
    }
    if let Some(search) = non_empty(query.search.as_deref()) {
        let pattern = format!("%{search}%");
        builder
            .push(" AND (pr.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR pr.address ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR pr.city ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    builder
        .push(" ORDER BY pr.id ASC LIMIT ")
        .push_bind(clamp_limit(query.limit))
        .push(" OFFSET ")
        .push_bind(query.offset.max(0))
        .push(") p");
    builder
}

async fn property_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let now = Utc::now();

    let mut open = Map::new();
    open.insert("status__ne".to_string(), Value::String("closed".to_string()));

    let mut high_priority = open.clone();
    high_priority.insert("priority__in".to_string(), json!(OPEN_HIGH_PRIORITIES));

    let mut sla_risk = open.clone();
    sla_risk.insert(
        "sla_due_at__lt".to_string(),
        Value::String(now.to_rfc3339()),
    );

    let mut upcoming = Map::new();
    upcoming.insert(
        "due_date__gte".to_string(),
        Value::String(now.to_rfc3339()),
    );
    upcoming.insert(
        "due_date__lte".to_string(),
        Value::String((now + Duration::days(7)).to_rfc3339()),
    );

    Ok(Json(json!({
        "total_properties": count_rows(pool, "properties", None).await?,
        "active_issues": count_rows(pool, "tickets", Some(&open)).await?,
        "high_priority_issues": count_rows(pool, "tickets", Some(&high_priority)).await?,
        "upcoming_appointments": count_rows(pool, "events", Some(&upcoming)).await?,
        "sla_risks": count_rows(pool, "tickets", Some(&sla_risk)).await?,
    })))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut property = get_row(pool, "properties", &path.property_id, "id").await?;
    let record: PropertyRecord = decode_row(property.clone())?;

    let mut owned = Map::new();
    owned.insert("property_id".to_string(), Value::from(record.id));
    let tickets = list_rows(pool, "tickets", Some(&owned), 500, 0, "created_at", false).await?;
    let approvals = list_rows(pool, "approvals", Some(&owned), 500, 0, "created_at", false).await?;
    let units = list_rows(pool, "units", Some(&owned), 1000, 0, "unit_number", true).await?;

    let occupied_units_count = units
        .iter()
        .filter(|unit| unit.get("occupied").and_then(Value::as_bool) == Some(true))
        .count();
    if let Some(object) = property.as_object_mut() {
        object.insert("occupied_units_count".to_string(), json!(occupied_units_count));
        object.insert("tickets".to_string(), Value::Array(tickets));
        object.insert("approvals".to_string(), Value::Array(approvals));
        object.insert("units".to_string(), Value::Array(units));
    }
    Ok(Json(property))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let actor = require_actor(&state, &headers)?;
    validate_input(&payload)?;
    validate_occupancy_within_total(payload.occupancy, payload.total_units)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "status".to_string(),
        Value::String(normalize_choice("status", &payload.status, PROPERTY_STATUSES)?),
    );
    let (mut created, units_created) =
        create_property_with_units(pool, &record, payload.total_units).await?;

    let property: PropertyRecord = decode_row(created.clone())?;
    tracing::info!(
        property_id = property.id,
        units_created,
        "Created property"
    );
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Created, "property")
            .entity_id(property.id)
            .property_id(Some(property.id))
            .status(property.status.clone().unwrap_or_else(|| "healthy".to_string()))
            .description(format!("Property created: {}", property.name)),
    )
    .await;

    if let Some(object) = created.as_object_mut() {
        object.insert("units_created".to_string(), json!(units_created));
    }
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(status) = payload.status.as_deref() {
        patch.insert(
            "status".to_string(),
            Value::String(normalize_choice("status", status, PROPERTY_STATUSES)?),
        );
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let (mut updated, units_created) =
        update_property_with_units(pool, &path.property_id, &patch, Utc::now()).await?;

    let property: PropertyRecord = decode_row(updated.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Updated, "property")
            .entity_id(property.id)
            .property_id(Some(property.id))
            .status(property.status.clone().unwrap_or_else(|| "healthy".to_string()))
            .description(format!("Property updated: {}", property.name)),
    )
    .await;

    if let Some(object) = updated.as_object_mut() {
        object.insert("units_created".to_string(), json!(units_created));
    }
    Ok(Json(updated))
}

async fn update_occupancy(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<PropertyOccupancyInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let current: PropertyRecord =
        decode_row(get_row(pool, "properties", &path.property_id, "id").await?)?;
    validate_occupancy_within_total(payload.occupancy, current.total_units)?;

    let mut patch = Map::new();
    patch.insert("occupancy".to_string(), Value::from(payload.occupancy));
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    let updated = update_row(pool, "properties", &path.property_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Updated, "property")
            .entity_id(current.id)
            .property_id(Some(current.id))
            .description(format!(
                "Occupancy updated: {} ({} of {})",
                current.name, payload.occupancy, current.total_units
            )),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let deleted = delete_property_cascade(pool, &path.property_id).await?;
    let property: PropertyRecord = decode_row(deleted.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Deleted, "property")
            .entity_id(property.id)
            .description(format!("Property deleted: {}", property.name)),
    )
    .await;

    Ok(Json(deleted))
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
    use super::property_list_query;
    use crate::schemas::PropertiesQuery;

    #[test]
    fn list_query_binds_every_filter() {
        let query = PropertiesQuery {
            status: Some(" Attention ".to_string()),
            manager_name: Some("Rivera".to_string()),
            search: Some("maple".to_string()),
            limit: 5000,
            offset: -3,
        };
        let builder = property_list_query(&query);
        let sql = builder.sql();
        assert!(sql.contains("t.priority = ANY($1)"), "{sql}");
        assert!(sql.contains("pr.status = $2"), "{sql}");
        assert!(sql.contains("pr.manager_name ILIKE $3"), "{sql}");
        assert!(sql.contains("pr.city ILIKE $6)"), "{sql}");
        assert!(sql.contains("LIMIT $7 OFFSET $8) p"), "{sql}");
        assert!(sql.contains("occupied_units_count"), "{sql}");
    }

    #[test]
    fn list_query_without_filters() {
        let query = PropertiesQuery {
            status: None,
            manager_name: None,
            search: Some("  ".to_string()),
            limit: 10,
            offset: 0,
        };
        let builder = property_list_query(&query);
        let sql = builder.sql();
        assert!(!sql.contains("ILIKE"), "{sql}");
        assert!(sql.contains("WHERE 1=1 ORDER BY pr.id ASC"), "{sql}");
    }
}
