use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_actor, validate_internal_api_key, Actor},
    error::{AppError, AppResult},
    models::{decode_row, UnitRecord},
    repository::table_service::{delete_row, get_row, list_rows},
    schemas::{
        clamp_limit, parse_optional_datetime, validate_input, CreateUnitInput, UnitPath,
        UnitsQuery, UpdateUnitInput,
    },
    services::{
        audit::{write_audit_log, AuditAction, AuditEntry, RiskLevel},
        rent_ledger::{self, NewUnit, RentPatch, RentState, UnitUpdate},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/units", axum::routing::get(list_units).post(create_unit))
        .route(
            "/units/recompute-overdue",
            axum::routing::post(recompute_overdue),
        )
        .route(
            "/units/{unit_id}",
            axum::routing::get(get_unit)
                .patch(update_unit)
                .delete(delete_unit),
        )
        .route(
            "/units/{unit_id}/rent-payments",
            axum::routing::get(list_rent_payments),
        )
}

async fn list_units(
    State(state): State<AppState>,
    Query(query): Query<UnitsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(property_id) = query.property_id {
        filters.insert("property_id".to_string(), Value::from(property_id));
    }
    if let Some(occupied) = query.occupied {
        filters.insert("occupied".to_string(), Value::Bool(occupied));
    }
    if let Some(over_due) = query.over_due {
        filters.insert("over_due".to_string(), Value::Bool(over_due));
    }

    let rows = list_rows(
        pool,
        "units",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "property_id,unit_number",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;
    let unit = get_row(pool, "units", &path.unit_id, "id").await?;
    Ok(Json(unit))
}

async fn create_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUnitInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let actor = require_actor(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let now = Utc::now();
    let rent_date = parse_optional_datetime("rent_date", payload.rent_date.as_deref())?;
    let created = rent_ledger::create_unit(
        pool,
        NewUnit {
            property_id: payload.property_id,
            unit_number: payload.unit_number,
            state: RentState {
                occupied: payload.occupied,
                paid: payload.paid,
                rent_amount: payload.rent_amount,
                rent_date,
            },
        },
        now,
    )
    .await?;

    let unit: UnitRecord = decode_row(created.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        unit_audit(AuditAction::Created, &unit)
            .description(format!("Unit created: {}", unit.unit_number)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUnitInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    if payload.unit_number.is_some_and(|number| number < 1) {
        return Err(AppError::UnprocessableEntity(
            "unit_number must be at least 1.".to_string(),
        ));
    }
    if payload
        .rent_amount
        .flatten()
        .is_some_and(|amount| amount < 0.0)
    {
        return Err(AppError::UnprocessableEntity(
            "rent_amount must be non-negative.".to_string(),
        ));
    }
    let rent_date = payload
        .rent_date
        .as_ref()
        .map(|raw| parse_optional_datetime("rent_date", raw.as_deref()))
        .transpose()?;

    let update = UnitUpdate {
        unit_number: payload.unit_number,
        rent: RentPatch {
            occupied: payload.occupied,
            paid: payload.paid,
            rent_amount: payload.rent_amount,
            rent_date,
        },
    };
    let outcome = rent_ledger::update_unit(pool, &path.unit_id, update, Utc::now()).await?;

    let unit: UnitRecord = decode_row(outcome.unit.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        unit_audit(AuditAction::Updated, &unit)
            .description(format!("Unit updated: {}", unit.unit_number)),
    )
    .await;

    let mut response = outcome.unit;
    if let Some(payment) = outcome.payment {
        write_audit_log(
            state.db_pool.as_ref(),
            &actor,
            AuditEntry::new(AuditAction::Created, "rent_payment")
                .entity_id(payment.id)
                .status("paid")
                .property_id(Some(payment.property_id))
                .description(format!(
                    "Rent collected for unit {}: period {}, amount {:.2}",
                    unit.unit_number, payment.period_start, payment.amount
                )),
        )
        .await;
        if let Some(object) = response.as_object_mut() {
            object.insert("rent_payment".to_string(), json!(payment));
        }
    }

    Ok(Json(response))
}

async fn delete_unit(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "units", &path.unit_id, "id").await?;
    let unit: UnitRecord = decode_row(deleted.clone())?;
    write_audit_log(
        state.db_pool.as_ref(),
        &actor,
        AuditEntry::new(AuditAction::Deleted, "unit")
            .entity_id(unit.id)
            .property_id(Some(unit.property_id))
            .description(format!("Unit deleted: {}", unit.unit_number)),
    )
    .await;

    Ok(Json(deleted))
}

async fn list_rent_payments(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_actor(&state, &headers)?;
    let pool = db_pool(&state)?;

    let unit: UnitRecord = decode_row(get_row(pool, "units", &path.unit_id, "id").await?)?;
    let mut filters = Map::new();
    filters.insert("unit_id".to_string(), Value::from(unit.id));
    let rows = list_rows(
        pool,
        "rent_payments",
        Some(&filters),
        1000,
        0,
        "period_start",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn recompute_overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    validate_internal_api_key(
        state.config.is_production(),
        state.config.internal_api_key.as_deref(),
        api_key,
    )?;
    let pool = db_pool(&state)?;

    let today = Utc::now().date_naive();
    let changed = rent_ledger::recompute_overdue_flags(pool, today).await?;
    tracing::info!(changed, %today, "Recomputed unit overdue flags");

    write_audit_log(
        state.db_pool.as_ref(),
        &Actor::system(),
        AuditEntry::new(AuditAction::Updated, "unit")
            .source("system")
            .description(format!("Overdue sweep updated {changed} units")),
    )
    .await;

    Ok(Json(json!({ "updated": changed, "as_of": today })))
}

/// Unit audits carry the ledger state: overdue units are high risk.
fn unit_audit(action: AuditAction, unit: &UnitRecord) -> AuditEntry {
    let (status, risk) = if unit.over_due {
        ("over_due", RiskLevel::High)
    } else {
        ("ok", RiskLevel::Low)
    };
    AuditEntry::new(action, "unit")
        .entity_id(unit.id)
        .status(status)
        .property_id(Some(unit.property_id))
        .risk_level(risk)
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Database is not configured. Set DATABASE_URL.".to_string(),
        )
    })
}
