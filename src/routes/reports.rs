use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, HeaderValue, Response, StatusCode,
    },
    Json,
};
use chrono::Utc;
use serde_json::Value;

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    schemas::ReportQuery,
    services::{
        analytics::{build_report, load_dataset, ReportAnalytics, ReportScope},
        report_export::{render_csv, render_pdf},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/reports/analytics", axum::routing::get(report_analytics))
        .route("/reports/analytics/csv", axum::routing::get(report_csv))
        .route("/reports/analytics/pdf", axum::routing::get(report_pdf))
}

async fn report_analytics(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let report = analytics_for(&state, &headers, &query).await?;
    let body = serde_json::to_value(&report).map_err(|error| {
        tracing::error!(%error, "Could not serialize report analytics");
        AppError::Internal("Could not serialize report.".to_string())
    })?;
    Ok(Json(body))
}

async fn report_csv(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let report = analytics_for(&state, &headers, &query).await?;
    let csv = render_csv(&report)?;
    attachment(csv.into_bytes(), "text/csv; charset=utf-8", "report.csv")
}

async fn report_pdf(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let report = analytics_for(&state, &headers, &query).await?;
    attachment(render_pdf(&report), "application/pdf", "report.pdf")
}

async fn analytics_for(
    state: &AppState,
    headers: &HeaderMap,
    query: &ReportQuery,
) -> AppResult<ReportAnalytics> {
    require_actor(state, headers)?;
    let pool = db_pool(state)?;
    let scope = ReportScope::resolve(
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        query.property_id,
        query.technician.as_deref(),
        Utc::now(),
        state.config.report_default_range_days,
    )?;

    let dataset = load_dataset(pool, &scope).await?;
    let report = build_report(&dataset, &scope);
    tracing::info!(
        property_id = ?scope.property_id,
        technician = ?scope.technician,
        units = dataset.units.len(),
        tickets = dataset.tickets.len(),
        "Built report analytics"
    );
    Ok(report)
}

fn attachment(
    bytes: Vec<u8>,
    content_type: &'static str,
    filename: &str,
) -> AppResult<Response<Body>> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Body::from(bytes))
        .map_err(|error| {
            tracing::error!(error = %error, "Could not build export response");
            AppError::Internal("Could not build export response.".to_string())
        })?;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename={filename}")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
