use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::error::AppError;

pub const PROPERTY_STATUSES: &[&str] = &["healthy", "attention", "critical"];
pub const TICKET_TYPES: &[&str] = &["maintenance", "complaint", "refund", "task"];
pub const TICKET_STATUSES: &[&str] = &["open", "in_progress", "waiting", "closed"];
pub const TICKET_PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];
pub const MAINTENANCE_CATEGORIES: &[&str] = &["plumbing", "hvac", "electrical"];
pub const APPROVAL_TYPES: &[&str] = &["refund", "credit", "vendor_payment"];
pub const APPROVAL_STATUSES: &[&str] = &["pending", "approved", "rejected"];

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

fn default_limit_100() -> i64 {
    100
}

fn default_status_healthy() -> String {
    "healthy".to_string()
}

fn default_priority_medium() -> String {
    "medium".to_string()
}

fn default_status_open() -> String {
    "open".to_string()
}

fn default_status_pending() -> String {
    "pending".to_string()
}

fn default_days_ahead() -> i64 {
    7
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

/// Keeps "key absent" (`None`) apart from "key sent as null" (`Some(None)`)
/// for PATCH bodies.
fn patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Parses an ISO-8601 date or datetime. Values without an offset are UTC.
pub fn parse_utc_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&trimmed.replace(' ', "T")) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

pub fn parse_datetime_field(field: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    parse_utc_datetime(raw).ok_or_else(|| {
        AppError::BadRequest(format!("{field} must be an ISO-8601 date or datetime."))
    })
}

pub fn parse_optional_datetime(
    field: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_datetime_field(field, value).map(Some),
        None => Ok(None),
    }
}

/// Lower-cases `value` and checks it against `allowed`.
pub fn normalize_choice(field: &str, value: &str, allowed: &[&str]) -> Result<String, AppError> {
    let normalized = value.trim().to_ascii_lowercase();
    if allowed.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::UnprocessableEntity(format!(
        "{field} must be one of: {}.",
        allowed.join(", ")
    )))
}

/// Maintenance categories only apply to maintenance tickets.
pub fn normalize_maintenance_category(
    ticket_type: &str,
    category: Option<&str>,
) -> Result<Option<String>, AppError> {
    let Some(category) = category.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if ticket_type != "maintenance" {
        return Err(AppError::UnprocessableEntity(
            "maintenance_category is only allowed for maintenance tickets.".to_string(),
        ));
    }
    normalize_choice("maintenance_category", category, MAINTENANCE_CATEGORIES).map(Some)
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 10000))]
    pub total_units: i32,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub occupancy: i32,
    pub manager_name: Option<String>,
    #[serde(default = "default_status_healthy")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    #[validate(range(min = 0, max = 10000))]
    pub total_units: Option<i32>,
    #[validate(range(min = 0))]
    pub occupancy: Option<i32>,
    pub manager_name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyOccupancyInput {
    pub occupancy: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    pub status: Option<String>,
    pub manager_name: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUnitInput {
    pub property_id: i64,
    #[validate(range(min = 1))]
    pub unit_number: i32,
    #[validate(range(min = 0.0))]
    pub rent_amount: Option<f64>,
    pub rent_date: Option<String>,
    #[serde(default)]
    pub occupied: bool,
    #[serde(default)]
    pub paid: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUnitInput {
    pub unit_number: Option<i32>,
    #[serde(default, deserialize_with = "patch_field")]
    pub rent_amount: Option<Option<f64>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub rent_date: Option<Option<String>>,
    pub occupied: Option<bool>,
    pub paid: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitsQuery {
    pub property_id: Option<i64>,
    pub occupied: Option<bool>,
    pub over_due: Option<bool>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitPath {
    pub unit_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTicketInput {
    pub property_id: i64,
    #[serde(rename = "type")]
    pub ticket_type: String,
    #[validate(length(min = 1, max = 2000))]
    pub issue: String,
    #[serde(default = "default_priority_medium")]
    pub priority: String,
    #[serde(default = "default_status_open")]
    pub status: String,
    pub assigned_to: Option<String>,
    pub maintenance_category: Option<String>,
    pub sla_due_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTicketInput {
    pub property_id: Option<i64>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub issue: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "patch_field")]
    pub assigned_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub maintenance_category: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub sla_due_at: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub property_id: Option<i64>,
    pub assigned_to: Option<String>,
    pub q: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketPath {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApprovalInput {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[serde(rename = "type")]
    pub approval_type: String,
    #[serde(default = "default_status_pending")]
    pub status: String,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub amount: f64,
    pub ticket_id: Option<i64>,
    pub property_id: Option<i64>,
    pub requested_by: Option<String>,
    pub due_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApprovalInput {
    #[serde(rename = "type")]
    pub approval_type: Option<String>,
    pub status: Option<String>,
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "patch_field")]
    pub ticket_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub property_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub requested_by: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub due_at: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub approval_type: Option<String>,
    pub property_id: Option<i64>,
    pub requested_by: Option<String>,
    pub overdue: Option<bool>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalPath {
    pub approval_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateEventInput {
    #[validate(length(min = 1, max = 64))]
    pub event_type: String,
    pub property_id: i64,
    pub ticket_id: Option<i64>,
    pub approval_id: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEventInput {
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "patch_field")]
    pub property_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub ticket_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub approval_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub due_date: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub property_id: Option<i64>,
    pub event_type: Option<String>,
    pub ticket_id: Option<i64>,
    pub approval_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpcomingEventsQuery {
    pub property_id: Option<i64>,
    #[serde(default = "default_days_ahead")]
    pub days_ahead: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverdueEventsQuery {
    pub property_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPath {
    pub event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub actor: Option<String>,
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub source: Option<String>,
    pub risk_level: Option<String>,
    #[serde(default)]
    pub high_risk_only: bool,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub property_id: Option<i64>,
    pub technician: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPath {
    pub document_id: String,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{
        normalize_choice, normalize_maintenance_category, parse_utc_datetime, validate_input,
        CreatePropertyInput, UpdateUnitInput, TICKET_STATUSES,
    };
    use crate::error::AppError;

    #[test]
    fn patch_fields_distinguish_null_from_absent() {
        let absent: UpdateUnitInput = serde_json::from_value(json!({ "paid": true })).unwrap();
        assert_eq!(absent.rent_amount, None);
        assert_eq!(absent.paid, Some(true));

        let cleared: UpdateUnitInput =
            serde_json::from_value(json!({ "rent_amount": null, "rent_date": null })).unwrap();
        assert_eq!(cleared.rent_amount, Some(None));
        assert_eq!(cleared.rent_date, Some(None));

        let set: UpdateUnitInput =
            serde_json::from_value(json!({ "rent_amount": 1500.0 })).unwrap();
        assert_eq!(set.rent_amount, Some(Some(1500.0)));
    }

    #[test]
    fn naive_datetimes_are_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 31, 8, 30, 0).unwrap();
        assert_eq!(parse_utc_datetime("2026-01-31T08:30:00"), Some(expected));
        assert_eq!(parse_utc_datetime("2026-01-31 08:30:00"), Some(expected));
        assert_eq!(parse_utc_datetime("2026-01-31T08:30:00Z"), Some(expected));
        assert_eq!(parse_utc_datetime("2026-01-31T10:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_utc_datetime("2026-01-31"),
            Some(Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_utc_datetime("31/01/2026"), None);
        assert_eq!(parse_utc_datetime("  "), None);
    }

    #[test]
    fn choices_are_case_insensitive() {
        assert_eq!(
            normalize_choice("status", " In_Progress ", TICKET_STATUSES).unwrap(),
            "in_progress"
        );
        assert!(matches!(
            normalize_choice("status", "done", TICKET_STATUSES),
            Err(AppError::UnprocessableEntity(_))
        ));
    }

    #[test]
    fn maintenance_category_rules() {
        assert_eq!(
            normalize_maintenance_category("maintenance", Some("HVAC")).unwrap(),
            Some("hvac".to_string())
        );
        assert_eq!(normalize_maintenance_category("complaint", None).unwrap(), None);
        assert!(normalize_maintenance_category("complaint", Some("plumbing")).is_err());
        assert!(normalize_maintenance_category("maintenance", Some("roofing")).is_err());
    }

    #[test]
    fn negative_property_counts_fail_validation() {
        let input: CreatePropertyInput = serde_json::from_value(json!({
            "name": "Maple Court",
            "total_units": -2
        }))
        .unwrap();
        assert!(matches!(
            validate_input(&input),
            Err(AppError::UnprocessableEntity(_))
        ));

        let input: CreatePropertyInput =
            serde_json::from_value(json!({ "name": "Maple Court", "total_units": 4 })).unwrap();
        assert!(validate_input(&input).is_ok());
        assert_eq!(input.status, "healthy");
    }
}
