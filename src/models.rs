//! Typed views of the rows returned by `table_service`.
//!
//! Rows travel through the repository as `row_to_json` values; handlers that
//! need to reason about a row decode it into one of these records first.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropertyRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub total_units: i32,
    #[serde(default)]
    pub occupancy: i32,
    #[serde(default)]
    pub manager_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnitRecord {
    pub id: i64,
    pub property_id: i64,
    pub unit_number: i32,
    #[serde(default)]
    pub rent_amount: Option<f64>,
    #[serde(default)]
    pub rent_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occupied: bool,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub over_due: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RentPaymentRecord {
    pub id: i64,
    pub unit_id: i64,
    pub property_id: i64,
    pub period_start: NaiveDate,
    pub amount: f64,
    pub status: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TicketRecord {
    pub id: i64,
    pub property_id: i64,
    #[serde(rename = "type")]
    pub ticket_type: String,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    pub status: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub maintenance_category: Option<String>,
    #[serde(default)]
    pub sla_due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TicketRecord {
    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }

    /// Days between creation and the last update; only meaningful once closed.
    pub fn resolution_days(&self) -> Option<f64> {
        let updated_at = self.updated_at?;
        Some((updated_at - self.created_at).num_seconds() as f64 / 86_400.0)
    }

    pub fn is_past_sla(&self, now: DateTime<Utc>) -> bool {
        !self.is_closed() && self.sla_due_at.is_some_and(|due| due < now)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub approval_type: String,
    pub status: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub ticket_id: Option<i64>,
    #[serde(default)]
    pub property_id: Option<i64>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }

    /// When the expense was realized: the approval time, else creation.
    pub fn expensed_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditLogRecord {
    pub id: i64,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub actor_email: Option<String>,
    #[serde(default)]
    pub actor_role: Option<String>,
    pub action: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub property_id: Option<i64>,
    pub risk_level: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn decode_row<T: DeserializeOwned>(row: Value) -> AppResult<T> {
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(%error, "Could not decode database row");
        AppError::Internal(format!("Could not decode database row: {error}"))
    })
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{decode_row, ApprovalRecord, TicketRecord, UnitRecord};

    #[test]
    fn decodes_row_to_json_output() {
        let unit: UnitRecord = decode_row(json!({
            "id": 7,
            "property_id": 2,
            "unit_number": 3,
            "rent_amount": 1250.5,
            "rent_date": "2026-01-31T00:00:00+00:00",
            "occupied": true,
            "paid": false,
            "over_due": true,
            "created_at": "2026-01-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(unit.unit_number, 3);
        assert_eq!(unit.rent_amount, Some(1250.5));
        assert_eq!(
            unit.rent_date,
            Some(Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn ticket_resolution_and_sla() {
        let ticket: TicketRecord = decode_row(json!({
            "id": 1,
            "property_id": 1,
            "type": "maintenance",
            "status": "open",
            "sla_due_at": "2026-03-01T00:00:00+00:00",
            "created_at": "2026-02-01T00:00:00+00:00",
            "updated_at": "2026-02-03T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(ticket.resolution_days(), Some(2.5));
        assert!(ticket.is_past_sla(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()));
        assert!(!ticket.is_past_sla(Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap()));
    }

    #[test]
    fn approval_expense_falls_back_to_creation() {
        let approval: ApprovalRecord = decode_row(json!({
            "id": "APR-001",
            "type": "vendor_payment",
            "status": "approved",
            "amount": 300,
            "created_at": "2026-02-01T00:00:00+00:00",
            "updated_at": null
        }))
        .unwrap();
        assert_eq!(
            approval.expensed_at(),
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
        );
    }
}
