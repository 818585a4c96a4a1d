//! Rent lifecycle of a single unit.
//!
//! A unit is always in one of three phases:
//!
//! * `Vacant`: not occupied, no rent terms, never paid.
//! * `OccupiedUnpaid`: occupied with rent terms; overdue once the rent date
//!   has passed.
//! * `PaidPendingRollover`: occupied and marked paid. Writes produced by the
//!   ledger never leave a unit here, because marking rent paid closes the
//!   period immediately (see [`apply_rent_patch`]). Rows can only sit in this
//!   phase when created with `paid = true`.
//!
//! The pure functions below decide every transition; [`create_unit`] and
//! [`update_unit`] persist the outcome.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::{decode_row, RentPaymentRecord, UnitRecord};
use crate::repository::table_service::{
    create_row, create_row_tx, get_row, get_row_tx, map_db_error, update_row_tx,
};

pub const RULE_OCCUPIED_REQUIRES_RENT: &str =
    "rent_amount and rent_date are required when occupied is true";
pub const RULE_VACANT_NOT_PAID: &str = "paid cannot be true when occupied is false";
pub const RULE_VACANT_NO_RENT: &str =
    "rent_amount and rent_date must be null when occupied is false";
pub const RULE_PAID_CLOSES_BY_ROLLOVER: &str =
    "a paid period can only be closed by recording the payment (paid=true) or vacating the unit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Vacant,
    OccupiedUnpaid,
    PaidPendingRollover,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentState {
    pub occupied: bool,
    pub paid: bool,
    pub rent_amount: Option<f64>,
    pub rent_date: Option<DateTime<Utc>>,
}

impl RentState {
    pub fn vacant() -> Self {
        Self {
            occupied: false,
            paid: false,
            rent_amount: None,
            rent_date: None,
        }
    }

    pub fn phase(&self) -> UnitPhase {
        match (self.occupied, self.paid) {
            (false, _) => UnitPhase::Vacant,
            (true, false) => UnitPhase::OccupiedUnpaid,
            (true, true) => UnitPhase::PaidPendingRollover,
        }
    }

    /// Checks the occupancy rules, naming the first one that is broken.
    pub fn validate(&self) -> AppResult<()> {
        if self.occupied {
            if self.rent_amount.is_none() || self.rent_date.is_none() {
                return Err(AppError::InvalidState(RULE_OCCUPIED_REQUIRES_RENT.to_string()));
            }
            if self.rent_amount.is_some_and(|amount| amount < 0.0) {
                return Err(AppError::UnprocessableEntity(
                    "rent_amount must not be negative".to_string(),
                ));
            }
            return Ok(());
        }
        if self.paid {
            return Err(AppError::InvalidState(RULE_VACANT_NOT_PAID.to_string()));
        }
        if self.rent_amount.is_some() || self.rent_date.is_some() {
            return Err(AppError::InvalidState(RULE_VACANT_NO_RENT.to_string()));
        }
        Ok(())
    }

    pub fn is_over_due(&self, today: NaiveDate) -> bool {
        compute_over_due(self.occupied, self.paid, self.rent_date, today)
    }
}

impl From<&UnitRecord> for RentState {
    fn from(unit: &UnitRecord) -> Self {
        Self {
            occupied: unit.occupied,
            paid: unit.paid,
            rent_amount: unit.rent_amount,
            rent_date: unit.rent_date,
        }
    }
}

/// PATCH input for the rent fields. The outer `Option` is "was the key
/// sent", the inner one is the (nullable) value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RentPatch {
    pub occupied: Option<bool>,
    pub paid: Option<bool>,
    pub rent_amount: Option<Option<f64>>,
    pub rent_date: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentRollover {
    pub period_start: NaiveDate,
    pub amount: f64,
    pub paid_at: DateTime<Utc>,
    pub next_rent_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentTransition {
    pub state: RentState,
    pub over_due: bool,
    pub rollover: Option<RentRollover>,
}

pub fn compute_over_due(
    occupied: bool,
    paid: bool,
    rent_date: Option<DateTime<Utc>>,
    today: NaiveDate,
) -> bool {
    occupied && !paid && rent_date.is_some_and(|date| date.date_naive() < today)
}

/// First day of the billing month that `rent_date` falls in.
pub fn period_start(rent_date: DateTime<Utc>) -> NaiveDate {
    let date = rent_date.date_naive();
    date - Days::new(u64::from(date.day0()))
}

/// Same day next month at the same time, clamped to the month's last day.
pub fn add_one_month(rent_date: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    rent_date
        .checked_add_months(Months::new(1))
        .ok_or_else(|| AppError::BadRequest("rent_date is out of range.".to_string()))
}

/// Computes the state a unit moves to when `patch` is applied at `now`.
///
/// A unit that ends up vacant is normalized: `paid` and the rent terms are
/// cleared whatever the patch supplied.
pub fn apply_rent_patch(
    current: &RentState,
    patch: &RentPatch,
    now: DateTime<Utc>,
) -> AppResult<RentTransition> {
    let mut next = current.clone();
    if let Some(occupied) = patch.occupied {
        next.occupied = occupied;
    }
    if let Some(paid) = patch.paid {
        next.paid = paid;
    }
    if let Some(rent_amount) = patch.rent_amount {
        next.rent_amount = rent_amount;
    }
    if let Some(rent_date) = patch.rent_date {
        next.rent_date = rent_date;
    }

    if !next.occupied {
        return Ok(RentTransition {
            state: RentState::vacant(),
            over_due: false,
            rollover: None,
        });
    }

    let (Some(amount), Some(rent_date)) = (next.rent_amount, next.rent_date) else {
        return Err(AppError::InvalidState(RULE_OCCUPIED_REQUIRES_RENT.to_string()));
    };

    if current.phase() == UnitPhase::PaidPendingRollover && patch.paid == Some(false) {
        return Err(AppError::InvalidState(RULE_PAID_CLOSES_BY_ROLLOVER.to_string()));
    }

    let mut rollover = None;
    if patch.paid == Some(true) {
        let next_rent_date = add_one_month(rent_date)?;
        rollover = Some(RentRollover {
            period_start: period_start(rent_date),
            amount,
            paid_at: now,
            next_rent_date,
        });
        next.rent_date = Some(next_rent_date);
        next.paid = false;
    }

    next.validate()?;
    let over_due = next.is_over_due(now.date_naive());
    Ok(RentTransition {
        state: next,
        over_due,
        rollover,
    })
}

#[derive(Debug, Clone)]
pub struct NewUnit {
    pub property_id: i64,
    pub unit_number: i32,
    pub state: RentState,
}

#[derive(Debug, Clone)]
pub struct UnitUpdate {
    pub unit_number: Option<i32>,
    pub rent: RentPatch,
}

#[derive(Debug, Clone)]
pub struct UnitUpdateOutcome {
    pub unit: Value,
    pub payment: Option<RentPaymentRecord>,
}

pub async fn create_unit(pool: &PgPool, input: NewUnit, now: DateTime<Utc>) -> AppResult<Value> {
    input.state.validate()?;
    get_row(pool, "properties", &input.property_id.to_string(), "id")
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => {
                AppError::NotFound(format!("Property {} not found.", input.property_id))
            }
            other => other,
        })?;

    let mut record = rent_state_payload(&input.state, now);
    record.insert("property_id".to_string(), Value::from(input.property_id));
    record.insert("unit_number".to_string(), Value::from(input.unit_number));
    record.insert("created_at".to_string(), Value::String(now.to_rfc3339()));

    create_row(pool, "units", &record).await
}

/// Applies a PATCH to a unit. The unit row and the rent payment produced by
/// a rollover are written in one transaction.
pub async fn update_unit(
    pool: &PgPool,
    unit_id: &str,
    update: UnitUpdate,
    now: DateTime<Utc>,
) -> AppResult<UnitUpdateOutcome> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let current: UnitRecord = decode_row(get_row_tx(&mut tx, "units", unit_id, "id").await?)?;

    let transition = apply_rent_patch(&RentState::from(&current), &update.rent, now)?;

    let mut payment = None;
    if let Some(rollover) = &transition.rollover {
        let mut record = Map::new();
        record.insert("unit_id".to_string(), Value::from(current.id));
        record.insert("property_id".to_string(), Value::from(current.property_id));
        record.insert(
            "period_start".to_string(),
            Value::String(rollover.period_start.to_string()),
        );
        record.insert("amount".to_string(), Value::from(rollover.amount));
        record.insert("status".to_string(), Value::String("paid".to_string()));
        record.insert(
            "paid_at".to_string(),
            Value::String(rollover.paid_at.to_rfc3339()),
        );
        let created = create_row_tx(&mut tx, "rent_payments", &record).await?;
        payment = Some(decode_row::<RentPaymentRecord>(created)?);
    }

    let mut patch = rent_state_payload(&transition.state, now);
    if let Some(unit_number) = update.unit_number {
        patch.insert("unit_number".to_string(), Value::from(unit_number));
    }
    let updated = update_row_tx(&mut tx, "units", unit_id, &patch, "id").await?;
    tx.commit().await.map_err(map_db_error)?;

    if let Some(rollover) = &transition.rollover {
        tracing::info!(
            unit_id = current.id,
            property_id = current.property_id,
            period_start = %rollover.period_start,
            amount = rollover.amount,
            next_rent_date = %rollover.next_rent_date,
            "Rent period rolled over"
        );
    }

    Ok(UnitUpdateOutcome {
        unit: updated,
        payment,
    })
}

/// Recomputes `over_due` for every unit with the same predicate as
/// [`compute_over_due`]. Returns the number of rows whose flag changed.
pub async fn recompute_overdue_flags(pool: &PgPool, today: NaiveDate) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE units
         SET over_due = (occupied AND NOT paid AND rent_date IS NOT NULL
                         AND (rent_date AT TIME ZONE 'UTC')::date < $1),
             updated_at = now()
         WHERE over_due IS DISTINCT FROM
               (occupied AND NOT paid AND rent_date IS NOT NULL
                AND (rent_date AT TIME ZONE 'UTC')::date < $1)",
    )
    .bind(today)
    .execute(pool)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

fn rent_state_payload(state: &RentState, now: DateTime<Utc>) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("occupied".to_string(), Value::Bool(state.occupied));
    record.insert("paid".to_string(), Value::Bool(state.paid));
    record.insert(
        "rent_amount".to_string(),
        state.rent_amount.map(Value::from).unwrap_or(Value::Null),
    );
    record.insert(
        "rent_date".to_string(),
        state
            .rent_date
            .map(|date| Value::String(date.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    record.insert(
        "over_due".to_string(),
        Value::Bool(state.is_over_due(now.date_naive())),
    );
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
    record
}
