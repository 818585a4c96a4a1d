//! Report analytics built on demand from units, rent payments, tickets and
//! approvals.
//!
//! Every section is derived from one [`ReportScope`]: the date window, the
//! reference "now" and the filters are resolved once and passed down, so
//! the sections of a snapshot always agree with each other.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::{
    decode_rows, ApprovalRecord, PropertyRecord, RentPaymentRecord, TicketRecord, UnitRecord,
};
use crate::repository::table_service::fetch_all_rows;
use crate::schemas::parse_utc_datetime;

const CORE_TICKET_CATEGORIES: &[&str] = &["maintenance", "complaint", "refund", "task"];

#[derive(Debug, Clone, PartialEq)]
pub struct ReportScope {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub property_id: Option<i64>,
    pub technician: Option<String>,
}

impl ReportScope {
    /// Resolves the request window. Missing bounds default to the
    /// `default_days` ending at `now`; a date-only `end_date` covers the
    /// whole day.
    pub fn resolve(
        start_date: Option<&str>,
        end_date: Option<&str>,
        property_id: Option<i64>,
        technician: Option<&str>,
        now: DateTime<Utc>,
        default_days: i64,
    ) -> AppResult<Self> {
        let end = match non_empty(end_date) {
            Some(raw) => {
                let parsed = parse_bound("end_date", raw)?;
                if is_date_only(raw) {
                    parsed + Duration::days(1) - Duration::seconds(1)
                } else {
                    parsed
                }
            }
            None => now,
        };
        let start = match non_empty(start_date) {
            Some(raw) => parse_bound("start_date", raw)?,
            None => end - Duration::days(default_days.max(1)),
        };
        if start > end {
            return Err(AppError::BadRequest(
                "start_date must not be after end_date.".to_string(),
            ));
        }

        Ok(Self {
            start,
            end,
            now,
            property_id,
            technician: non_empty(technician).map(ToOwned::to_owned),
        })
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    /// The window of equal length immediately before this one.
    fn previous_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let length = self.end - self.start;
        (self.start - length, self.start)
    }

    fn includes_property(&self, property_id: Option<i64>) -> bool {
        match self.property_id {
            Some(expected) => property_id == Some(expected),
            None => true,
        }
    }

    fn includes_ticket(&self, ticket: &TicketRecord) -> bool {
        if !self.includes_property(Some(ticket.property_id)) {
            return false;
        }
        match &self.technician {
            Some(technician) => ticket.assigned_to.as_deref().map(str::trim) == Some(technician),
            None => true,
        }
    }
}

/// Raw rows the aggregator works from.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsDataset {
    pub properties: Vec<PropertyRecord>,
    pub units: Vec<UnitRecord>,
    pub payments: Vec<RentPaymentRecord>,
    pub tickets: Vec<TicketRecord>,
    pub approvals: Vec<ApprovalRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportAnalytics {
    pub range: ReportRange,
    pub summary: ReportSummary,
    pub revenue_trend: Vec<TrendPoint>,
    pub maintenance_breakdown: Vec<MaintenanceCategoryCost>,
    pub tickets_by_category: Vec<TicketCategoryStat>,
    pub property_performance: Vec<PropertyPerformance>,
    pub technician_performance: Vec<TechnicianPerformance>,
    pub outstanding_payments: Vec<OutstandingPayment>,
    pub tenant_analytics: Vec<TenantAnalytics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub property_id: Option<i64>,
    pub technician: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_revenue: f64,
    pub total_revenue_change_pct: Option<f64>,
    pub occupied_units: i64,
    pub total_units: i64,
    pub occupancy_rate_pct: f64,
    pub occupancy_display: String,
    pub avg_resolution_days: f64,
    pub avg_resolution_change_pct: Option<f64>,
    pub open_tickets: i64,
    pub overdue_tickets: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub month: String,
    pub month_start: NaiveDate,
    pub revenue: f64,
    pub expenses: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceCategoryCost {
    pub category: String,
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketCategoryStat {
    pub category: String,
    pub count: i64,
    pub avg_resolution_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyPerformance {
    pub property_id: i64,
    pub property_name: String,
    pub units: i64,
    pub revenue: f64,
    pub maintenance_cost: f64,
    pub occupancy_pct: f64,
    pub issues: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianPerformance {
    pub technician: String,
    pub tickets: i64,
    pub completed: i64,
    pub overdue: i64,
    pub avg_resolution_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutstandingPayment {
    pub unit_id: i64,
    pub property_id: i64,
    pub unit_label: String,
    pub amount_due: f64,
    pub days_overdue: Option<i64>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantAnalytics {
    pub label: String,
    pub maintenance_requests: i64,
    pub late_payments: i64,
    pub avg_resolution_days: f64,
}

/// Reads every row the scope can touch. Filters pushed to SQL only narrow
/// the read; [`build_report`] applies the scope again on its own.
pub async fn load_dataset(pool: &PgPool, scope: &ReportScope) -> AppResult<AnalyticsDataset> {
    let mut by_property = Map::new();
    if let Some(property_id) = scope.property_id {
        by_property.insert("property_id".to_string(), Value::from(property_id));
    }

    let mut property_filters = Map::new();
    if let Some(property_id) = scope.property_id {
        property_filters.insert("id".to_string(), Value::from(property_id));
    }

    let (previous_start, _) = scope.previous_window();
    let earliest_period = first_of_month(scope.start.date_naive()).min(previous_start.date_naive());
    let mut payment_filters = by_property.clone();
    payment_filters.insert("status".to_string(), Value::String("paid".to_string()));
    payment_filters.insert(
        "period_start__gte".to_string(),
        Value::String(earliest_period.to_string()),
    );
    payment_filters.insert(
        "period_start__lte".to_string(),
        Value::String(scope.end.date_naive().to_string()),
    );

    let mut ticket_filters = by_property.clone();
    if let Some(technician) = &scope.technician {
        ticket_filters.insert("assigned_to".to_string(), Value::String(technician.clone()));
    }

    let properties = fetch_all_rows(pool, "properties", Some(&property_filters), "id", true).await?;
    let units = fetch_all_rows(pool, "units", Some(&by_property), "unit_number", true).await?;
    let payments =
        fetch_all_rows(pool, "rent_payments", Some(&payment_filters), "period_start", true).await?;
    let tickets = fetch_all_rows(pool, "tickets", Some(&ticket_filters), "created_at", true).await?;
    let approvals = fetch_all_rows(pool, "approvals", Some(&by_property), "created_at", true).await?;

    Ok(AnalyticsDataset {
        properties: decode_rows(properties)?,
        units: decode_rows(units)?,
        payments: decode_rows(payments)?,
        tickets: decode_rows(tickets)?,
        approvals: decode_rows(approvals)?,
    })
}

pub fn build_report(dataset: &AnalyticsDataset, scope: &ReportScope) -> ReportAnalytics {
    let properties = dataset
        .properties
        .iter()
        .filter(|property| scope.includes_property(Some(property.id)))
        .collect::<Vec<_>>();
    let mut units = dataset
        .units
        .iter()
        .filter(|unit| scope.includes_property(Some(unit.property_id)))
        .collect::<Vec<_>>();
    units.sort_by_key(|unit| (unit.property_id, unit.unit_number, unit.id));
    let payments = dataset
        .payments
        .iter()
        .filter(|payment| payment.status == "paid")
        .filter(|payment| scope.includes_property(Some(payment.property_id)))
        .collect::<Vec<_>>();
    let tickets = dataset
        .tickets
        .iter()
        .filter(|ticket| scope.includes_ticket(ticket))
        .collect::<Vec<_>>();
    let approvals = dataset
        .approvals
        .iter()
        .filter(|approval| scope.includes_property(approval.property_id))
        .collect::<Vec<_>>();

    let names = properties
        .iter()
        .map(|property| (property.id, property.name.as_str()))
        .collect::<HashMap<_, _>>();

    ReportAnalytics {
        range: ReportRange {
            start_date: scope.start,
            end_date: scope.end,
            property_id: scope.property_id,
            technician: scope.technician.clone(),
            generated_at: scope.now,
        },
        summary: summary(scope, &properties, &units, &payments, &tickets),
        revenue_trend: revenue_trend(scope, &payments, &approvals),
        maintenance_breakdown: maintenance_breakdown(&tickets, &approvals),
        tickets_by_category: tickets_by_category(&tickets),
        property_performance: property_performance(&properties, &units, &tickets, &approvals),
        technician_performance: technician_performance(scope, &tickets),
        outstanding_payments: outstanding_payments(scope, &units, &names),
        tenant_analytics: tenant_analytics(scope, &properties, &units, &tickets, &approvals),
    }
}

fn summary(
    scope: &ReportScope,
    properties: &[&PropertyRecord],
    units: &[&UnitRecord],
    payments: &[&RentPaymentRecord],
    tickets: &[&TicketRecord],
) -> ReportSummary {
    let start = scope.start.date_naive();
    let end = scope.end.date_naive();
    let total_revenue = sum_payments(payments, |period| period >= start && period <= end);

    let (previous_start, previous_end) = scope.previous_window();
    let previous_revenue = sum_payments(payments, |period| {
        period >= previous_start.date_naive() && period < start
    });

    let occupied_units = units.iter().filter(|unit| unit.occupied).count() as i64;
    let total_units = properties
        .iter()
        .map(|property| i64::from(property.total_units.max(0)))
        .sum::<i64>();
    let occupancy_rate_pct = percentage(occupied_units as f64, total_units as f64, 1);

    let closed = tickets.iter().copied().filter(|ticket| ticket.is_closed());
    let avg_resolution_days =
        round1(mean(closed.clone().filter_map(TicketRecord::resolution_days)).unwrap_or(0.0));
    let closed_between = |from: DateTime<Utc>, to: DateTime<Utc>, inclusive: bool| {
        mean(
            closed
                .clone()
                .filter(|ticket| {
                    ticket.updated_at.is_some_and(|updated| {
                        updated >= from && if inclusive { updated <= to } else { updated < to }
                    })
                })
                .filter_map(TicketRecord::resolution_days),
        )
    };
    let current_resolution = closed_between(scope.start, scope.end, true);
    let previous_resolution = closed_between(previous_start, previous_end, false);

    let open_tickets = tickets.iter().filter(|ticket| !ticket.is_closed()).count() as i64;
    let overdue_tickets = tickets
        .iter()
        .filter(|ticket| ticket.is_past_sla(scope.now))
        .count() as i64;

    ReportSummary {
        total_revenue: round2(total_revenue),
        total_revenue_change_pct: change_pct(total_revenue, previous_revenue),
        occupied_units,
        total_units,
        occupancy_rate_pct,
        occupancy_display: format!("{occupied_units} of {total_units} units occupied"),
        avg_resolution_days,
        avg_resolution_change_pct: current_resolution
            .zip(previous_resolution)
            .and_then(|(current, previous)| change_pct(current, previous)),
        open_tickets,
        overdue_tickets,
    }
}

fn revenue_trend(
    scope: &ReportScope,
    payments: &[&RentPaymentRecord],
    approvals: &[&ApprovalRecord],
) -> Vec<TrendPoint> {
    month_starts(scope.start.date_naive(), scope.end.date_naive())
        .into_iter()
        .map(|month_start| {
            let in_month = |date: NaiveDate| {
                date.year() == month_start.year() && date.month() == month_start.month()
            };
            let revenue = sum_payments(payments, in_month);
            let expenses = total(
                approvals
                    .iter()
                    .filter(|approval| approval.is_approved())
                    .filter(|approval| scope.contains(approval.expensed_at()))
                    .filter(|approval| in_month(approval.expensed_at().date_naive()))
                    .map(|approval| approval.amount),
            );
            TrendPoint {
                month: month_start.format("%b %Y").to_string(),
                month_start,
                revenue: round2(revenue),
                expenses: round2(expenses),
            }
        })
        .collect()
}

fn maintenance_breakdown(
    tickets: &[&TicketRecord],
    approvals: &[&ApprovalRecord],
) -> Vec<MaintenanceCategoryCost> {
    let maintenance = tickets
        .iter()
        .filter(|ticket| ticket.ticket_type == "maintenance")
        .map(|ticket| (ticket.id, *ticket))
        .collect::<HashMap<_, _>>();

    let mut totals = BTreeMap::<String, f64>::new();
    for approval in approvals.iter().filter(|approval| approval.is_approved()) {
        let Some(ticket) = approval
            .ticket_id
            .and_then(|ticket_id| maintenance.get(&ticket_id))
        else {
            continue;
        };
        let category = ticket
            .maintenance_category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("other");
        *totals.entry(category.to_string()).or_default() += approval.amount;
    }

    let grand_total = total(totals.values().copied());
    let mut rows = totals
        .into_iter()
        .map(|(category, amount)| MaintenanceCategoryCost {
            percentage: percentage(amount, grand_total, 1),
            amount: round2(amount),
            category,
        })
        .collect::<Vec<_>>();
    rows.sort_by(|left, right| {
        right
            .amount
            .total_cmp(&left.amount)
            .then_with(|| left.category.cmp(&right.category))
    });
    rows
}

fn tickets_by_category(tickets: &[&TicketRecord]) -> Vec<TicketCategoryStat> {
    let mut closed = BTreeMap::<String, (i64, Vec<f64>)>::new();
    for category in CORE_TICKET_CATEGORIES {
        closed.entry((*category).to_string()).or_default();
    }
    for ticket in tickets.iter().filter(|ticket| ticket.is_closed()) {
        let (count, days) = closed.entry(ticket.ticket_type.clone()).or_default();
        *count += 1;
        days.extend(ticket.resolution_days());
    }

    let mut rows = closed
        .into_iter()
        .map(|(category, (count, days))| TicketCategoryStat {
            count,
            avg_resolution_days: round1(mean(days.into_iter()).unwrap_or(0.0)),
            category,
        })
        .collect::<Vec<_>>();
    rows.sort_by_key(|row| {
        let rank = CORE_TICKET_CATEGORIES
            .iter()
            .position(|core| *core == row.category)
            .unwrap_or(CORE_TICKET_CATEGORIES.len());
        (rank, row.category.clone())
    });
    rows
}

fn property_performance(
    properties: &[&PropertyRecord],
    units: &[&UnitRecord],
    tickets: &[&TicketRecord],
    approvals: &[&ApprovalRecord],
) -> Vec<PropertyPerformance> {
    properties
        .iter()
        .map(|property| {
            let own_units = units
                .iter()
                .filter(|unit| unit.property_id == property.id)
                .collect::<Vec<_>>();
            let unit_count = own_units.len() as i64;
            let occupied = own_units.iter().filter(|unit| unit.occupied).count() as i64;
            let revenue = total(
                own_units
                    .iter()
                    .filter(|unit| unit.occupied)
                    .filter_map(|unit| unit.rent_amount),
            );
            let approved_cost = total(
                approvals
                    .iter()
                    .filter(|approval| approval.property_id == Some(property.id))
                    .filter(|approval| approval.is_approved())
                    .map(|approval| approval.amount),
            );
            let maintenance_cost = if unit_count > 0 {
                approved_cost / unit_count as f64
            } else {
                approved_cost
            };
            let issues = tickets
                .iter()
                .filter(|ticket| ticket.property_id == property.id && !ticket.is_closed())
                .count() as i64;

            PropertyPerformance {
                property_id: property.id,
                property_name: property.name.clone(),
                units: unit_count,
                revenue: round2(revenue),
                maintenance_cost: round2(maintenance_cost),
                occupancy_pct: percentage(occupied as f64, unit_count as f64, 1),
                issues,
            }
        })
        .collect()
}

fn technician_performance(
    scope: &ReportScope,
    tickets: &[&TicketRecord],
) -> Vec<TechnicianPerformance> {
    let mut by_technician = BTreeMap::<String, Vec<&TicketRecord>>::new();
    for ticket in tickets {
        let Some(name) = ticket
            .assigned_to
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        by_technician.entry(name.to_string()).or_default().push(ticket);
    }

    by_technician
        .into_iter()
        .map(|(technician, assigned)| {
            let completed = assigned.iter().filter(|ticket| ticket.is_closed()).count() as i64;
            let overdue = assigned
                .iter()
                .filter(|ticket| ticket.is_past_sla(scope.now))
                .count() as i64;
            let avg = mean(
                assigned
                    .iter()
                    .filter(|ticket| ticket.is_closed())
                    .filter_map(|ticket| ticket.resolution_days()),
            );
            TechnicianPerformance {
                technician,
                tickets: assigned.len() as i64,
                completed,
                overdue,
                avg_resolution_days: round1(avg.unwrap_or(0.0)),
            }
        })
        .collect()
}

fn outstanding_payments(
    scope: &ReportScope,
    units: &[&UnitRecord],
    names: &HashMap<i64, &str>,
) -> Vec<OutstandingPayment> {
    let today = scope.today();
    units
        .iter()
        .map(|unit| {
            let days_overdue = days_overdue(unit, today);
            let amount_due = if unit.paid {
                0.0
            } else {
                unit.rent_amount.unwrap_or(0.0)
            };
            OutstandingPayment {
                unit_id: unit.id,
                property_id: unit.property_id,
                unit_label: format!(
                    "{} Unit {}",
                    property_label(names, unit.property_id),
                    unit.unit_number
                ),
                amount_due: round2(amount_due),
                days_overdue,
                status: aging_bucket(unit.occupied, unit.paid, days_overdue).to_string(),
            }
        })
        .collect()
}

fn tenant_analytics(
    scope: &ReportScope,
    properties: &[&PropertyRecord],
    units: &[&UnitRecord],
    tickets: &[&TicketRecord],
    approvals: &[&ApprovalRecord],
) -> Vec<TenantAnalytics> {
    let property_ids = properties
        .iter()
        .map(|property| property.id)
        .collect::<HashSet<_>>();

    let label = match scope.property_id {
        Some(property_id) => properties
            .iter()
            .find(|property| property.id == property_id)
            .map(|property| property.name.clone())
            .unwrap_or_else(|| format!("Property {property_id}")),
        None => "All Properties".to_string(),
    };
    let maintenance_requests = approvals
        .iter()
        .filter(|approval| {
            approval
                .property_id
                .is_some_and(|property_id| property_ids.contains(&property_id))
        })
        .count() as i64;
    let today = scope.today();
    let late_payments = units
        .iter()
        .filter(|unit| days_overdue(unit, today).is_some())
        .count() as i64;
    let avg = mean(
        tickets
            .iter()
            .filter(|ticket| property_ids.contains(&ticket.property_id) && ticket.is_closed())
            .filter_map(|ticket| ticket.resolution_days()),
    );

    vec![TenantAnalytics {
        label,
        maintenance_requests,
        late_payments,
        avg_resolution_days: round1(avg.unwrap_or(0.0)),
    }]
}

/// Whole days past the rent date, for occupied units that have not paid.
pub fn days_overdue(unit: &UnitRecord, today: NaiveDate) -> Option<i64> {
    if !unit.occupied || unit.paid {
        return None;
    }
    let rent_date = unit.rent_date?.date_naive();
    let days = (today - rent_date).num_days();
    (days > 0).then_some(days)
}

pub fn aging_bucket(occupied: bool, paid: bool, days_overdue: Option<i64>) -> &'static str {
    if paid {
        return "Paid";
    }
    if !occupied {
        return "Vacant";
    }
    match days_overdue {
        None | Some(0) => "Current",
        Some(days) if days < 10 => "1-10 days",
        Some(days) if days <= 30 => "10-30 days",
        Some(_) => "30+ days",
    }
}

fn property_label(names: &HashMap<i64, &str>, property_id: i64) -> String {
    names
        .get(&property_id)
        .map(|name| (*name).to_string())
        .unwrap_or_else(|| format!("Property {property_id}"))
}

/// First day of every calendar month that intersects `[start, end]`.
fn month_starts(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let mut cursor = first_of_month(start);
    while cursor <= end {
        months.push(cursor);
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    months
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

fn sum_payments<F>(payments: &[&RentPaymentRecord], include: F) -> f64
where
    F: Fn(NaiveDate) -> bool,
{
    total(
        payments
            .iter()
            .filter(|payment| include(payment.period_start))
            .map(|payment| payment.amount),
    )
}

/// Sums from +0.0; an empty `f64` `Sum` yields -0.0.
fn total<I>(values: I) -> f64
where
    I: Iterator<Item = f64>,
{
    values.fold(0.0, |acc, value| acc + value)
}

fn mean<I>(values: I) -> Option<f64>
where
    I: Iterator<Item = f64>,
{
    let (total, count) = values.fold((0.0, 0_u32), |(total, count), value| {
        (total + value, count + 1)
    });
    (count > 0).then(|| total / f64::from(count))
}

fn change_pct(current: f64, previous: f64) -> Option<f64> {
    if previous.abs() < f64::EPSILON {
        return None;
    }
    Some(round1((current - previous) / previous * 100.0))
}

fn percentage(part: f64, whole: f64, decimals: i32) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    let factor = 10_f64.powi(decimals);
    (part / whole * 100.0 * factor).round() / factor + 0.0
}

// Adding +0.0 folds a negative zero from rounding back to +0.0.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0 + 0.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

fn is_date_only(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").is_ok()
}

fn parse_bound(field: &str, raw: &str) -> AppResult<DateTime<Utc>> {
    parse_utc_datetime(raw).ok_or_else(|| {
        AppError::BadRequest(format!("{field} must be an ISO-8601 date or datetime."))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    use super::{
        aging_bucket, build_report, days_overdue, month_starts, AnalyticsDataset, ReportScope,
    };
    use crate::error::AppError;
    use crate::models::{
        ApprovalRecord, PropertyRecord, RentPaymentRecord, TicketRecord, UnitRecord,
    };

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn property(id: i64, name: &str, total_units: i32) -> PropertyRecord {
        PropertyRecord {
            id,
            name: name.to_string(),
            address: None,
            city: None,
            state: None,
            zip: None,
            total_units,
            occupancy: 0,
            manager_name: None,
            status: Some("healthy".to_string()),
        }
    }

    fn unit(
        id: i64,
        property_id: i64,
        unit_number: i32,
        rent: Option<(f64, DateTime<Utc>)>,
        paid: bool,
    ) -> UnitRecord {
        UnitRecord {
            id,
            property_id,
            unit_number,
            rent_amount: rent.map(|(amount, _)| amount),
            rent_date: rent.map(|(_, date)| date),
            occupied: rent.is_some(),
            paid,
            over_due: false,
        }
    }

    fn payment(id: i64, property_id: i64, period_start: NaiveDate, amount: f64) -> RentPaymentRecord {
        RentPaymentRecord {
            id,
            unit_id: id,
            property_id,
            period_start,
            amount,
            status: "paid".to_string(),
            paid_at: at(2026, 1, 1),
        }
    }

    fn ticket(id: i64, property_id: i64, ticket_type: &str, status: &str) -> TicketRecord {
        TicketRecord {
            id,
            property_id,
            ticket_type: ticket_type.to_string(),
            issue: Some("Leak".to_string()),
            priority: Some("medium".to_string()),
            status: status.to_string(),
            assigned_to: None,
            maintenance_category: None,
            sla_due_at: None,
            created_at: at(2026, 1, 1),
            updated_at: Some(at(2026, 1, 3)),
        }
    }

    fn approval(id: &str, property_id: i64, ticket_id: Option<i64>, amount: f64) -> ApprovalRecord {
        ApprovalRecord {
            id: id.to_string(),
            approval_type: "vendor_payment".to_string(),
            status: "approved".to_string(),
            amount,
            ticket_id,
            property_id: Some(property_id),
            requested_by: None,
            due_at: None,
            created_at: at(2026, 1, 10),
            updated_at: Some(at(2026, 2, 5)),
        }
    }

    fn scope(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> ReportScope {
        ReportScope {
            start,
            end,
            now,
            property_id: None,
            technician: None,
        }
    }

    #[test]
    fn resolves_default_window() {
        let now = at(2026, 4, 1);
        let scope = ReportScope::resolve(None, None, None, None, now, 90).unwrap();
        assert_eq!(scope.end, now);
        assert_eq!(scope.start, now - Duration::days(90));
    }

    #[test]
    fn date_only_end_covers_whole_day() {
        let scope = ReportScope::resolve(
            Some("2026-01-01"),
            Some("2026-01-31"),
            Some(2),
            Some(" Sam "),
            at(2026, 4, 1),
            90,
        )
        .unwrap();
        assert_eq!(scope.start, at(2026, 1, 1));
        assert_eq!(
            scope.end,
            Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap()
        );
        assert_eq!(scope.technician.as_deref(), Some("Sam"));
    }

    #[test]
    fn rejects_malformed_or_inverted_ranges() {
        let now = at(2026, 4, 1);
        assert!(matches!(
            ReportScope::resolve(Some("01/02/2026"), None, None, None, now, 90),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            ReportScope::resolve(Some("2026-03-01"), Some("2026-02-01"), None, None, now, 90),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn occupancy_uses_property_totals() {
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 4)],
            units: vec![
                unit(1, 1, 1, Some((1000.0, at(2026, 3, 1))), false),
                unit(2, 1, 2, Some((1000.0, at(2026, 3, 1))), false),
                unit(3, 1, 3, Some((1000.0, at(2026, 3, 1))), false),
                unit(4, 1, 4, None, false),
            ],
            ..AnalyticsDataset::default()
        };
        let report = build_report(&dataset, &scope(at(2026, 1, 1), at(2026, 3, 31), at(2026, 3, 1)));
        assert_eq!(report.summary.occupancy_rate_pct, 75.0);
        assert_eq!(report.summary.occupancy_display, "3 of 4 units occupied");
    }

    #[test]
    fn trend_uses_each_months_own_payments() {
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 2)],
            payments: vec![
                payment(1, 1, date(2026, 1, 1), 1000.0),
                payment(2, 1, date(2026, 1, 1), 500.0),
                payment(3, 1, date(2026, 3, 1), 1200.0),
            ],
            approvals: vec![approval("APR-1", 1, None, 250.0)],
            ..AnalyticsDataset::default()
        };
        let report = build_report(
            &dataset,
            &scope(at(2026, 1, 1), at(2026, 3, 31), at(2026, 4, 1)),
        );

        let months = report
            .revenue_trend
            .iter()
            .map(|point| (point.month.as_str(), point.revenue, point.expenses))
            .collect::<Vec<_>>();
        assert_eq!(
            months,
            vec![
                ("Jan 2026", 1500.0, 0.0),
                ("Feb 2026", 0.0, 250.0),
                ("Mar 2026", 1200.0, 0.0),
            ]
        );
        assert_eq!(report.summary.total_revenue, 2700.0);
    }

    #[test]
    fn trend_expenses_stop_at_the_window_end() {
        let mut late = approval("APR-2", 1, None, 400.0);
        late.updated_at = Some(at(2026, 2, 20));
        let mut early = approval("APR-3", 1, None, 75.0);
        early.updated_at = Some(at(2026, 2, 3));
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 2)],
            approvals: vec![late, early],
            ..AnalyticsDataset::default()
        };
        let report = build_report(
            &dataset,
            &scope(at(2026, 1, 15), at(2026, 2, 10), at(2026, 3, 1)),
        );

        let feb = report
            .revenue_trend
            .iter()
            .find(|point| point.month == "Feb 2026")
            .unwrap();
        assert_eq!(feb.expenses, 75.0);
    }

    #[test]
    fn revenue_change_compares_previous_window() {
        let dataset = AnalyticsDataset {
            payments: vec![
                payment(1, 1, date(2026, 2, 1), 1000.0),
                payment(2, 1, date(2026, 3, 1), 1500.0),
            ],
            ..AnalyticsDataset::default()
        };
        let report = build_report(
            &dataset,
            &scope(at(2026, 3, 1), at(2026, 3, 29), at(2026, 3, 30)),
        );
        assert_eq!(report.summary.total_revenue, 1500.0);
        assert_eq!(report.summary.total_revenue_change_pct, Some(50.0));

        let empty = build_report(
            &AnalyticsDataset::default(),
            &scope(at(2026, 3, 1), at(2026, 3, 29), at(2026, 3, 30)),
        );
        assert_eq!(empty.summary.total_revenue_change_pct, None);
    }

    #[test]
    fn month_iteration_covers_partial_months() {
        assert_eq!(
            month_starts(date(2025, 12, 15), date(2026, 2, 1)),
            vec![date(2025, 12, 1), date(2026, 1, 1), date(2026, 2, 1)]
        );
        assert_eq!(month_starts(date(2026, 5, 3), date(2026, 5, 9)), vec![date(2026, 5, 1)]);
    }

    #[test]
    fn aging_buckets() {
        assert_eq!(aging_bucket(true, true, None), "Paid");
        assert_eq!(aging_bucket(false, false, None), "Vacant");
        assert_eq!(aging_bucket(true, false, None), "Current");
        assert_eq!(aging_bucket(true, false, Some(5)), "1-10 days");
        assert_eq!(aging_bucket(true, false, Some(10)), "10-30 days");
        assert_eq!(aging_bucket(true, false, Some(15)), "10-30 days");
        assert_eq!(aging_bucket(true, false, Some(30)), "10-30 days");
        assert_eq!(aging_bucket(true, false, Some(35)), "30+ days");
    }

    #[test]
    fn outstanding_payments_label_and_age_units() {
        let now = at(2026, 3, 20);
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 3)],
            units: vec![
                unit(3, 1, 3, Some((900.0, at(2026, 2, 13))), false),
                unit(1, 1, 1, Some((1000.0, at(2026, 3, 5))), false),
                unit(2, 1, 2, Some((1100.0, at(2026, 3, 1))), true),
            ],
            ..AnalyticsDataset::default()
        };
        let report = build_report(&dataset, &scope(at(2026, 1, 1), now, now));
        let rows = report
            .outstanding_payments
            .iter()
            .map(|row| {
                (
                    row.unit_label.as_str(),
                    row.amount_due,
                    row.days_overdue,
                    row.status.as_str(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                ("Maple Court Unit 1", 1000.0, Some(15), "10-30 days"),
                ("Maple Court Unit 2", 0.0, None, "Paid"),
                ("Maple Court Unit 3", 900.0, Some(35), "30+ days"),
            ]
        );
        assert_eq!(report.tenant_analytics[0].late_payments, 2);
        assert_eq!(report.tenant_analytics[0].label, "All Properties");
    }

    #[test]
    fn days_overdue_ignores_future_and_vacant_units() {
        let today = date(2026, 3, 20);
        assert_eq!(
            days_overdue(&unit(1, 1, 1, Some((10.0, at(2026, 3, 25))), false), today),
            None
        );
        assert_eq!(days_overdue(&unit(1, 1, 1, None, false), today), None);
        assert_eq!(
            days_overdue(&unit(1, 1, 1, Some((10.0, at(2026, 3, 19))), false), today),
            Some(1)
        );
    }

    #[test]
    fn maintenance_costs_group_by_category() {
        let mut plumbing = ticket(1, 1, "maintenance", "closed");
        plumbing.maintenance_category = Some("plumbing".to_string());
        let uncategorized = ticket(2, 1, "maintenance", "open");
        let complaint = ticket(3, 1, "complaint", "open");

        let mut rejected = approval("APR-4", 1, Some(1), 999.0);
        rejected.status = "rejected".to_string();

        let dataset = AnalyticsDataset {
            tickets: vec![plumbing, uncategorized, complaint],
            approvals: vec![
                approval("APR-1", 1, Some(1), 300.0),
                approval("APR-2", 1, Some(2), 100.0),
                approval("APR-3", 1, Some(3), 50.0),
                rejected,
            ],
            ..AnalyticsDataset::default()
        };
        let report = build_report(&dataset, &scope(at(2026, 1, 1), at(2026, 3, 31), at(2026, 4, 1)));
        let rows = report
            .maintenance_breakdown
            .iter()
            .map(|row| (row.category.as_str(), row.amount, row.percentage))
            .collect::<Vec<_>>();
        assert_eq!(rows, vec![("plumbing", 300.0, 75.0), ("other", 100.0, 25.0)]);
    }

    #[test]
    fn ticket_categories_always_include_core_types() {
        let dataset = AnalyticsDataset {
            tickets: vec![
                ticket(1, 1, "complaint", "closed"),
                ticket(2, 1, "complaint", "open"),
                ticket(3, 1, "inspection", "closed"),
            ],
            ..AnalyticsDataset::default()
        };
        let report = build_report(&dataset, &scope(at(2026, 1, 1), at(2026, 3, 31), at(2026, 4, 1)));
        let rows = report
            .tickets_by_category
            .iter()
            .map(|row| (row.category.as_str(), row.count, row.avg_resolution_days))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                ("maintenance", 0, 0.0),
                ("complaint", 1, 2.0),
                ("refund", 0, 0.0),
                ("task", 0, 0.0),
                ("inspection", 1, 2.0),
            ]
        );
    }

    #[test]
    fn technician_filter_narrows_ticket_metrics() {
        let now = at(2026, 3, 1);
        let mut sam_open = ticket(1, 1, "maintenance", "open");
        sam_open.assigned_to = Some("Sam".to_string());
        sam_open.sla_due_at = Some(at(2026, 2, 1));
        let mut sam_closed = ticket(2, 1, "maintenance", "closed");
        sam_closed.assigned_to = Some("Sam".to_string());
        let mut alex_open = ticket(3, 1, "task", "open");
        alex_open.assigned_to = Some("Alex".to_string());

        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 1)],
            tickets: vec![sam_open, sam_closed, alex_open],
            ..AnalyticsDataset::default()
        };

        let everyone = build_report(&dataset, &scope(at(2026, 1, 1), now, now));
        assert_eq!(everyone.summary.open_tickets, 2);
        assert_eq!(everyone.technician_performance.len(), 2);
        assert_eq!(everyone.technician_performance[0].technician, "Alex");

        let mut sam_only = scope(at(2026, 1, 1), now, now);
        sam_only.technician = Some("Sam".to_string());
        let report = build_report(&dataset, &sam_only);
        assert_eq!(report.summary.open_tickets, 1);
        assert_eq!(report.summary.overdue_tickets, 1);
        let sam = &report.technician_performance[0];
        assert_eq!(report.technician_performance.len(), 1);
        assert_eq!((sam.tickets, sam.completed, sam.overdue), (2, 1, 1));
        assert_eq!(sam.avg_resolution_days, 2.0);
        assert_eq!(report.property_performance[0].issues, 1);
    }

    #[test]
    fn property_filter_scopes_every_section() {
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 2), property(2, "Oak Plaza", 1)],
            units: vec![
                unit(1, 1, 1, Some((1000.0, at(2026, 3, 1))), false),
                unit(2, 1, 2, None, false),
                unit(3, 2, 1, Some((800.0, at(2026, 3, 1))), false),
            ],
            payments: vec![
                payment(1, 1, date(2026, 2, 1), 1000.0),
                payment(2, 2, date(2026, 2, 1), 800.0),
            ],
            approvals: vec![approval("APR-1", 1, None, 400.0), approval("APR-2", 2, None, 90.0)],
            ..AnalyticsDataset::default()
        };
        let mut scoped = scope(at(2026, 1, 1), at(2026, 3, 31), at(2026, 3, 2));
        scoped.property_id = Some(1);
        let report = build_report(&dataset, &scoped);

        assert_eq!(report.summary.total_revenue, 1000.0);
        assert_eq!(report.summary.occupancy_display, "1 of 2 units occupied");
        assert_eq!(report.property_performance.len(), 1);
        let performance = &report.property_performance[0];
        assert_eq!(performance.revenue, 1000.0);
        assert_eq!(performance.maintenance_cost, 200.0);
        assert_eq!(performance.occupancy_pct, 50.0);
        assert_eq!(report.outstanding_payments.len(), 2);
        assert_eq!(report.tenant_analytics[0].label, "Maple Court");
        assert_eq!(report.tenant_analytics[0].maintenance_requests, 1);
    }

    #[test]
    fn empty_data_yields_empty_sections() {
        let report = build_report(
            &AnalyticsDataset::default(),
            &scope(at(2026, 1, 1), at(2026, 1, 31), at(2026, 2, 1)),
        );
        assert_eq!(report.summary.total_revenue, 0.0);
        assert_eq!(report.summary.occupancy_rate_pct, 0.0);
        assert_eq!(report.summary.occupancy_display, "0 of 0 units occupied");
        assert_eq!(report.summary.avg_resolution_days, 0.0);
        assert_eq!(report.revenue_trend.len(), 1);
        assert!(report.maintenance_breakdown.is_empty());
        assert_eq!(report.tickets_by_category.len(), 4);
        assert!(report.property_performance.is_empty());
        assert!(report.technician_performance.is_empty());
        assert!(report.outstanding_payments.is_empty());
        assert_eq!(report.tenant_analytics.len(), 1);
    }

    #[test]
    fn empty_totals_are_positive_zero() {
        let dataset = AnalyticsDataset {
            properties: vec![property(1, "Maple Court", 0)],
            ..AnalyticsDataset::default()
        };
        let report = build_report(
            &dataset,
            &scope(at(2026, 1, 1), at(2026, 1, 31), at(2026, 2, 1)),
        );

        assert!(report.summary.total_revenue.is_sign_positive());
        assert!(report.summary.avg_resolution_days.is_sign_positive());
        let jan = &report.revenue_trend[0];
        assert!(jan.revenue.is_sign_positive());
        assert!(jan.expenses.is_sign_positive());
        let performance = &report.property_performance[0];
        assert!(performance.revenue.is_sign_positive());
        assert!(performance.maintenance_cost.is_sign_positive());
        assert_eq!(format!("{:.2}", report.summary.total_revenue), "0.00");
    }
}
