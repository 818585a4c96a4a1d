use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "approvals",
    "audit_logs",
    "documents",
    "events",
    "properties",
    "rent_payments",
    "tickets",
    "units",
];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = select_query(table, filters, order_by, ascending)?;
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

/// Unpaginated read used by reporting, which must see every matching row.
pub async fn fetch_all_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let mut query = select_query(table, filters, order_by, ascending)?;
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = select_by_id_query(table_name, row_id, id_field)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_single(row).ok_or_else(|| not_found(table_name))
}

/// Same as `get_row` but reads through an open transaction.
pub async fn get_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = select_by_id_query(table_name, row_id, id_field)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    read_single(row).ok_or_else(|| not_found(table_name))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = insert_query(table_name, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_single(row)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

/// Same as `create_row` but executes within an existing transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = insert_query(table_name, payload)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    read_single(row)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = update_query(table_name, row_id, payload, id_field)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_single(row).ok_or_else(|| not_found(table_name))
}

/// Same as `update_row` but executes within an existing transaction.
pub async fn update_row_tx(
    conn: &mut PgConnection,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = update_query(table_name, row_id, payload, id_field)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    read_single(row).ok_or_else(|| not_found(table_name))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    read_single(row).ok_or_else(|| not_found(table_name))
}

/// Deletes every row matching `filters` inside a transaction and returns
/// how many were removed. An empty filter map is rejected.
pub async fn delete_rows_tx(
    conn: &mut PgConnection,
    table: &str,
    filters: &Map<String, Value>,
) -> Result<u64, AppError> {
    let table_name = validate_table(table)?;
    if filters.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Refusing to delete every {table_name} record."
        )));
    }

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    for (key, value) in filters {
        push_filter_clause(&mut query, key, value)?;
    }

    let result = query
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;

    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

fn select_query(
    table: &str,
    filters: Option<&Map<String, Value>>,
    order_by: &str,
    ascending: bool,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    // A comma-separated order key sorts by each column in turn.
    let order_names = if order_by.trim().is_empty() {
        vec!["created_at"]
    } else {
        order_by
            .split(',')
            .map(validate_identifier)
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let direction = if ascending { " ASC" } else { " DESC" };
    query.push(" ORDER BY ");
    for name in order_names {
        query.push("t.").push(name).push(direction).push(", ");
    }
    query.push("t.id ASC");
    Ok(query)
}

fn select_by_id_query(
    table_name: &str,
    row_id: &str,
    id_field: &str,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let id_name = validate_identifier(id_field)?;
    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.push(" LIMIT 1");
    Ok(query)
}

// jsonb_populate_record lets PostgreSQL resolve column types (numeric,
// timestamptz, date, boolean) from the table definition.
fn insert_query(
    table_name: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");
    Ok(query)
}

fn update_query(
    table_name: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_id_filter(&mut query, id_name, row_id);
    query.push(" RETURNING row_to_json(t) AS row");
    Ok(query)
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_id_filter(query: &mut QueryBuilder<Postgres>, id_name: &str, row_id: &str) {
    query
        .push("t.")
        .push(id_name)
        .push("::text = ")
        .push_bind(row_id.trim().to_string());
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn read_single(row: Option<PgRow>) -> Option<Value> {
    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
}

fn not_found(table_name: &str) -> AppError {
    AppError::NotFound(format!("{table_name} record not found."))
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let mut chars = trimmed.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && chars.all(|rest| rest.is_ascii_lowercase() || rest.is_ascii_digit() || rest == '_');
    if valid {
        return Ok(trimmed);
    }
    Err(AppError::BadRequest(format!(
        "Invalid identifier '{trimmed}'."
    )))
}

/// A single bound filter value, typed from the column it targets.
#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

impl ScalarFilter {
    /// Strings aimed at timestamp or date columns bind as those types so
    /// range comparisons are not done on text.
    fn infer(column: &str, value: &Value) -> Self {
        match value {
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number
                .as_i64()
                .map(Self::I64)
                .or_else(|| number.as_f64().map(Self::F64))
                .unwrap_or_else(|| Self::Text(number.to_string())),
            Value::String(text) => {
                let trimmed = text.trim();
                if is_timestamp_column(column) {
                    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                        return Self::Timestamp(parsed);
                    }
                }
                if is_date_column(column) {
                    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                        return Self::Date(parsed);
                    }
                }
                Self::Text(text.clone())
            }
            other => Self::Text(json_text(other)),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Bool(flag) => flag.to_string(),
            Self::I64(number) => number.to_string(),
            Self::F64(number) => number.to_string(),
            Self::Date(value) => value.to_string(),
            Self::Timestamp(value) => value.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone)]
enum ArrayFilter {
    Text(Vec<String>),
    I64(Vec<i64>),
}

impl ArrayFilter {
    /// Integer arrays bind as `bigint[]`; anything else compares as text.
    fn infer(values: &[Value]) -> Self {
        let integers = values.iter().map(Value::as_i64).collect::<Option<Vec<_>>>();
        match integers {
            Some(integers) if !integers.is_empty() => Self::I64(integers),
            _ => Self::Text(values.iter().map(json_text).collect()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Text(values) => values.is_empty(),
            Self::I64(values) => values.is_empty(),
        }
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    ILike,
    IsNull,
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    let mut column = filter_key;
    let mut operator = FilterOperator::Eq;

    if let Some((candidate_column, suffix)) = filter_key.rsplit_once("__") {
        let parsed = match suffix {
            "gt" => Some(FilterOperator::Gt),
            "gte" => Some(FilterOperator::Gte),
            "lt" => Some(FilterOperator::Lt),
            "lte" => Some(FilterOperator::Lte),
            "ne" => Some(FilterOperator::Ne),
            "ilike" => Some(FilterOperator::ILike),
            "is_null" => Some(FilterOperator::IsNull),
            "in" => Some(FilterOperator::Eq),
            _ => None,
        };
        if let Some(parsed) = parsed {
            operator = parsed;
            column = candidate_column;
        }
    }

    Ok((validate_identifier(column)?, operator))
}

fn parse_bool_filter_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|parsed| parsed != 0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if matches!(operator, FilterOperator::IsNull) {
        query.push(" AND t.").push(column);
        if parse_bool_filter_value(value) {
            query.push(" IS NULL");
        } else {
            query.push(" IS NOT NULL");
        }
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if !matches!(operator, FilterOperator::Eq) {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            let filter = ArrayFilter::infer(items);
            if filter.is_empty() {
                // Nothing can match an empty IN list.
                query.push(" AND FALSE");
                return Ok(());
            }
            query.push(" AND ");
            push_array_filter(query, column, &filter);
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar_filter(query, column, operator, &ScalarFilter::infer(column, value));
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ScalarFilter,
) {
    query.push("t.").push(column);
    let sql_operator = match operator {
        FilterOperator::Eq => " = ",
        FilterOperator::Gt => " > ",
        FilterOperator::Gte => " >= ",
        FilterOperator::Lt => " < ",
        FilterOperator::Lte => " <= ",
        FilterOperator::Ne => " IS DISTINCT FROM ",
        FilterOperator::ILike => {
            query.push("::text ILIKE ").push_bind(value.as_text());
            return;
        }
        // handled by push_filter_clause before scalar inference
        FilterOperator::IsNull => return,
    };
    match value {
        ScalarFilter::Text(text) => {
            query
                .push("::text")
                .push(sql_operator)
                .push_bind(text.clone());
        }
        ScalarFilter::Bool(flag) => {
            query.push(sql_operator).push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::F64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::Date(value) => {
            query.push(sql_operator).push_bind(*value);
        }
        ScalarFilter::Timestamp(value) => {
            query.push(sql_operator).push_bind(value.to_owned());
        }
    }
}

fn push_array_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ArrayFilter) {
    query.push("t.").push(column);
    match value {
        ArrayFilter::Text(values) => {
            query
                .push("::text = ANY(")
                .push_bind(values.clone())
                .push(")");
        }
        ArrayFilter::I64(values) => {
            query.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
}

fn is_date_column(column: &str) -> bool {
    column == "period_start"
}

fn is_timestamp_column(column: &str) -> bool {
    column.ends_with("_at") || matches!(column, "rent_date" | "due_date")
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Database query failed");

    if let Some(db_error) = error.as_database_error() {
        if db_error.is_unique_violation() {
            return AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            );
        }
        if db_error.is_foreign_key_violation() {
            return AppError::BadRequest("Referenced record does not exist.".to_string());
        }
        if db_error.is_check_violation() {
            return AppError::UnprocessableEntity(
                "Value violates a table constraint.".to_string(),
            );
        }
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{
        insert_query, parse_filter_key, push_filter_clause, select_query,
        update_query, validate_table, FilterOperator,
    };

    #[test]
    fn only_known_tables_are_reachable() {
        assert!(validate_table("units").is_ok());
        assert!(validate_table("rent_payments").is_ok());
        assert!(validate_table("pg_user").is_err());
        assert!(validate_table("units; drop table units").is_err());
    }

    #[test]
    fn filter_suffixes_map_to_operators() {
        assert_eq!(
            parse_filter_key("sla_due_at__lt").unwrap(),
            ("sla_due_at", FilterOperator::Lt)
        );
        assert_eq!(
            parse_filter_key("status__ne").unwrap(),
            ("status", FilterOperator::Ne)
        );
        assert_eq!(
            parse_filter_key("property_id").unwrap(),
            ("property_id", FilterOperator::Eq)
        );
        // Unknown suffixes stay part of the column name.
        assert_eq!(
            parse_filter_key("over__due").unwrap(),
            ("over__due", FilterOperator::Eq)
        );
    }

    #[test]
    fn timestamp_filters_bind_typed_values() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM events t WHERE 1=1");
        push_filter_clause(
            &mut query,
            "due_date__gte",
            &Value::String("2026-02-01T00:00:00+00:00".to_string()),
        )
        .unwrap();
        push_filter_clause(&mut query, "status", &Value::String("open".to_string())).unwrap();
        let sql = query.sql();
        assert!(sql.contains("t.due_date >= $1"), "{sql}");
        assert!(sql.contains("t.status::text = $2"), "{sql}");
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM units t WHERE 1=1");
        push_filter_clause(&mut query, "property_id", &json!([])).unwrap();
        assert!(query.sql().ends_with("AND FALSE"));
    }

    #[test]
    fn select_orders_with_stable_tiebreak() {
        let mut filters = Map::new();
        filters.insert("property_id".to_string(), json!(4));
        let query = select_query("units", Some(&filters), "unit_number", true).unwrap();
        let sql = query.sql();
        assert!(sql.contains("t.property_id = $1"), "{sql}");
        assert!(sql.ends_with("ORDER BY t.unit_number ASC, t.id ASC"), "{sql}");

        let query = select_query("units", None, "property_id, unit_number", false).unwrap();
        assert!(query
            .sql()
            .ends_with("ORDER BY t.property_id DESC, t.unit_number DESC, t.id ASC"));
        assert!(select_query("units", None, "unit_number; drop", true).is_err());
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let mut payload = Map::new();
        payload.insert("unit_number".to_string(), json!(3));
        payload.insert("property_id".to_string(), json!(1));
        payload.insert("occupied".to_string(), json!(false));

        let query = insert_query("units", &payload).unwrap();
        let sql = query.sql();
        assert!(
            sql.contains("jsonb_populate_record(NULL::units"),
            "Expected jsonb_populate_record in SQL but got: {sql}"
        );
        assert!(
            sql.contains("SELECT r.occupied, r.property_id, r.unit_number"),
            "Expected r.col references in SQL but got: {sql}"
        );
    }

    #[test]
    fn update_sql_targets_row_by_text_id() {
        let mut payload = Map::new();
        payload.insert("rent_amount".to_string(), Value::Null);
        payload.insert("occupied".to_string(), json!(false));

        let query = update_query("units", "12", &payload, "id").unwrap();
        let sql = query.sql();
        assert!(
            sql.contains("occupied = r.occupied, rent_amount = r.rent_amount"),
            "Expected col = r.col pattern in SQL but got: {sql}"
        );
        assert!(sql.contains("WHERE t.id::text = $2"), "{sql}");
    }

    #[test]
    fn empty_payloads_are_rejected() {
        assert!(insert_query("units", &Map::new()).is_err());
        assert!(update_query("units", "1", &Map::new(), "id").is_err());
    }
}
