use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::{decode_row, PropertyRecord};
use crate::repository::table_service::{
    create_row_tx, delete_rows_tx, get_row_tx, map_db_error, update_row_tx,
};

/// Unit numbers to create when a property grows from `old_total` to
/// `new_total`. Numbering continues after the units that already exist;
/// shrinking creates nothing and deletes nothing.
pub fn units_to_provision(existing_unit_count: i64, old_total: i32, new_total: i32) -> Vec<i32> {
    if new_total <= old_total {
        return Vec::new();
    }
    let first = i32::try_from(existing_unit_count.max(0))
        .unwrap_or(i32::MAX)
        .saturating_add(1);
    (first..=new_total).collect()
}

pub fn validate_unit_counts(total_units: i32, occupancy: i32) -> AppResult<()> {
    if total_units < 0 {
        return Err(AppError::UnprocessableEntity(
            "total_units must be non-negative".to_string(),
        ));
    }
    if occupancy < 0 {
        return Err(AppError::UnprocessableEntity(
            "occupancy must be non-negative".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_occupancy_within_total(occupancy: i32, total_units: i32) -> AppResult<()> {
    validate_unit_counts(total_units, occupancy)?;
    if occupancy > total_units {
        return Err(AppError::UnprocessableEntity(format!(
            "occupancy ({occupancy}) cannot exceed total_units ({total_units})"
        )));
    }
    Ok(())
}

/// Inserts the property and its vacant units `1..=total_units` together.
pub async fn create_property_with_units(
    pool: &PgPool,
    record: &Map<String, Value>,
    total_units: i32,
) -> AppResult<(Value, u64)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let created = create_row_tx(&mut tx, "properties", record).await?;
    let property: PropertyRecord = decode_row(created.clone())?;
    let numbers = units_to_provision(0, 0, total_units);
    let provisioned = insert_vacant_units(&mut tx, property.id, &numbers).await?;
    tx.commit().await.map_err(map_db_error)?;
    Ok((created, provisioned))
}

/// Applies a property PATCH and provisions units for any growth in
/// `total_units` in the same transaction.
pub async fn update_property_with_units(
    pool: &PgPool,
    property_id: &str,
    patch: &Map<String, Value>,
    now: DateTime<Utc>,
) -> AppResult<(Value, u64)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let current: PropertyRecord =
        decode_row(get_row_tx(&mut tx, "properties", property_id, "id").await?)?;

    let new_total = patch
        .get("total_units")
        .and_then(Value::as_i64)
        .map(|value| i32::try_from(value).unwrap_or(i32::MAX))
        .unwrap_or(current.total_units);
    let new_occupancy = patch
        .get("occupancy")
        .and_then(Value::as_i64)
        .map(|value| i32::try_from(value).unwrap_or(i32::MAX))
        .unwrap_or(current.occupancy);
    validate_unit_counts(new_total, new_occupancy)?;

    let mut record = patch.clone();
    record.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
    let updated = update_row_tx(&mut tx, "properties", property_id, &record, "id").await?;

    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM units WHERE property_id = $1")
            .bind(current.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;
    let numbers = units_to_provision(existing, current.total_units, new_total);
    let provisioned = insert_vacant_units(&mut tx, current.id, &numbers).await?;
    tx.commit().await.map_err(map_db_error)?;

    if provisioned > 0 {
        tracing::info!(
            property_id = current.id,
            from = current.total_units,
            to = new_total,
            provisioned,
            "Provisioned units for property growth"
        );
    }
    Ok((updated, provisioned))
}

/// Deletes a property with everything it owns. Events carry no cascade, so
/// they go first; units and rent payments cascade from the property row.
pub async fn delete_property_cascade(pool: &PgPool, property_id: &str) -> AppResult<Value> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let existing = get_row_tx(&mut tx, "properties", property_id, "id").await?;
    let property: PropertyRecord = decode_row(existing.clone())?;

    let mut owned = Map::new();
    owned.insert("property_id".to_string(), Value::from(property.id));
    let events = delete_rows_tx(&mut tx, "events", &owned).await?;
    let approvals = delete_rows_tx(&mut tx, "approvals", &owned).await?;
    let tickets = delete_rows_tx(&mut tx, "tickets", &owned).await?;

    let mut target = Map::new();
    target.insert("id".to_string(), Value::from(property.id));
    delete_rows_tx(&mut tx, "properties", &target).await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        property_id = property.id,
        events,
        approvals,
        tickets,
        "Deleted property"
    );
    Ok(existing)
}

async fn insert_vacant_units(
    conn: &mut PgConnection,
    property_id: i64,
    numbers: &[i32],
) -> AppResult<u64> {
    if numbers.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "INSERT INTO units (property_id, unit_number, occupied, paid, over_due)
         SELECT $1, n, false, false, false FROM unnest($2::int[]) AS n
         ON CONFLICT (property_id, unit_number) DO NOTHING",
    )
    .bind(property_id)
    .bind(numbers.to_vec())
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::{units_to_provision, validate_occupancy_within_total, validate_unit_counts};
    use crate::error::AppError;

    #[test]
    fn new_property_gets_sequential_units() {
        assert_eq!(units_to_provision(0, 0, 4), vec![1, 2, 3, 4]);
        assert!(units_to_provision(0, 0, 0).is_empty());
    }

    #[test]
    fn growth_creates_only_the_delta() {
        assert_eq!(units_to_provision(4, 4, 6), vec![5, 6]);
    }

    #[test]
    fn shrinking_is_a_no_op() {
        assert!(units_to_provision(6, 6, 4).is_empty());
        assert!(units_to_provision(6, 6, 6).is_empty());
    }

    #[test]
    fn numbering_follows_existing_unit_count() {
        // A unit was added by hand after creation.
        assert_eq!(units_to_provision(5, 4, 7), vec![6, 7]);
        // Growth that stays under the real unit count adds nothing.
        assert!(units_to_provision(8, 4, 6).is_empty());
    }

    #[test]
    fn counts_must_be_non_negative() {
        assert!(matches!(
            validate_unit_counts(-1, 0),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert!(validate_unit_counts(0, -3).is_err());
        assert!(validate_unit_counts(10, 4).is_ok());
    }

    #[test]
    fn occupancy_cannot_exceed_total() {
        assert!(validate_occupancy_within_total(4, 4).is_ok());
        assert!(validate_occupancy_within_total(5, 4).is_err());
    }
}
