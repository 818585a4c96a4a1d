use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;

/// Builds a lazily-connected pool; `None` when no database is configured.
pub fn build_pool(config: &AppConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(database_url) = config.database_url.as_deref() else {
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(database_url)?;
    Ok(Some(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    const INIT_SCHEMA: &str = include_str!("../migrations/20260101000000_init.sql");

    fn table_definition(name: &str) -> &'static str {
        let start = INIT_SCHEMA
            .find(&format!("CREATE TABLE IF NOT EXISTS {name} ("))
            .unwrap();
        let end = start + INIT_SCHEMA[start..].find(");").unwrap();
        &INIT_SCHEMA[start..end]
    }

    #[test]
    fn rent_payments_allow_repeat_periods_per_unit() {
        let rent_payments = table_definition("rent_payments");
        assert!(rent_payments.contains("period_start DATE NOT NULL"));
        assert!(!rent_payments.contains("UNIQUE"));
    }

    #[test]
    fn unit_numbers_stay_unique_per_property() {
        assert!(table_definition("units").contains("UNIQUE (property_id, unit_number)"));
    }
}
