use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::time::sleep;

use crate::repository::table_service::{delete_rows_tx, map_db_error};
use crate::services::rent_ledger::recompute_overdue_flags;
use crate::state::AppState;

/// Runs the daily maintenance jobs once per UTC day, at or after the
/// configured hour. Each job runs in its own task so one failure never
/// stops the loop.
pub async fn run_background_scheduler(state: AppState) {
    let Some(pool) = state.db_pool.clone() else {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    };
    let hour = state.config.overdue_sweep_hour_utc;
    let retention_days = state.config.audit_retention_days;
    tracing::info!(hour, retention_days, "Background scheduler started");

    let mut last_daily_run: Option<NaiveDate> = None;
    loop {
        sleep(Duration::from_secs(60)).await;

        let now = Utc::now();
        if !daily_run_due(last_daily_run, now, hour) {
            continue;
        }
        last_daily_run = Some(now.date_naive());
        tracing::info!("Scheduler: running daily jobs for {}", now.date_naive());

        {
            let pool = pool.clone();
            tokio::spawn(async move {
                run_overdue_sweep(&pool, now.date_naive()).await;
            });
        }

        if retention_days > 0 {
            let pool = pool.clone();
            tokio::spawn(async move {
                prune_audit_logs(&pool, now, retention_days).await;
            });
        }
    }
}

pub fn daily_run_due(last_run: Option<NaiveDate>, now: DateTime<Utc>, hour: u32) -> bool {
    if last_run == Some(now.date_naive()) {
        return false;
    }
    now.hour() >= hour
}

async fn run_overdue_sweep(pool: &PgPool, today: NaiveDate) {
    match recompute_overdue_flags(pool, today).await {
        Ok(changed) => tracing::info!(changed, %today, "Scheduler: overdue sweep completed"),
        Err(error) => tracing::error!(error = %error, "Scheduler: overdue sweep failed"),
    }
}

async fn prune_audit_logs(pool: &PgPool, now: DateTime<Utc>, retention_days: i64) {
    let cutoff = now - chrono::Duration::days(retention_days);
    let mut filters = Map::new();
    filters.insert(
        "created_at__lt".to_string(),
        Value::String(cutoff.to_rfc3339()),
    );

    let result = async {
        let mut conn = pool.acquire().await.map_err(map_db_error)?;
        delete_rows_tx(&mut conn, "audit_logs", &filters).await
    }
    .await;
    match result {
        Ok(0) => {}
        Ok(deleted) => tracing::info!(deleted, %cutoff, "Scheduler: pruned audit logs"),
        Err(error) => tracing::error!(error = %error, "Scheduler: audit log pruning failed"),
    }
}
