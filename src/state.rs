use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_pool;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set; data endpoints will return 503");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
        })
    }
}
