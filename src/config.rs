use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub default_actor_id: Option<String>,
    pub default_actor_email: Option<String>,
    pub default_actor_role: String,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations: bool,
    pub internal_api_key: Option<String>,
    pub document_indexer_url: Option<String>,
    pub document_indexer_api_key: Option<String>,
    pub document_max_upload_bytes: usize,
    pub report_default_range_days: i64,
    pub audit_retention_days: i64,
    pub overdue_sweep_enabled: bool,
    pub overdue_sweep_hour_utc: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };
        Self {
            app_name: source.or("APP_NAME", "Property Back Office API"),
            environment: source.or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&source.or("API_PREFIX", "")),
            host: source.or("HOST", "0.0.0.0"),
            port: source.parse_or("PORT", 8000),
            cors_origins: parse_csv(&source.or("CORS_ORIGINS", "http://localhost:3000")),
            dev_auth_overrides_enabled: source.parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            default_actor_id: source.opt("DEFAULT_ACTOR_ID"),
            default_actor_email: source.opt("DEFAULT_ACTOR_EMAIL"),
            default_actor_role: source.or("DEFAULT_ACTOR_ROLE", "admin"),
            rate_limit_enabled: source.parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: source.parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: source.parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: source.opt("DATABASE_URL"),
            db_pool_max_connections: source.parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: source.parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: source.parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: source.parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations: source.parse_bool_or("RUN_MIGRATIONS", true),
            internal_api_key: source.opt("INTERNAL_API_KEY"),
            document_indexer_url: source
                .opt("DOCUMENT_INDEXER_URL")
                .filter(|raw| is_http_url(raw)),
            document_indexer_api_key: source.opt("DOCUMENT_INDEXER_API_KEY"),
            document_max_upload_bytes: source
                .parse_or("DOCUMENT_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            report_default_range_days: source.parse_or("REPORT_DEFAULT_RANGE_DAYS", 90).max(1),
            audit_retention_days: source.parse_or("AUDIT_RETENTION_DAYS", 90),
            overdue_sweep_enabled: source.parse_bool_or("OVERDUE_SWEEP_ENABLED", false),
            overdue_sweep_hour_utc: source.parse_or("OVERDUE_SWEEP_HOUR_UTC", 5).min(23),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn opt(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + Copy,
    {
        self.opt(key)
            .and_then(|raw| raw.parse::<T>().ok())
            .unwrap_or(default)
    }

    fn parse_bool_or(&self, key: &str, default: bool) -> bool {
        match self.opt(key).as_deref().map(str::to_ascii_lowercase) {
            Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => {
                true
            }
            Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => {
                false
            }
            Some(_) => default,
            None => default,
        }
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn is_http_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(error) => {
            tracing::warn!(%error, "Ignoring malformed DOCUMENT_INDEXER_URL");
            false
        }
    }
}

/// An empty prefix mounts the API at the root.
fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() || prefix == "/" {
        return String::new();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{normalize_prefix, AppConfig};

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let values = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        AppConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.report_default_range_days, 90);
        assert_eq!(config.audit_retention_days, 90);
        assert!(!config.overdue_sweep_enabled);
        assert!(config.database_url.is_none());
        assert_eq!(config.cors_origins, vec!["http://localhost:3000".to_string()]);
    }

    #[test]
    fn production_disables_dev_overrides() {
        let config = config_from(&[
            ("ENVIRONMENT", "Production"),
            ("DEV_AUTH_OVERRIDES_ENABLED", "true"),
        ]);
        assert!(config.is_production());
        assert!(!config.auth_dev_overrides_enabled());
    }

    #[test]
    fn rejects_non_http_indexer_urls() {
        let config = config_from(&[("DOCUMENT_INDEXER_URL", "ftp://indexer.internal/docs")]);
        assert!(config.document_indexer_url.is_none());

        let config = config_from(&[("DOCUMENT_INDEXER_URL", "https://indexer.internal/docs")]);
        assert_eq!(
            config.document_indexer_url.as_deref(),
            Some("https://indexer.internal/docs")
        );
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "eighty"), ("RATE_LIMIT_ENABLED", "maybe")]);
        assert_eq!(config.port, 8000);
        assert!(config.rate_limit_enabled);
    }
}
