mod auth;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod repository;
mod routes;
mod schemas;
mod services;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::Router;
use config::AppConfig;
use middleware::cors::build_cors_layer;
use middleware::request_id::inject_request_id;
use state::AppState;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Headroom over the largest document upload for the rest of the multipart body.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config)?;

    if state.config.auth_dev_overrides_enabled() {
        tracing::warn!("Dev actor overrides are enabled; do not use in production");
    }

    if let Some(pool) = &state.db_pool {
        if state.config.run_migrations {
            db::run_migrations(pool).await?;
            tracing::info!("Database migrations applied");
        }
    }

    if state.config.overdue_sweep_enabled {
        tokio::spawn(services::scheduler::run_background_scheduler(state.clone()));
    }

    let app = build_router(state.clone())?;

    let socket_addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        api_prefix = %state.config.api_prefix,
        rate_limit_enabled = state.config.rate_limit_enabled,
        "Back office API listening on {socket_addr}"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

fn build_router(state: AppState) -> Result<Router, Box<dyn std::error::Error>> {
    let api = if state.config.api_prefix.is_empty() {
        Router::new().merge(routes::v1_router())
    } else {
        Router::new().nest(&state.config.api_prefix, routes::v1_router())
    };

    let app = api
        .layer(DefaultBodyLimit::max(
            state.config.document_max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config));

    // Keyed by peer IP, so it needs the connect info the server provides.
    let app = if state.config.rate_limit_enabled {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second.max(1))
            .burst_size(state.config.rate_limit_burst_size.max(1))
            .finish()
            .ok_or("invalid rate limit configuration")?;
        app.layer(GovernorLayer::new(governor_config))
    } else {
        app
    };

    Ok(app.with_state(state))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(error) => {
                tracing::warn!(%error, "Could not register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::build_router;
    use crate::config::AppConfig;
    use crate::state::AppState;

    fn app(pairs: &[(&'static str, &'static str)]) -> axum::Router {
        let mut pairs = pairs.to_vec();
        pairs.push(("RATE_LIMIT_ENABLED", "false"));
        let config = AppConfig::from_lookup(move |key| {
            pairs
                .iter()
                .find(|(candidate, _)| *candidate == key)
                .map(|(_, value)| value.to_string())
        });
        build_router(AppState::build(config).unwrap()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok_without_a_database() {
        let response = app(&[])
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["db_configured"], false);
    }

    #[tokio::test]
    async fn routes_are_nested_under_the_prefix() {
        let app = app(&[("API_PREFIX", "/v1")]);
        let nested = app
            .clone()
            .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(nested.status(), StatusCode::OK);

        let bare = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(bare.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn data_routes_require_an_actor() {
        let response = app(&[])
            .oneshot(Request::get("/units").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["code"], "unauthorized");
    }

    #[tokio::test]
    async fn data_routes_report_missing_database() {
        let response = app(&[])
            .oneshot(
                Request::get("/reports/analytics")
                    .header("x-actor-id", "user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["code"], "dependency_unavailable");
    }
}
