use axum::http::header::{HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{ACTOR_EMAIL_HEADER, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use crate::config::AppConfig;
use crate::middleware::request_id::REQUEST_ID_HEADER;

pub fn allowed_headers(config: &AppConfig) -> Vec<HeaderName> {
    let mut headers = vec![
        ACCEPT,
        AUTHORIZATION,
        CONTENT_TYPE,
        HeaderName::from_static(REQUEST_ID_HEADER),
    ];
    // Browsers only send actor headers directly when no gateway sits in front.
    if config.auth_dev_overrides_enabled() {
        headers.extend([
            HeaderName::from_static(ACTOR_ID_HEADER),
            HeaderName::from_static(ACTOR_EMAIL_HEADER),
            HeaderName::from_static(ACTOR_ROLE_HEADER),
        ]);
    }
    headers
}

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let mut layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(allowed_headers(config))
        .expose_headers([
            HeaderName::from_static(REQUEST_ID_HEADER),
            axum::http::header::CONTENT_DISPOSITION,
        ]);

    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        layer = layer.allow_origin(Any).allow_credentials(false);
    } else {
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect::<Vec<_>>();
        layer = layer.allow_origin(origins).allow_credentials(true);
    }

    layer
}
