use axum::http::HeaderMap;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_EMAIL_HEADER: &str = "x-actor-email";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller of a request, as verified by the gateway in front of the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub email: Option<String>,
    pub role: String,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            email: None,
            role: "system".to_string(),
        }
    }
}

pub fn require_actor(state: &AppState, headers: &HeaderMap) -> AppResult<Actor> {
    if let Some(id) = header_value(headers, ACTOR_ID_HEADER) {
        return Ok(Actor {
            id,
            email: header_value(headers, ACTOR_EMAIL_HEADER),
            role: header_value(headers, ACTOR_ROLE_HEADER).unwrap_or_else(|| "user".to_string()),
        });
    }

    if state.config.auth_dev_overrides_enabled() {
        if let Some(id) = state.config.default_actor_id.clone() {
            return Ok(Actor {
                id,
                email: state.config.default_actor_email.clone(),
                role: state.config.default_actor_role.clone(),
            });
        }
    }

    Err(AppError::Unauthorized(
        "Unauthorized: missing authenticated actor.".to_string(),
    ))
}

/// Guards internal endpoints. In production the key must be configured.
pub fn validate_internal_api_key(
    is_production: bool,
    expected_key: Option<&str>,
    provided_key: &str,
) -> AppResult<()> {
    let expected = expected_key.map(str::trim).unwrap_or_default();

    if is_production && expected.is_empty() {
        return Err(AppError::Dependency(
            "INTERNAL_API_KEY must be set in production to run internal jobs.".to_string(),
        ));
    }

    if !expected.is_empty() && provided_key != expected {
        return Err(AppError::Unauthorized(
            "Invalid or missing API key.".to_string(),
        ));
    }

    Ok(())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
