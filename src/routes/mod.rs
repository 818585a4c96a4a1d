use axum::{routing::get, Router};

use crate::state::AppState;

pub mod approvals;
pub mod audit_logs;
pub mod documents;
pub mod events;
pub mod health;
pub mod properties;
pub mod reports;
pub mod tickets;
pub mod units;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(properties::router())
        .merge(units::router())
        .merge(tickets::router())
        .merge(approvals::router())
        .merge(events::router())
        .merge(audit_logs::router())
        .merge(reports::router())
        .merge(documents::router())
}
