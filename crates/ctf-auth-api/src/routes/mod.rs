use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use ctf_auth_core::error::Error;

pub mod admin;
pub mod auth;
pub mod capture;
pub mod graphql;
pub mod progress;
pub mod token;

use crate::metrics::metrics_endpoint;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, Error> {
    state.store.ping().await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(auth::router())
        .merge(token::router())
        .merge(graphql::router())
        .merge(capture::router())
        .merge(progress::router())
        .merge(admin::router())
}
