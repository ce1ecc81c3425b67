use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use ctf_auth_core::capture::{self, CaptureList, CaptureReport};
use ctf_auth_core::error::Error;

use crate::extract::JsonBody;
use crate::server::AppState;

#[derive(Serialize)]
pub struct CaptureAck {
    status: &'static str,
    client_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/capture", post(report))
        .route("/check-capture/{client_id}", get(check))
}

/// POST /capture — callback for the admin-visit actor
async fn report(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CaptureReport>,
) -> Result<Json<CaptureAck>, Error> {
    capture::report(state.store.as_ref(), &body).await?;
    Ok(Json(CaptureAck {
        status: "captured",
        client_id: body.client_id,
    }))
}

/// GET /check-capture/{client_id}
async fn check(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<CaptureList>, Error> {
    Ok(Json(capture::read(state.store.as_ref(), &client_id).await?))
}
