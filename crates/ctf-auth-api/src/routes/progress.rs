use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use ctf_auth_core::error::Error;
use ctf_auth_core::progress::ProgressSummary;

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/progress/{client_id}", get(progress))
}

/// GET /progress/{client_id} — read straight from the store, never cached
async fn progress(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ProgressSummary>, Error> {
    let client = state
        .store
        .find_client(&client_id)
        .await?
        .ok_or(Error::NotFound)?;
    let record = state.store.progress(&client.client_id).await?;
    Ok(Json(ProgressSummary::new(
        &client.client_id,
        &client.client_name,
        &record,
        &state.config.flags,
    )))
}
