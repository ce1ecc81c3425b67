use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use ctf_auth_core::error::Error;
use ctf_auth_core::progress::{self, Stage};
use ctf_auth_core::scopes;
use ctf_auth_core::visit::{self, VisitDispatched};

use crate::extract::{require_claims, require_shared_secret};
use crate::server::AppState;

#[derive(Serialize)]
pub struct FlagResponse {
    client_id: String,
    flag: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/simulate-visit/{client_id}", get(simulate_visit))
        .route("/admin/visits/next", get(next_visit))
        .route("/admin/flag", get(flag))
}

/// GET /admin/simulate-visit/{client_id} — queue a visit for the admin actor
async fn simulate_visit(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<VisitDispatched>, Error> {
    let ack = visit::dispatch_admin_visit(
        state.store.as_ref(),
        &state.config.jwt,
        &state.config.admin,
        &client_id,
    )
    .await?;
    Ok(Json(ack))
}

/// GET /admin/visits/next — oldest pending visit for the actor, 204 when idle
async fn next_visit(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, Error> {
    require_shared_secret(state.config.admin.visit_token.as_ref(), &headers)?;
    Ok(match visit::next_visit(state.store.as_ref()).await? {
        Some(visit) => Json(visit).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// GET /admin/flag — final flag for an `ADMIN_SECRETS` token
async fn flag(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FlagResponse>, Error> {
    let claims = require_claims(&state, &headers)?;
    if !scopes::has_scope(&claims.scope, scopes::ADMIN_SECRETS) {
        return Err(Error::Forbidden(format!("requires scope {}", scopes::ADMIN_SECRETS)));
    }
    progress::check_access(state.store.as_ref(), &claims.client_id, Stage::Introspection).await?;

    tracing::info!(client_id = %claims.client_id, "final flag retrieved");
    Ok(Json(FlagResponse {
        client_id: claims.client_id,
        flag: state.config.flags.r#final.clone(),
    }))
}
