use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use ctf_auth_core::error::Error;
use ctf_auth_core::tokens::{self, ExchangeRequest, RefreshRequest, TokenGrant};

use crate::extract::JsonBody;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/token/exchange", post(exchange))
        .route("/token/refresh", post(refresh))
}

/// POST /token/exchange — authorization code for tokens
async fn exchange(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ExchangeRequest>,
) -> Result<Json<TokenGrant>, Error> {
    let grant = tokens::exchange(state.store.as_ref(), &state.keys, &state.config, &body).await?;
    Ok(Json(grant))
}

/// POST /token/refresh — rotate a refresh token
async fn refresh(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RefreshRequest>,
) -> Result<Json<TokenGrant>, Error> {
    let grant = tokens::refresh(state.store.as_ref(), &state.keys, &state.config, &body).await?;
    Ok(Json(grant))
}
