use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctf_auth_core::authorize::{self, CodeRequest};
use ctf_auth_core::clients::{self, Registration};
use ctf_auth_core::error::Error;
use ctf_auth_core::pkce::ChallengeMethod;
use ctf_auth_core::scopes;

use crate::extract::JsonBody;
use crate::server::AppState;

#[derive(Serialize)]
pub struct RegisterResponse {
    client_id: String,
    client_secret: String,
    client_name: String,
    logo_uri: Option<String>,
    redirect_uris: Vec<String>,
    registered_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    scope: Option<String>,
    state: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/oauth/authorize", get(authorize))
}

/// POST /auth/register — dynamic client registration
async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Registration>,
) -> Result<Json<RegisterResponse>, Error> {
    let registered = clients::register(state.store.as_ref(), body).await?;
    let client = registered.client;
    Ok(Json(RegisterResponse {
        client_id: client.client_id,
        client_secret: registered.client_secret,
        client_name: client.client_name,
        logo_uri: client.logo_uri,
        redirect_uris: client.redirect_uris,
        registered_at: client.registered_at,
    }))
}

/// GET /oauth/authorize — issue a code and redirect back to the client
async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, Error> {
    let client_id = query
        .client_id
        .ok_or_else(|| Error::InvalidRequest("client_id is required".to_string()))?;
    let redirect_uri = query
        .redirect_uri
        .ok_or_else(|| Error::InvalidRequest("redirect_uri is required".to_string()))?;
    let code_challenge = query
        .code_challenge
        .ok_or_else(|| Error::InvalidRequest("code_challenge is required".to_string()))?;
    let code_challenge_method = match query.code_challenge_method.as_deref() {
        Some(method) => method.parse::<ChallengeMethod>()?,
        None => ChallengeMethod::S256,
    };
    let scope = query
        .scope
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| scopes::USER_READ.to_string());

    let request = CodeRequest {
        client_id,
        redirect_uri,
        code_challenge,
        code_challenge_method,
        scope,
    };
    let code = authorize::issue_code(state.store.as_ref(), &state.config.jwt, &request).await?;

    let mut location = url::Url::parse(&request.redirect_uri)
        .map_err(|_| Error::InvalidRequest("invalid redirect_uri".to_string()))?;
    {
        let mut pairs = location.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(ref client_state) = query.state {
            pairs.append_pair("state", client_state);
        }
    }

    Ok((StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response())
}
