//! Request extractors that report failures through the shared error body.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use ctf_auth_core::config::ConfigValue;
use ctf_auth_core::error::Error;
use ctf_auth_core::jwt::Claims;
use subtle::ConstantTimeEq;

use crate::server::AppState;

/// `Json<T>` whose rejections become `invalid_request` errors.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::InvalidRequest(rejection.body_text())),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify the bearer token, if one was sent.
pub fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Option<Result<Claims, Error>> {
    bearer_token(headers).map(|token| {
        state
            .keys
            .verify_access_token(&state.config.jwt, token)
            .map(|data| data.claims)
    })
}

/// Verified claims, failing with `invalid_token` when no bearer was sent.
pub fn require_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims, Error> {
    bearer_claims(state, headers).unwrap_or(Err(Error::InvalidToken))
}

/// Require `Authorization: Bearer <secret>` matching a configured shared
/// secret. No configured secret lets every request through.
pub fn require_shared_secret(expected: Option<&ConfigValue>, headers: &HeaderMap) -> Result<(), Error> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let expected = expected.resolve()?;
    match bearer_token(headers) {
        Some(token) if token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1 => Ok(()),
        _ => Err(Error::InvalidToken),
    }
}
