//! Authorization-code issuance.

use chrono::{Duration, Utc};

use crate::clients;
use crate::config::JwtConfig;
use crate::error::{Error, Result};
use crate::jwt;
use crate::pkce::ChallengeMethod;
use crate::store::{AuthorizationCode, Store};

#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub scope: String,
}

/// Issue a one-time code bound to the request's PKCE challenge.
///
/// The declared challenge method is stored as given; nothing checks it
/// against what the client is able to perform.
pub async fn issue_code(store: &dyn Store, config: &JwtConfig, request: &CodeRequest) -> Result<String> {
    let client = clients::find(store, &request.client_id).await?;

    if !client.redirect_uris.iter().any(|u| u == &request.redirect_uri) {
        return Err(Error::RedirectMismatch);
    }
    if request.code_challenge.is_empty() {
        return Err(Error::InvalidRequest("code_challenge is required".to_string()));
    }

    let (code, code_hash) = jwt::generate_authorization_code();
    let now = Utc::now();
    let record = AuthorizationCode {
        client_id: client.client_id,
        redirect_uri: request.redirect_uri.clone(),
        code_challenge: request.code_challenge.clone(),
        code_challenge_method: request.code_challenge_method,
        scope: request.scope.clone(),
        created_at: now,
        expires_at: now + Duration::seconds(config.authorization_code_ttl_secs as i64),
        consumed: false,
    };
    store.store_authorization_code(&code_hash, &record).await?;

    tracing::info!(
        client_id = %record.client_id,
        method = %record.code_challenge_method,
        scope = %record.scope,
        "authorization code issued"
    );
    Ok(code)
}
