//! Dispatch of simulated admin visits.
//!
//! The server only queues work. The external actor pulls [`VisitRequest`]s
//! from `GET /admin/visits/next`, renders the client's stored metadata as a
//! privileged viewer and reports what leaks through the capture sink.

use chrono::Utc;
use serde::Serialize;

use crate::authorize::{self, CodeRequest};
use crate::config::{AdminConfig, JwtConfig};
use crate::error::{Error, Result};
use crate::pkce::{self, ChallengeMethod};
use crate::scopes;
use crate::store::{Store, VisitRequest};

#[derive(Debug, Clone, Serialize)]
pub struct VisitDispatched {
    pub status: &'static str,
    pub client_id: String,
}

/// Issue an admin authorization code for the client's first redirect URI
/// and queue a visit carrying it.
pub async fn dispatch_admin_visit(
    store: &dyn Store,
    config: &JwtConfig,
    admin: &AdminConfig,
    client_id: &str,
) -> Result<VisitDispatched> {
    let client = store.find_client(client_id).await?.ok_or(Error::NotFound)?;
    let redirect_uri = client
        .redirect_uris
        .first()
        .cloned()
        .ok_or_else(|| Error::InvalidRequest("client has no redirect_uri".to_string()))?;

    // The verifier is dropped: only the admin's browser would hold it.
    let (_verifier, code_challenge) = pkce::generate_pkce();
    let code = authorize::issue_code(
        store,
        config,
        &CodeRequest {
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.clone(),
            code_challenge: code_challenge.clone(),
            code_challenge_method: ChallengeMethod::S256,
            scope: scopes::USER_READ.to_string(),
        },
    )
    .await?;

    let visit = VisitRequest {
        client_id: client.client_id.clone(),
        code,
        code_challenge,
        redirect_uri,
        requested_at: Utc::now(),
    };
    store.enqueue_visit(&visit, admin.max_pending_visits).await?;
    tracing::info!(client_id = %client.client_id, "admin visit dispatched");

    Ok(VisitDispatched {
        status: "dispatched",
        client_id: client.client_id,
    })
}

/// Hand the oldest pending visit to the actor.
pub async fn next_visit(store: &dyn Store) -> Result<Option<VisitRequest>> {
    let visit = store.next_visit().await?;
    if let Some(ref visit) = visit {
        tracing::debug!(client_id = %visit.client_id, "admin visit handed out");
    }
    Ok(visit)
}
