use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use ctf_auth_core::error::Error;
use ctf_auth_core::progress::{self, Stage};
use ctf_auth_core::query::{self, Viewer};

use crate::extract::{JsonBody, bearer_claims};
use crate::server::AppState;

#[derive(Deserialize)]
pub struct QueryRequest {
    query: String,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/graphql", post(graphql))
}

/// POST /graphql — run a query against the fixed schema
///
/// A missing or invalid bearer leaves the query unauthenticated: introspection
/// still answers, data fields report `UNAUTHENTICATED`.
async fn graphql(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<QueryRequest>,
) -> Result<Json<serde_json::Value>, Error> {
    let claims = match bearer_claims(&state, &headers) {
        Some(Ok(claims)) => Some(claims),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "ignoring invalid bearer on query");
            None
        }
        None => None,
    };

    if state.config.progress.enforce_stage_order {
        let claims = claims.as_ref().ok_or(Error::InvalidToken)?;
        progress::check_access(state.store.as_ref(), &claims.client_id, Stage::Exchange).await?;
    }

    let viewer = match claims {
        Some(claims) => {
            let client_name = state
                .store
                .find_client(&claims.client_id)
                .await?
                .map(|c| c.client_name);
            Some(Viewer {
                client_id: claims.client_id,
                client_name,
                scope: claims.scope,
            })
        }
        None => None,
    };

    let outcome = query::execute(&body.query, viewer.as_ref())?;

    if outcome.introspected {
        match viewer {
            Some(ref viewer) => {
                progress::record(state.store.as_ref(), &viewer.client_id, Stage::Introspection).await?;
            }
            None => tracing::info!(
                operation = body.operation_name.as_deref().unwrap_or("anonymous"),
                "anonymous introspection query"
            ),
        }
    }

    Ok(Json(outcome.response))
}
