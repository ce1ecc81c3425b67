//! Key-value store abstraction.
//!
//! Every piece of per-entity state lives behind [`Store`]. Operations that
//! must happen exactly once (client registration, code consumption, refresh
//! rotation) are single check-and-set calls on the backend, so concurrent
//! callers race safely and exactly one of them wins.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::pkce::ChallengeMethod;
use crate::progress::{ProgressRecord, Stage};

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

// --- Models ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_name: String,
    /// Stored verbatim and never fetched by this server.
    pub logo_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub client_secret_hash: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub scope: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub client_id: String,
    pub scope: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    /// Hash of the refresh token that replaced this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

/// Work item for the external admin-visit actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRequest {
    pub client_id: String,
    pub code: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub requested_at: DateTime<Utc>,
}

// --- Trait ---

#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the backend.
    async fn ping(&self) -> Result<()>;

    /// Insert a new client and mark stage 1 for it in the same step.
    /// Returns false, writing nothing, when the `client_id` is already taken.
    async fn register_client(&self, client: &Client) -> Result<bool>;

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>>;

    async fn store_authorization_code(&self, code_hash: &str, code: &AuthorizationCode) -> Result<()>;

    /// Atomically find and consume an authorization code.
    /// Returns None if the code doesn't exist, is expired, or was already used.
    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>>;

    async fn store_refresh_token(&self, token_hash: &str, token: &RefreshTokenRecord) -> Result<()>;

    /// Read a refresh token record without changing it.
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Atomically mark a live refresh token superseded by `replacement_hash`
    /// and store the replacement. Returns the old record, or None if it is
    /// missing, expired, or already superseded.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement_hash: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>>;

    /// Append a captured payload. With `stage_at`, stage 2 is marked in the
    /// same step; returns true only when that mark is new.
    async fn append_capture(
        &self,
        client_id: &str,
        payload: &str,
        stage_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn captures(&self, client_id: &str) -> Result<Vec<String>>;

    /// Mark a stage complete, keeping the earliest completion time.
    /// Returns false when the stage was already complete.
    async fn record_stage(&self, client_id: &str, stage: Stage, at: DateTime<Utc>) -> Result<bool>;

    async fn progress(&self, client_id: &str) -> Result<ProgressRecord>;

    /// Queue a visit, dropping the oldest pending ones beyond `max_pending`.
    async fn enqueue_visit(&self, visit: &VisitRequest, max_pending: usize) -> Result<()>;

    /// Pop the oldest pending admin visit.
    async fn next_visit(&self) -> Result<Option<VisitRequest>>;
}

/// Build the configured backend.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_ref()
                .ok_or_else(|| crate::error::Error::Config("store.redis_url is required".to_string()))?
                .resolve()?;
            let store = RedisStore::connect(&url, &config.key_prefix).await?;
            Ok(Arc::new(store))
        }
    }
}
