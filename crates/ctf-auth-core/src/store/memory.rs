//! In-memory store backend.
//!
//! Each collection sits behind its own lock; a check-and-set holds the write
//! lock of the collection it mutates for the whole check. Data is lost on
//! restart.

use std::collections::btree_map::Entry;
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{AuthorizationCode, Client, RefreshTokenRecord, Store, VisitRequest};
use crate::error::Result;
use crate::progress::{ProgressRecord, Stage};

#[derive(Default)]
pub struct MemoryStore {
    clients: RwLock<HashMap<String, Client>>,
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
    captures: RwLock<HashMap<String, Vec<String>>>,
    progress: RwLock<HashMap<String, ProgressRecord>>,
    visits: Mutex<VecDeque<VisitRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Set the first completion time for `stage`; false if it was already set.
fn mark(
    progress: &mut HashMap<String, ProgressRecord>,
    client_id: &str,
    stage: Stage,
    at: DateTime<Utc>,
) -> bool {
    match progress.entry(client_id.to_string()).or_default().completed.entry(stage) {
        Entry::Vacant(slot) => {
            slot.insert(at);
            true
        }
        Entry::Occupied(_) => false,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn register_client(&self, client: &Client) -> Result<bool> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.client_id) {
            return Ok(false);
        }
        // Lock order clients -> progress keeps the two writes indivisible
        // for readers of either map.
        let mut progress = self.progress.write().await;
        clients.insert(client.client_id.clone(), client.clone());
        progress
            .entry(client.client_id.clone())
            .or_default()
            .completed
            .entry(Stage::Registration)
            .or_insert(client.registered_at);
        Ok(true)
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn store_authorization_code(&self, code_hash: &str, code: &AuthorizationCode) -> Result<()> {
        self.codes.write().await.insert(code_hash.to_string(), code.clone());
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>> {
        let mut codes = self.codes.write().await;
        let Some(code) = codes.get_mut(code_hash) else {
            return Ok(None);
        };
        if code.consumed || code.expires_at <= now {
            return Ok(None);
        }
        code.consumed = true;
        Ok(Some(code.clone()))
    }

    async fn store_refresh_token(&self, token_hash: &str, token: &RefreshTokenRecord) -> Result<()> {
        self.refresh_tokens
            .write()
            .await
            .insert(token_hash.to_string(), token.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement_hash: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>> {
        let mut tokens = self.refresh_tokens.write().await;
        let Some(token) = tokens.get_mut(token_hash) else {
            return Ok(None);
        };
        if token.superseded_by.is_some() || token.expires_at <= now {
            return Ok(None);
        }
        let previous = token.clone();
        token.superseded_by = Some(replacement_hash.to_string());
        tokens.insert(replacement_hash.to_string(), replacement.clone());
        Ok(Some(previous))
    }

    async fn append_capture(
        &self,
        client_id: &str,
        payload: &str,
        stage_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut captures = self.captures.write().await;
        let mut progress = self.progress.write().await;
        captures
            .entry(client_id.to_string())
            .or_default()
            .push(payload.to_string());
        let Some(at) = stage_at else {
            return Ok(false);
        };
        Ok(mark(&mut progress, client_id, Stage::Capture, at))
    }

    async fn captures(&self, client_id: &str) -> Result<Vec<String>> {
        Ok(self
            .captures
            .read()
            .await
            .get(client_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_stage(&self, client_id: &str, stage: Stage, at: DateTime<Utc>) -> Result<bool> {
        let mut progress = self.progress.write().await;
        Ok(mark(&mut progress, client_id, stage, at))
    }

    async fn progress(&self, client_id: &str) -> Result<ProgressRecord> {
        Ok(self
            .progress
            .read()
            .await
            .get(client_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn enqueue_visit(&self, visit: &VisitRequest, max_pending: usize) -> Result<()> {
        let mut visits = self.visits.lock().await;
        visits.push_back(visit.clone());
        while visits.len() > max_pending.max(1) {
            visits.pop_front();
        }
        Ok(())
    }

    async fn next_visit(&self) -> Result<Option<VisitRequest>> {
        Ok(self.visits.lock().await.pop_front())
    }
}
