//! Redis store backend.
//!
//! Check-and-set operations run as Lua scripts so the read, the check and
//! the write happen in one server-side step. Codes and refresh tokens also
//! carry a Redis TTL matching their `expires_at`.

use std::collections::HashMap;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuthorizationCode, Client, RefreshTokenRecord, Store, VisitRequest};
use crate::error::Result;
use crate::progress::{ProgressRecord, Stage};

// KEYS[1] client key, KEYS[2] progress key
// ARGV[1] client JSON, ARGV[2] stage field, ARGV[3] timestamp
const REGISTER_CLIENT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('HSETNX', KEYS[2], ARGV[2], ARGV[3])
    return 1
end
return 0
";

// KEYS[1] code key; ARGV[1] now (unix seconds)
const CONSUME_CODE: &str = r"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return false
end
local code = cjson.decode(raw)
if code.consumed or tonumber(code.expires_at) <= tonumber(ARGV[1]) then
    return false
end
code.consumed = true
redis.call('SET', KEYS[1], cjson.encode(code), 'KEEPTTL')
return raw
";

// KEYS[1] old token key, KEYS[2] replacement key
// ARGV[1] replacement hash, ARGV[2] replacement JSON, ARGV[3] now, ARGV[4] replacement ttl
const ROTATE_REFRESH: &str = r"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return false
end
local token = cjson.decode(raw)
if token.superseded_by or tonumber(token.expires_at) <= tonumber(ARGV[3]) then
    return false
end
token.superseded_by = ARGV[1]
redis.call('SET', KEYS[1], cjson.encode(token), 'KEEPTTL')
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[4])
return raw
";

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    register_client: Script,
    consume_code: Script,
    rotate_refresh: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(key_prefix, "connected to redis");
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            register_client: Script::new(REGISTER_CLIENT),
            consume_code: Script::new(CONSUME_CODE),
            rotate_refresh: Script::new(ROTATE_REFRESH),
        })
    }

    fn key(&self, kind: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, kind, id)
    }

    fn visits_key(&self) -> String {
        format!("{}:visits", self.key_prefix)
    }
}

/// Seconds until `expires_at`, never less than one so SET EX stays valid.
fn ttl_secs(expires_at: DateTime<Utc>) -> u64 {
    (expires_at - Utc::now()).num_seconds().max(1) as u64
}

fn stage_field(stage: Stage) -> String {
    stage.number().to_string()
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn register_client(&self, client: &Client) -> Result<bool> {
        let json = serde_json::to_string(client)?;
        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .register_client
            .key(self.key("client", &client.client_id))
            .key(self.key("progress", &client.client_id))
            .arg(json)
            .arg(stage_field(Stage::Registration))
            .arg(client.registered_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key("client", client_id)).await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn store_authorization_code(&self, code_hash: &str, code: &AuthorizationCode) -> Result<()> {
        let json = serde_json::to_string(code)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key("code", code_hash), json, ttl_secs(code.expires_at))
            .await?;
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .consume_code
            .key(self.key("code", code_hash))
            .arg(now.timestamp())
            .invoke_async(&mut conn)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut code: AuthorizationCode = serde_json::from_str(&raw)?;
        code.consumed = true;
        Ok(Some(code))
    }

    async fn store_refresh_token(&self, token_hash: &str, token: &RefreshTokenRecord) -> Result<()> {
        let json = serde_json::to_string(token)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.key("refresh", token_hash), json, ttl_secs(token.expires_at))
            .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key("refresh", token_hash)).await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement_hash: &str,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>> {
        let json = serde_json::to_string(replacement)?;
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .rotate_refresh
            .key(self.key("refresh", token_hash))
            .key(self.key("refresh", replacement_hash))
            .arg(replacement_hash)
            .arg(json)
            .arg(now.timestamp())
            .arg(ttl_secs(replacement.expires_at))
            .invoke_async(&mut conn)
            .await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn append_capture(
        &self,
        client_id: &str,
        payload: &str,
        stage_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let Some(at) = stage_at else {
            let _: () = conn.rpush(self.key("capture", client_id), payload).await?;
            return Ok(false);
        };
        let (marked,): (bool,) = ::redis::pipe()
            .atomic()
            .rpush(self.key("capture", client_id), payload)
            .ignore()
            .hset_nx(self.key("progress", client_id), stage_field(Stage::Capture), at.to_rfc3339())
            .query_async(&mut conn)
            .await?;
        Ok(marked)
    }

    async fn captures(&self, client_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(self.key("capture", client_id), 0, -1).await?;
        Ok(items)
    }

    async fn record_stage(&self, client_id: &str, stage: Stage, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let marked: bool = conn
            .hset_nx(self.key("progress", client_id), stage_field(stage), at.to_rfc3339())
            .await?;
        Ok(marked)
    }

    async fn progress(&self, client_id: &str) -> Result<ProgressRecord> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.key("progress", client_id)).await?;
        let mut record = ProgressRecord::default();
        for (field, value) in fields {
            let stage = field.parse::<u8>().ok().and_then(Stage::from_number);
            let at = DateTime::parse_from_rfc3339(&value).ok();
            match (stage, at) {
                (Some(stage), Some(at)) => {
                    record.completed.insert(stage, at.with_timezone(&Utc));
                }
                _ => tracing::warn!(client_id, field = %field, "ignoring malformed progress entry"),
            }
        }
        Ok(record)
    }

    async fn enqueue_visit(&self, visit: &VisitRequest, max_pending: usize) -> Result<()> {
        let json = serde_json::to_string(visit)?;
        let keep = isize::try_from(max_pending.max(1)).unwrap_or(isize::MAX);
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .rpush(self.visits_key(), json)
            .ignore()
            .ltrim(self.visits_key(), -keep, -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn next_visit(&self) -> Result<Option<VisitRequest>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(self.visits_key(), None).await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }
}
