//! Per-client stage progress and the gate built on it.
//!
//! Progress is a projection written by the component whose action completes
//! a stage, inside the same request and before that request responds, so a
//! summary read afterwards always reflects it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::FlagsConfig;
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Client registered with a `logo_uri` (recorded optimistically).
    Registration = 1,
    /// Admin-visit actor reported captured data.
    Capture = 2,
    /// Authorization code exchanged for tokens.
    Exchange = 3,
    /// Query schema introspected.
    Introspection = 4,
    /// Refresh produced an `ADMIN_SECRETS` access token.
    Escalation = 5,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Registration,
        Stage::Capture,
        Stage::Exchange,
        Stage::Introspection,
        Stage::Escalation,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }
}

/// Completed stages for one client, each with its first completion time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    pub completed: BTreeMap<Stage, DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed.contains_key(&stage)
    }

    pub fn stages_completed(&self) -> Vec<u8> {
        self.completed.keys().map(|s| s.number()).collect()
    }

    /// Lowest stage not yet completed; 6 once every stage is done.
    pub fn current_stage(&self) -> u8 {
        Stage::ALL
            .into_iter()
            .find(|s| !self.is_complete(*s))
            .map_or(6, Stage::number)
    }

    pub fn has_captured_data(&self) -> bool {
        self.is_complete(Stage::Capture)
    }

    pub fn has_exchanged_code(&self) -> bool {
        self.is_complete(Stage::Exchange)
    }

    pub fn has_elevated_token(&self) -> bool {
        self.is_complete(Stage::Escalation)
    }

    /// Allow when every stage up to and including `required` is complete,
    /// otherwise report the first missing one.
    pub fn check_access(&self, required: Stage) -> Result<()> {
        match Stage::ALL
            .into_iter()
            .take_while(|s| *s <= required)
            .find(|s| !self.is_complete(*s))
        {
            Some(missing) => Err(Error::StageLocked { required: missing.number() }),
            None => Ok(()),
        }
    }
}

/// Body of `GET /progress/{client_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub client_id: String,
    pub client_name: String,
    pub stages_completed: Vec<u8>,
    pub current_stage: u8,
    pub has_captured_data: bool,
    pub has_exchanged_code: bool,
    pub has_elevated_token: bool,
    pub completed_at: BTreeMap<String, DateTime<Utc>>,
    pub flags: BTreeMap<String, String>,
}

impl ProgressSummary {
    pub fn new(client_id: &str, client_name: &str, record: &ProgressRecord, flags: &FlagsConfig) -> Self {
        let mut completed_at = BTreeMap::new();
        let mut awarded = BTreeMap::new();
        for (stage, at) in &record.completed {
            let key = format!("stage{}", stage.number());
            if let Some(flag) = flags.for_stage(stage.number()) {
                awarded.insert(key.clone(), flag.to_string());
            }
            completed_at.insert(key, *at);
        }
        Self {
            client_id: client_id.to_string(),
            client_name: client_name.to_string(),
            stages_completed: record.stages_completed(),
            current_stage: record.current_stage(),
            has_captured_data: record.has_captured_data(),
            has_exchanged_code: record.has_exchanged_code(),
            has_elevated_token: record.has_elevated_token(),
            completed_at,
            flags: awarded,
        }
    }
}

/// Mark `stage` complete for `client_id`. Idempotent; the first completion
/// time is kept and only that one is logged and counted.
pub async fn record(store: &dyn Store, client_id: &str, stage: Stage) -> Result<bool> {
    let first = store.record_stage(client_id, stage, Utc::now()).await?;
    if first {
        completed(client_id, stage);
    }
    Ok(first)
}

/// Log and count a first completion of `stage`.
pub(crate) fn completed(client_id: &str, stage: Stage) {
    tracing::info!(client_id, stage = stage.number(), "stage completed");
    metrics::counter!("ctf_auth_stage_completions_total", "stage" => stage.number().to_string())
        .increment(1);
}

/// Gate a request on prior stages when ordering is enforced.
pub async fn check_access(store: &dyn Store, client_id: &str, required: Stage) -> Result<()> {
    let record = store.progress(client_id).await?;
    record.check_access(required).inspect_err(|_| {
        tracing::debug!(client_id, required = required.number(), "stage gate denied request");
    })
}
