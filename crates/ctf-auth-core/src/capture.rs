//! Sink for data the admin-visit actor reports back.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::progress::{self, Stage};
use crate::store::Store;

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureReport {
    pub client_id: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureList {
    pub client_id: String,
    pub captured: Vec<String>,
}

/// Append a payload verbatim. A payload with content marks stage 2 in the
/// same store step; a blank one is kept but completes nothing.
pub async fn report(store: &dyn Store, report: &CaptureReport) -> Result<()> {
    if report.client_id.trim().is_empty() {
        return Err(Error::InvalidRequest("client_id is required".to_string()));
    }
    let stage_at = (!report.data.trim().is_empty()).then(Utc::now);
    let first = store
        .append_capture(&report.client_id, &report.data, stage_at)
        .await?;
    tracing::info!(client_id = %report.client_id, bytes = report.data.len(), "capture reported");
    if first {
        progress::completed(&report.client_id, Stage::Capture);
    }
    Ok(())
}

pub async fn read(store: &dyn Store, client_id: &str) -> Result<CaptureList> {
    Ok(CaptureList {
        client_id: client_id.to_string(),
        captured: store.captures(client_id).await?,
    })
}
