//! Persisted record families of the offline store.

use crate::geo::RegionBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// An in-progress survey saved locally, overwritten on each save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    /// Survey form fields as captured by the UI layer.
    pub fields: Value,
    pub last_modified: DateTime<Utc>,
    pub status: DraftStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
}

/// A completed survey that could not reach the server, queued for retry.
/// Deleted only on confirmed server acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: String,
    pub survey: Value,
    /// Selects the update endpoint instead of create.
    pub is_edit: bool,
    pub timestamp: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
}

/// Partial update applied to a pending submission; only the fields that
/// are present are overwritten.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdate {
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub last_retry: Option<DateTime<Utc>>,
}

/// A photo captured without an immediate upload opportunity. `synced`
/// is monotonic and never reverts; records are only removed by the
/// explicit clear-all operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineImage {
    pub id: String,
    /// Local URI of the captured file (commonly `file://...`).
    pub uri: String,
    pub metadata: ImageMetadata,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Photo metadata. The known fields feed the upload request; anything
/// else the capture layer attaches rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beel_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Generic overflow queue entry for actions not covered by pending
/// submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub action: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// Persisted description of the currently cached tile set. Replaced
/// wholesale on each successful download run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCacheManifest {
    pub bounds: RegionBounds,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Keyed by `"{zoom}_{x}_{y}"`.
    pub tiles: BTreeMap<String, CachedTile>,
    pub downloaded_at: DateTime<Utc>,
    pub total_tiles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTile {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub url: String,
    pub local_path: PathBuf,
    pub downloaded_at: DateTime<Utc>,
}
