//! Local SQLite store for offline survey data.
//!
//! Each record family lives under its own key as one serialized JSON map
//! (or scalar), mirroring the flat key layout the mobile client uses.
//! Records are read-modify-written per family with no cross-family
//! transaction; concurrent writers to the same family are last-write-wins.

use crate::error::StoreError;
use crate::models::{
    Draft, DraftStatus, ImageMetadata, OfflineImage, PendingSubmission, PendingUpdate,
    SubmissionStatus, SyncQueueItem, TileCacheManifest,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const KEY_DRAFTS: &str = "survey_drafts";
const KEY_PENDING: &str = "pending_submissions";
const KEY_IMAGES: &str = "offline_images";
const KEY_SYNC_QUEUE: &str = "sync_queue";
const KEY_LAST_SYNC: &str = "last_sync_timestamp";
const KEY_TILE_MANIFEST: &str = "cached_map_tiles";

/// Keys wiped by `clear_all_offline_data`. The tile manifest is owned by
/// the tile cache and cleared separately.
const SURVEY_KEYS: [&str; 5] = [
    KEY_DRAFTS,
    KEY_PENDING,
    KEY_IMAGES,
    KEY_SYNC_QUEUE,
    KEY_LAST_SYNC,
];

/// Bumped when the persisted record layout changes; the value stored in
/// the meta table is the migration hook for older databases.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable offline store backing drafts, pending submissions, offline
/// images, the sync queue and the tile manifest.
pub struct OfflineStore {
    conn: Mutex<Connection>,
}

impl OfflineStore {
    /// Open the store at the given path and initialize tables if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let found: Option<u32> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(found) if found > SCHEMA_VERSION => {
                return Err(StoreError::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn read_value<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|source| StoreError::Decode { key, source })?,
            )),
            None => Ok(None),
        }
    }

    fn write_value<T: Serialize>(&self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, json],
        )?;
        Ok(())
    }

    fn read_map<T: DeserializeOwned>(
        &self,
        key: &'static str,
    ) -> Result<BTreeMap<String, T>, StoreError> {
        Ok(self.read_value(key)?.unwrap_or_default())
    }

    fn delete_key(&self, key: &'static str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    // --- drafts ---

    /// Upsert a draft; uses the caller-supplied id when given, otherwise
    /// generates a time-ordered one.
    pub fn save_draft(&self, id: Option<String>, fields: serde_json::Value) -> Result<String, StoreError> {
        let draft_id = id.unwrap_or_else(|| format!("draft_{}", Uuid::now_v7()));
        let mut drafts = self.read_map::<Draft>(KEY_DRAFTS)?;
        drafts.insert(
            draft_id.clone(),
            Draft {
                id: draft_id.clone(),
                fields,
                last_modified: Utc::now(),
                status: DraftStatus::Draft,
            },
        );
        self.write_value(KEY_DRAFTS, &drafts)?;
        Ok(draft_id)
    }

    pub fn drafts(&self) -> Result<BTreeMap<String, Draft>, StoreError> {
        self.read_map(KEY_DRAFTS)
    }

    pub fn draft(&self, id: &str) -> Result<Option<Draft>, StoreError> {
        Ok(self.drafts()?.remove(id))
    }

    pub fn delete_draft(&self, id: &str) -> Result<(), StoreError> {
        let mut drafts = self.read_map::<Draft>(KEY_DRAFTS)?;
        drafts.remove(id);
        self.write_value(KEY_DRAFTS, &drafts)
    }

    // --- pending submissions ---

    pub fn add_pending_submission(
        &self,
        survey: serde_json::Value,
        is_edit: bool,
    ) -> Result<String, StoreError> {
        let id = format!("pending_{}", Uuid::now_v7());
        let mut pending = self.read_map::<PendingSubmission>(KEY_PENDING)?;
        pending.insert(
            id.clone(),
            PendingSubmission {
                id: id.clone(),
                survey,
                is_edit,
                timestamp: Utc::now(),
                status: SubmissionStatus::Pending,
                retry_count: 0,
                last_error: None,
                last_retry: None,
            },
        );
        self.write_value(KEY_PENDING, &pending)?;
        debug!(%id, is_edit, "queued pending submission");
        Ok(id)
    }

    pub fn pending_submissions(&self) -> Result<BTreeMap<String, PendingSubmission>, StoreError> {
        self.read_map(KEY_PENDING)
    }

    pub fn remove_pending_submission(&self, id: &str) -> Result<(), StoreError> {
        let mut pending = self.read_map::<PendingSubmission>(KEY_PENDING)?;
        pending.remove(id);
        self.write_value(KEY_PENDING, &pending)
    }

    /// Merge the given fields into an existing submission; unknown ids
    /// are a no-op.
    pub fn update_pending_submission(
        &self,
        id: &str,
        update: PendingUpdate,
    ) -> Result<(), StoreError> {
        let mut pending = self.read_map::<PendingSubmission>(KEY_PENDING)?;
        if let Some(record) = pending.get_mut(id) {
            if let Some(retry_count) = update.retry_count {
                record.retry_count = retry_count;
            }
            if let Some(last_error) = update.last_error {
                record.last_error = Some(last_error);
            }
            if let Some(last_retry) = update.last_retry {
                record.last_retry = Some(last_retry);
            }
            self.write_value(KEY_PENDING, &pending)?;
        }
        Ok(())
    }

    // --- offline images ---

    pub fn save_offline_image(
        &self,
        uri: &str,
        metadata: ImageMetadata,
    ) -> Result<String, StoreError> {
        let id = format!("img_{}", Uuid::now_v7());
        let mut images = self.read_map::<OfflineImage>(KEY_IMAGES)?;
        images.insert(
            id.clone(),
            OfflineImage {
                id: id.clone(),
                uri: uri.to_string(),
                metadata,
                timestamp: Utc::now(),
                synced: false,
                synced_at: None,
            },
        );
        self.write_value(KEY_IMAGES, &images)?;
        Ok(id)
    }

    pub fn offline_images(&self) -> Result<BTreeMap<String, OfflineImage>, StoreError> {
        self.read_map(KEY_IMAGES)
    }

    /// Flip an image to synced. Monotonic: an already-synced image keeps
    /// its original `synced_at`.
    pub fn mark_image_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut images = self.read_map::<OfflineImage>(KEY_IMAGES)?;
        if let Some(image) = images.get_mut(id) {
            if !image.synced {
                image.synced = true;
                image.synced_at = Some(at);
                self.write_value(KEY_IMAGES, &images)?;
            }
        }
        Ok(())
    }

    // --- sync queue ---

    pub fn add_to_sync_queue(
        &self,
        action: &str,
        data: serde_json::Value,
    ) -> Result<String, StoreError> {
        let id = format!("sync_{}", Uuid::now_v7());
        let mut queue: Vec<SyncQueueItem> = self.read_value(KEY_SYNC_QUEUE)?.unwrap_or_default();
        queue.push(SyncQueueItem {
            id: id.clone(),
            action: action.to_string(),
            data,
            timestamp: Utc::now(),
            retry_count: 0,
        });
        self.write_value(KEY_SYNC_QUEUE, &queue)?;
        Ok(id)
    }

    pub fn sync_queue(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        Ok(self.read_value(KEY_SYNC_QUEUE)?.unwrap_or_default())
    }

    pub fn clear_sync_queue(&self) -> Result<(), StoreError> {
        self.write_value::<Vec<SyncQueueItem>>(KEY_SYNC_QUEUE, &Vec::new())
    }

    // --- sync timestamp ---

    pub fn set_last_sync_timestamp(&self, ts: DateTime<Utc>) -> Result<(), StoreError> {
        self.write_value(KEY_LAST_SYNC, &ts)
    }

    pub fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.read_value(KEY_LAST_SYNC)
    }

    // --- tile manifest ---

    pub fn save_tile_manifest(&self, manifest: &TileCacheManifest) -> Result<(), StoreError> {
        self.write_value(KEY_TILE_MANIFEST, manifest)
    }

    pub fn tile_manifest(&self) -> Result<Option<TileCacheManifest>, StoreError> {
        self.read_value(KEY_TILE_MANIFEST)
    }

    pub fn delete_tile_manifest(&self) -> Result<(), StoreError> {
        self.delete_key(KEY_TILE_MANIFEST)
    }

    // --- maintenance ---

    /// Wipe every survey collection. Destructive; callers confirm with
    /// the user first.
    pub fn clear_all_offline_data(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        for key in SURVEY_KEYS {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        Ok(())
    }

    /// Total serialized size of the survey collections in bytes.
    /// Advisory only, never used for eviction decisions.
    pub fn offline_data_size(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut total = 0u64;
        for key in SURVEY_KEYS {
            let value: Option<String> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            if let Some(value) = value {
                total += value.len() as u64;
            }
        }
        Ok(total)
    }
}
