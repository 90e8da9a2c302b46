//! Reconciliation of locally queued work against the remote service.
//!
//! One constructible manager instance owns the single sync state machine.
//! A pass drains pending submissions and unsynced photos through the API
//! collaborator, folding per-item failures into an aggregate report;
//! item failures never abort the remaining items.

use crate::api::{PhotoUpload, SurveyApi};
use crate::error::SyncError;
use crate::guard::FlightGuard;
use crate::models::PendingUpdate;
use crate::net::NetworkMonitor;
use crate::store::OfflineStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Aggregate result of one sync pass. Carries enough structure for a
/// caller to report "synced N of M" without reinspecting storage.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// True when every enumerated item was accepted.
    pub success: bool,
    pub total_items: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Items parked over the configured retry cap, left in storage.
    pub skipped: usize,
    pub errors: Vec<SyncItemError>,
}

impl SyncReport {
    fn empty() -> Self {
        Self {
            success: true,
            total_items: 0,
            success_count: 0,
            failure_count: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemError {
    pub id: String,
    pub kind: SyncItemKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncItemKind {
    Submission,
    Photo,
}

/// Lifecycle notifications published on the sync event channel.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Completed(SyncReport),
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
}

pub struct SyncManager<A: SurveyApi> {
    store: Arc<OfflineStore>,
    monitor: Arc<NetworkMonitor>,
    api: A,
    /// When set, submissions at or over this retry count are skipped
    /// (left in storage) instead of being retried every pass.
    max_retries: Option<u32>,
    syncing: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl<A: SurveyApi> SyncManager<A> {
    pub fn new(
        store: Arc<OfflineStore>,
        monitor: Arc<NetworkMonitor>,
        api: A,
        max_retries: Option<u32>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            store,
            monitor,
            api,
            max_retries,
            syncing: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.monitor.current_status().is_online,
            is_syncing: self.syncing.load(Ordering::SeqCst),
        }
    }

    /// Run one sync pass. Preconditions (a pass already in flight, the
    /// device offline, a blank token) short-circuit with a declared
    /// error; a returned report means the pass ran to completion, item
    /// failures included.
    pub async fn sync_pending_data(&self, token: &str) -> Result<SyncReport, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, skipping");
            return Err(SyncError::AlreadySyncing);
        }
        let _guard = FlightGuard(&self.syncing);

        if !self.monitor.current_status().is_online {
            debug!("device is offline, cannot sync");
            return Err(SyncError::Offline);
        }
        if token.trim().is_empty() {
            return Err(SyncError::MissingToken);
        }

        let _ = self.events.send(SyncEvent::Started);
        match self.run_pass(token).await {
            Ok(report) => {
                info!(
                    synced = report.success_count,
                    failed = report.failure_count,
                    total = report.total_items,
                    "sync pass completed"
                );
                let _ = self.events.send(SyncEvent::Completed(report.clone()));
                Ok(report)
            }
            Err(e) => {
                let _ = self.events.send(SyncEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Explicit "sync now" entry point; same pass, same in-flight guard.
    pub async fn force_sync_all(&self, token: &str) -> Result<SyncReport, SyncError> {
        info!("force sync requested");
        self.sync_pending_data(token).await
    }

    async fn run_pass(&self, token: &str) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::empty();

        let pending = self.store.pending_submissions()?;
        report.total_items += pending.len();
        info!(count = pending.len(), "syncing pending submissions");

        for (id, submission) in pending {
            if let Some(max) = self.max_retries {
                if submission.retry_count >= max {
                    debug!(%id, retry_count = submission.retry_count, "over retry cap, parking");
                    report.skipped += 1;
                    continue;
                }
            }

            let result = if submission.is_edit {
                self.api.update_survey(&submission.survey, token).await
            } else {
                self.api.create_survey(&submission.survey, token).await
            };

            match result {
                Ok(_) => {
                    self.store.remove_pending_submission(&id)?;
                    report.success_count += 1;
                    debug!(%id, "submission accepted");
                }
                Err(e) => {
                    warn!(%id, error = %e, "submission failed");
                    report.failure_count += 1;
                    report.errors.push(SyncItemError {
                        id: id.clone(),
                        kind: SyncItemKind::Submission,
                        message: e.to_string(),
                    });
                    self.store.update_pending_submission(
                        &id,
                        PendingUpdate {
                            retry_count: Some(submission.retry_count + 1),
                            last_error: Some(e.to_string()),
                            last_retry: Some(Utc::now()),
                        },
                    )?;
                }
            }
        }

        self.sync_offline_photos(token, &mut report).await?;

        // the pass ran; record it even if some items failed
        self.store.set_last_sync_timestamp(Utc::now())?;
        report.success = report.failure_count == 0;
        Ok(report)
    }

    async fn sync_offline_photos(
        &self,
        token: &str,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let unsynced: Vec<_> = self
            .store
            .offline_images()?
            .into_iter()
            .filter(|(_, image)| !image.synced)
            .collect();
        report.total_items += unsynced.len();
        info!(count = unsynced.len(), "syncing offline photos");

        for (id, image) in unsynced {
            let photo = PhotoUpload {
                beel_id: image.metadata.beel_id.unwrap_or(0),
                title: image
                    .metadata
                    .title
                    .clone()
                    .unwrap_or_else(|| "Offline Photo".to_string()),
                uri: image.uri.clone(),
                latitude: image
                    .metadata
                    .latitude
                    .clone()
                    .unwrap_or_else(|| "0".to_string()),
                longitude: image
                    .metadata
                    .longitude
                    .clone()
                    .unwrap_or_else(|| "0".to_string()),
            };

            match self.api.upload_photo(&photo, token).await {
                Ok(_) => {
                    self.store.mark_image_synced(&id, Utc::now())?;
                    report.success_count += 1;
                    debug!(%id, "photo uploaded");
                }
                Err(e) => {
                    warn!(%id, error = %e, "photo upload failed");
                    report.failure_count += 1;
                    report.errors.push(SyncItemError {
                        id,
                        kind: SyncItemKind::Photo,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
