use async_trait::async_trait;
use beel_core::api::{PhotoUpload, SurveyApi};
use beel_core::error::{ApiError, SyncError};
use beel_core::models::ImageMetadata;
use beel_core::net::{ConnectionType, ConnectivityProbe, ConnectivitySample, NetworkMonitor};
use beel_core::store::OfflineStore;
use beel_core::sync::{SyncEvent, SyncManager};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct NullProbe;

#[async_trait]
impl ConnectivityProbe for NullProbe {
    async fn sample(&self) -> ConnectivitySample {
        ConnectivitySample {
            connected: false,
            internet_reachable: false,
            connection_type: ConnectionType::Unknown,
        }
    }
}

fn online_sample() -> ConnectivitySample {
    ConnectivitySample {
        connected: true,
        internet_reachable: true,
        connection_type: ConnectionType::Wifi,
    }
}

fn online_monitor() -> Arc<NetworkMonitor> {
    let monitor = NetworkMonitor::new(Box::new(NullProbe), Duration::from_millis(10));
    monitor.report(online_sample());
    Arc::new(monitor)
}

fn offline_monitor() -> Arc<NetworkMonitor> {
    Arc::new(NetworkMonitor::new(
        Box::new(NullProbe),
        Duration::from_millis(10),
    ))
}

fn open_store() -> (TempDir, Arc<OfflineStore>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = OfflineStore::open(&dir.path().join("offline.db")).expect("open store");
    (dir, Arc::new(store))
}

#[derive(Default)]
struct MockApi {
    fail_surveys: bool,
    fail_photos: bool,
    delay: Option<Duration>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    photos: AtomicUsize,
    last_photo: Mutex<Option<PhotoUpload>>,
}

impl MockApi {
    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn rejected() -> ApiError {
        ApiError::Rejected {
            status: 500,
            message: "internal server error".into(),
        }
    }
}

#[async_trait]
impl SurveyApi for MockApi {
    async fn create_survey(&self, _survey: &Value, _token: &str) -> Result<Value, ApiError> {
        self.maybe_delay().await;
        if self.fail_surveys {
            return Err(Self::rejected());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"status": "success"}))
    }

    async fn update_survey(&self, _survey: &Value, _token: &str) -> Result<Value, ApiError> {
        self.maybe_delay().await;
        if self.fail_surveys {
            return Err(Self::rejected());
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"status": "success"}))
    }

    async fn upload_photo(&self, photo: &PhotoUpload, _token: &str) -> Result<Value, ApiError> {
        self.maybe_delay().await;
        if self.fail_photos {
            return Err(Self::rejected());
        }
        self.photos.fetch_add(1, Ordering::SeqCst);
        *self.last_photo.lock().unwrap() = Some(photo.clone());
        Ok(json!({"status": "success"}))
    }
}

#[tokio::test]
async fn successful_pass_drains_submissions_and_photos() {
    let (_dir, store) = open_store();
    store
        .add_pending_submission(json!({"beel_id": 1, "water_area": 120}), false)
        .unwrap();
    store
        .add_pending_submission(json!({"beel_id": 2, "survey_id": 9}), true)
        .unwrap();
    store
        .save_offline_image(
            "file:///tmp/one.jpg",
            ImageMetadata {
                beel_id: Some(1),
                title: Some("Inlet".into()),
                latitude: Some("26.1".into()),
                longitude: Some("91.7".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let synced_id = store
        .save_offline_image("file:///tmp/two.jpg", ImageMetadata::default())
        .unwrap();
    store
        .mark_image_synced(&synced_id, chrono::Utc::now())
        .unwrap();

    let api = Arc::new(MockApi::default());
    let manager = SyncManager::new(store.clone(), online_monitor(), api.clone(), None);
    let report = manager.sync_pending_data("token-123").await.unwrap();

    // two submissions plus the one unsynced photo
    assert!(report.success);
    assert_eq!(report.total_items, 3);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.failure_count, 0);
    assert!(report.errors.is_empty());

    assert!(store.pending_submissions().unwrap().is_empty());
    let images = store.offline_images().unwrap();
    assert!(images.values().all(|image| image.synced));
    assert!(store.last_sync_timestamp().unwrap().is_some());

    assert_eq!(api.creates.load(Ordering::SeqCst), 1);
    assert_eq!(api.updates.load(Ordering::SeqCst), 1);
    assert_eq!(api.photos.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_submissions_stay_queued_with_retry_accounting() {
    let (_dir, store) = open_store();
    let id = store
        .add_pending_submission(json!({"beel_id": 4}), false)
        .unwrap();

    let api = MockApi {
        fail_surveys: true,
        ..Default::default()
    };
    let manager = SyncManager::new(store.clone(), online_monitor(), api, None);

    for attempt in 1..=3u32 {
        let report = manager.sync_pending_data("token-123").await.unwrap();
        assert!(!report.success);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.errors[0].id, id);

        let record = store.pending_submissions().unwrap()[&id].clone();
        assert_eq!(record.retry_count, attempt);
        assert!(record.last_error.is_some());
        assert!(record.last_retry.is_some());
    }

    // never silently dropped
    assert_eq!(store.pending_submissions().unwrap().len(), 1);
    // the pass itself still completed, so the timestamp advanced
    assert!(store.last_sync_timestamp().unwrap().is_some());
}

#[tokio::test]
async fn photo_failure_leaves_image_unsynced() {
    let (_dir, store) = open_store();
    store
        .save_offline_image("file:///tmp/p.jpg", ImageMetadata::default())
        .unwrap();

    let api = MockApi {
        fail_photos: true,
        ..Default::default()
    };
    let manager = SyncManager::new(store.clone(), online_monitor(), api, None);
    let report = manager.sync_pending_data("token-123").await.unwrap();

    assert_eq!(report.failure_count, 1);
    assert!(store
        .offline_images()
        .unwrap()
        .values()
        .all(|image| !image.synced));
}

#[tokio::test]
async fn photo_upload_defaults_missing_fields() {
    let (_dir, store) = open_store();
    store
        .save_offline_image("file:///tmp/p.jpg", ImageMetadata::default())
        .unwrap();

    let api = Arc::new(MockApi::default());
    let manager = SyncManager::new(store.clone(), online_monitor(), api.clone(), None);
    manager.sync_pending_data("token-123").await.unwrap();

    let photo = api
        .last_photo
        .lock()
        .unwrap()
        .clone()
        .expect("photo uploaded");
    assert_eq!(photo.beel_id, 0);
    assert_eq!(photo.title, "Offline Photo");
    // the endpoint requires coordinates; absent ones go up as "0"
    assert_eq!(photo.latitude, "0");
    assert_eq!(photo.longitude, "0");
}

#[tokio::test]
async fn offline_pass_is_rejected_without_touching_storage() {
    let (_dir, store) = open_store();
    store
        .add_pending_submission(json!({"beel_id": 5}), false)
        .unwrap();

    let manager = SyncManager::new(store.clone(), offline_monitor(), MockApi::default(), None);
    let outcome = manager.sync_pending_data("token-123").await;
    assert!(matches!(outcome, Err(SyncError::Offline)));
    assert_eq!(store.pending_submissions().unwrap().len(), 1);
    assert!(store.last_sync_timestamp().unwrap().is_none());
}

#[tokio::test]
async fn blank_token_is_rejected() {
    let (_dir, store) = open_store();
    let manager = SyncManager::new(store, online_monitor(), MockApi::default(), None);
    assert!(matches!(
        manager.sync_pending_data("").await,
        Err(SyncError::MissingToken)
    ));
    assert!(matches!(
        manager.sync_pending_data("   ").await,
        Err(SyncError::MissingToken)
    ));
}

#[tokio::test]
async fn concurrent_pass_is_rejected_and_mutates_nothing() {
    let (_dir, store) = open_store();
    store
        .add_pending_submission(json!({"beel_id": 6}), false)
        .unwrap();

    let api = MockApi {
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let manager = Arc::new(SyncManager::new(store.clone(), online_monitor(), api, None));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.sync_pending_data("token-123").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(manager.sync_status().is_syncing);
    let outcome = manager.sync_pending_data("token-123").await;
    assert!(matches!(outcome, Err(SyncError::AlreadySyncing)));
    // first pass still mid-flight: the queue is untouched by the reject
    assert_eq!(store.pending_submissions().unwrap().len(), 1);

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.success_count, 1);
    assert!(!manager.sync_status().is_syncing);
}

#[tokio::test]
async fn submissions_over_retry_cap_are_parked() {
    let (_dir, store) = open_store();
    let id = store
        .add_pending_submission(json!({"beel_id": 7}), false)
        .unwrap();
    store
        .update_pending_submission(
            &id,
            beel_core::models::PendingUpdate {
                retry_count: Some(2),
                ..Default::default()
            },
        )
        .unwrap();

    let api = Arc::new(MockApi::default());
    let manager = SyncManager::new(store.clone(), online_monitor(), api.clone(), Some(2));
    let report = manager.sync_pending_data("token-123").await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.success_count, 0);
    assert_eq!(api.creates.load(Ordering::SeqCst), 0);
    // parked, not dropped
    assert_eq!(store.pending_submissions().unwrap().len(), 1);
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let (_dir, store) = open_store();
    store
        .add_pending_submission(json!({"beel_id": 8}), false)
        .unwrap();

    let manager = SyncManager::new(store, online_monitor(), MockApi::default(), None);
    let mut events = manager.subscribe();
    manager.force_sync_all("token-123").await.unwrap();

    assert!(matches!(events.recv().await, Ok(SyncEvent::Started)));
    match events.recv().await {
        Ok(SyncEvent::Completed(report)) => {
            assert_eq!(report.success_count, 1);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}
