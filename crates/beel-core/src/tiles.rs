//! Offline map tile cache for the survey region.
//!
//! Converts the configured geographic bounds into a tile index, downloads
//! tiles in throttled concurrent batches, persists a manifest describing
//! the cached set, and exposes the cache for query and eviction. A failed
//! tile never aborts its batch or the run.

use crate::error::{ApiError, StoreError, TileError};
use crate::geo::{self, RegionBounds, TileId};
use crate::guard::FlightGuard;
use crate::models::{CachedTile, TileCacheManifest};
use crate::store::OfflineStore;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Fetches raw tile bytes for a URL. The HTTP implementation is the
/// production collaborator; tests substitute their own.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

#[async_trait]
impl<T: TileFetcher + ?Sized> TileFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        (**self).fetch(url).await
    }
}

/// reqwest-backed tile fetcher. Tile providers require an identifying
/// user agent.
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("beelsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpTileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPhase {
    Started,
    Downloading,
    Completed,
    Cancelled,
}

/// Progress notification published after each batch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DownloadProgress {
    pub status: DownloadPhase,
    pub total: usize,
    pub downloaded: usize,
    /// Percentage, 0.0 to 100.0.
    pub progress: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadSummary {
    pub success: bool,
    pub downloaded: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadStatus {
    pub is_downloading: bool,
    pub progress: f64,
    pub downloaded: usize,
    pub total: usize,
}

/// Tile download settings; defaults live in [`crate::config::TilesConfig`].
#[derive(Debug, Clone)]
pub struct TileCacheSettings {
    pub bounds: RegionBounds,
    pub url_template: String,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

/// Manages the on-disk tile cache. One constructible instance owns the
/// single download state machine.
pub struct TileCacheManager<F: TileFetcher> {
    store: Arc<OfflineStore>,
    fetcher: F,
    cache_dir: PathBuf,
    settings: TileCacheSettings,
    downloading: AtomicBool,
    cancel: AtomicBool,
    downloaded: AtomicUsize,
    total: AtomicUsize,
    progress: broadcast::Sender<DownloadProgress>,
}

fn tile_url(template: &str, tile: TileId) -> String {
    template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

impl<F: TileFetcher> TileCacheManager<F> {
    pub fn new(
        store: Arc<OfflineStore>,
        fetcher: F,
        cache_dir: PathBuf,
        mut settings: TileCacheSettings,
    ) -> Self {
        settings.batch_size = settings.batch_size.max(1);
        let (progress, _) = broadcast::channel(64);
        Self {
            store,
            fetcher,
            cache_dir,
            settings,
            downloading: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            downloaded: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            progress,
        }
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    /// Request a cooperative stop; honored at the next batch boundary.
    pub fn cancel_download(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn download_status(&self) -> DownloadStatus {
        let downloaded = self.downloaded.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        DownloadStatus {
            is_downloading: self.downloading.load(Ordering::SeqCst),
            progress: percentage(downloaded, total),
            downloaded,
            total,
        }
    }

    /// URL template a map view can point at to serve tiles from the
    /// cache directory.
    pub fn offline_tile_url_template(&self) -> String {
        format!("file://{}/{{z}}_{{x}}_{{y}}.png", self.cache_dir.display())
    }

    /// Download every tile covering the configured bounds for the given
    /// zoom range. Batches run strictly sequentially; the fetches inside
    /// a batch are concurrent and unordered. Tiles already on disk are
    /// skipped, so a partially completed run resumes without re-fetching.
    pub async fn download_region(
        &self,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<DownloadSummary, TileError> {
        if self
            .downloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("tile download already in progress, skipping");
            return Err(TileError::AlreadyDownloading);
        }
        let _guard = FlightGuard(&self.downloading);
        self.cancel.store(false, Ordering::SeqCst);
        self.downloaded.store(0, Ordering::SeqCst);

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let tiles = geo::tile_index(self.settings.bounds, min_zoom, max_zoom);
        let total = tiles.len();
        self.total.store(total, Ordering::SeqCst);
        info!(total, min_zoom, max_zoom, "starting tile download run");
        self.emit(DownloadPhase::Started, total, 0);

        let mut cached: BTreeMap<String, CachedTile> = BTreeMap::new();
        let mut cancelled = false;

        for batch in tiles.chunks(self.settings.batch_size) {
            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }

            let results = join_all(batch.iter().map(|tile| self.download_tile(*tile))).await;
            for (tile, result) in batch.iter().zip(results) {
                match result {
                    Ok(local_path) => {
                        cached.insert(
                            tile.key(),
                            CachedTile {
                                zoom: tile.zoom,
                                x: tile.x,
                                y: tile.y,
                                url: tile_url(&self.settings.url_template, *tile),
                                local_path,
                                downloaded_at: Utc::now(),
                            },
                        );
                        self.downloaded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => warn!(tile = %tile.key(), error = %e, "tile download failed"),
                }
            }

            let downloaded = self.downloaded.load(Ordering::SeqCst);
            self.emit(DownloadPhase::Downloading, total, downloaded);

            // breathe between batches so the tile source is not hammered
            tokio::time::sleep(self.settings.batch_pause).await;
        }

        let downloaded = self.downloaded.load(Ordering::SeqCst);
        let manifest = TileCacheManifest {
            bounds: self.settings.bounds,
            min_zoom,
            max_zoom,
            total_tiles: cached.len(),
            tiles: cached,
            downloaded_at: Utc::now(),
        };
        self.store.save_tile_manifest(&manifest)?;

        if cancelled {
            info!(downloaded, total, "tile download cancelled");
            self.emit(DownloadPhase::Cancelled, total, downloaded);
        } else {
            info!(downloaded, total, "tile download completed");
            let _ = self.progress.send(DownloadProgress {
                status: DownloadPhase::Completed,
                total,
                downloaded,
                progress: 100.0,
            });
        }

        Ok(DownloadSummary {
            success: !cancelled,
            downloaded,
            total,
        })
    }

    async fn download_tile(&self, tile: TileId) -> Result<PathBuf, TileError> {
        let local_path = self.cache_dir.join(tile.filename());
        if tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            return Ok(local_path);
        }
        let url = tile_url(&self.settings.url_template, tile);
        let bytes = self.fetcher.fetch(&url).await?;
        tokio::fs::write(&local_path, &bytes).await?;
        Ok(local_path)
    }

    fn emit(&self, status: DownloadPhase, total: usize, downloaded: usize) {
        let _ = self.progress.send(DownloadProgress {
            status,
            total,
            downloaded,
            progress: percentage(downloaded, total),
        });
    }

    /// True iff a manifest exists and records at least one tile.
    pub fn is_offline_map_available(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .tile_manifest()?
            .map(|manifest| manifest.total_tiles > 0)
            .unwrap_or(false))
    }

    pub fn manifest(&self) -> Result<Option<TileCacheManifest>, StoreError> {
        self.store.tile_manifest()
    }

    /// Byte size of the cache directory, from a live filesystem scan so
    /// the answer reflects actual state even when the manifest is stale.
    pub async fn cache_size(&self) -> Result<u64, TileError> {
        let mut dir = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut total = 0u64;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Delete the cache directory and the manifest. Idempotent; clearing
    /// an already-empty cache succeeds.
    pub async fn clear_cached_tiles(&self) -> Result<(), TileError> {
        match tokio::fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store.delete_tile_manifest()?;
        info!("cleared tile cache");
        Ok(())
    }
}

fn percentage(downloaded: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        downloaded as f64 / total as f64 * 100.0
    }
}
