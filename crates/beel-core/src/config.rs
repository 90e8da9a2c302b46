use crate::geo::{RegionBounds, ASSAM_BOUNDS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the beelsync core and daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tiles: TilesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the offline database and the tile cache
    /// (supports a leading '~'). Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Survey server base URL (if None, runs in local-only mode)
    pub server_url: Option<String>,

    /// Authentication token for the survey server
    pub auth_token: Option<String>,

    /// Seconds to wait after a reconnect before auto-syncing
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Periodic sync interval in seconds
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,

    /// Connectivity probe interval in seconds
    #[serde(default = "default_network_poll")]
    pub network_poll_seconds: u64,

    /// URL the reachability probe issues HEAD requests against
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Park submissions after this many failed attempts; unbounded when
    /// unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesConfig {
    /// Survey region to cache
    #[serde(default = "default_bounds")]
    pub bounds: RegionBounds,

    /// Default zoom range for download runs
    #[serde(default = "default_min_zoom")]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,

    /// Tile source URL template with {z}/{x}/{y} placeholders
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Tiles fetched concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
}

fn default_settle_delay() -> u64 {
    2
}

fn default_sync_interval() -> u64 {
    30
}

fn default_network_poll() -> u64 {
    15
}

fn default_probe_url() -> String {
    "https://connectivitycheck.gstatic.com/generate_204".to_string()
}

fn default_bounds() -> RegionBounds {
    ASSAM_BOUNDS
}

fn default_min_zoom() -> u8 {
    8
}

fn default_max_zoom() -> u8 {
    12
}

fn default_url_template() -> String {
    "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_pause() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            sync: SyncConfig::default(),
            tiles: TilesConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            settle_delay_secs: default_settle_delay(),
            interval_seconds: default_sync_interval(),
            network_poll_seconds: default_network_poll(),
            probe_url: default_probe_url(),
            max_retries: None,
        }
    }
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            bounds: default_bounds(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            url_template: default_url_template(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause(),
        }
    }
}

impl Config {
    /// Resolve the config file path: `BEEL_CONFIG` env override, else the
    /// platform config dir.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("BEEL_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(config_dir.join("beelsync").join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Base data directory, created on first use.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.paths.data_dir {
            Some(dir) => expand_tilde(dir),
            None => dirs::data_local_dir()
                .context("Cannot determine data directory")?
                .join("beelsync"),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        }
        Ok(dir)
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("offline.db"))
    }

    pub fn tile_cache_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("map_tiles"))
    }
}

/// Expand a leading '~' to the home directory; other paths pass through.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            let without_tilde = raw
                .trim_start_matches('~')
                .trim_start_matches(std::path::MAIN_SEPARATOR);
            return home.join(without_tilde);
        }
    }
    path.to_path_buf()
}
