use anyhow::{Context, Result};
pub use beel_core::config::Config;
use std::path::Path;
use tracing::info;

/// Load the daemon configuration, writing a default config file when
/// none exists yet.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        config
            .save_to(path)
            .context("Failed to save default config")?;
        info!(path = %path.display(), "created default config");
        return Ok(config);
    }
    Config::load_from(path)
}
