mod config;

use anyhow::{Context, Result};
use beel_core::api::{HttpSurveyApi, SurveyApi};
use beel_core::error::SyncError;
use beel_core::geo;
use beel_core::net::{HttpProbe, NetworkMonitor};
use beel_core::store::OfflineStore;
use beel_core::sync::SyncManager;
use beel_core::tiles::{DownloadPhase, HttpTileFetcher, TileCacheManager, TileCacheSettings};
use beel_core::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "beel-syncd", about = "Background sync daemon for the beel survey app")]
struct Args {
    /// Path to configuration file (defaults to the platform config dir,
    /// or the BEEL_CONFIG environment variable)
    #[arg(long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync daemon (default)
    Run,
    /// Run a single sync pass and exit
    Sync,
    /// Download map tiles for the configured survey region
    DownloadTiles {
        #[arg(long)]
        min_zoom: Option<u8>,
        #[arg(long)]
        max_zoom: Option<u8>,
    },
    /// Delete all cached map tiles
    ClearTiles,
    /// Show offline cache status
    CacheStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // Expand config path
    let config_path = match &args.config {
        Some(raw) => {
            if let Some(rest) = raw.strip_prefix("~/") {
                dirs::home_dir()
                    .context("Cannot determine home directory")?
                    .join(rest)
            } else {
                PathBuf::from(raw)
            }
        }
        None => Config::config_path()?,
    };
    let config = config::load_config(&config_path)?;

    let store = Arc::new(OfflineStore::open(&config.store_path()?)?);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(&config, store).await,
        Command::Sync => run_single_sync(&config, store).await,
        Command::DownloadTiles { min_zoom, max_zoom } => {
            let min_zoom = min_zoom.unwrap_or(config.tiles.min_zoom);
            let max_zoom = max_zoom.unwrap_or(config.tiles.max_zoom);
            download_tiles(&config, store, min_zoom, max_zoom).await
        }
        Command::ClearTiles => {
            let tiles = tile_manager(&config, store)?;
            tiles.clear_cached_tiles().await?;
            println!("Cached map tiles cleared");
            Ok(())
        }
        Command::CacheStatus => print_cache_status(&config, store).await,
    }
}

fn tile_settings(config: &Config) -> TileCacheSettings {
    TileCacheSettings {
        bounds: config.tiles.bounds,
        url_template: config.tiles.url_template.clone(),
        batch_size: config.tiles.batch_size,
        batch_pause: Duration::from_millis(config.tiles.batch_pause_ms),
    }
}

fn tile_manager(
    config: &Config,
    store: Arc<OfflineStore>,
) -> Result<Arc<TileCacheManager<HttpTileFetcher>>> {
    Ok(Arc::new(TileCacheManager::new(
        store,
        HttpTileFetcher::new(),
        config.tile_cache_dir()?,
        tile_settings(config),
    )))
}

fn sync_manager(
    config: &Config,
    store: Arc<OfflineStore>,
) -> Result<(Arc<NetworkMonitor>, SyncManager<HttpSurveyApi>)> {
    let server_url = config
        .sync
        .server_url
        .clone()
        .context("No server_url configured; set [sync] server_url in the config file")?;
    let monitor = Arc::new(NetworkMonitor::new(
        Box::new(HttpProbe::new(config.sync.probe_url.clone())),
        Duration::from_secs(config.sync.settle_delay_secs),
    ));
    let manager = SyncManager::new(
        store,
        monitor.clone(),
        HttpSurveyApi::new(server_url),
        config.sync.max_retries,
    );
    Ok((monitor, manager))
}

async fn run_daemon(config: &Config, store: Arc<OfflineStore>) -> Result<()> {
    let (monitor, manager) = sync_manager(config, store)?;
    let token = config.sync.auth_token.clone().unwrap_or_default();

    tokio::spawn(
        monitor
            .clone()
            .run(Duration::from_secs(config.sync.network_poll_seconds)),
    );

    let mut net_events = monitor.subscribe();
    let mut triggers = monitor.sync_triggers();
    let interval = Duration::from_secs(config.sync.interval_seconds);
    info!("beel-syncd started");

    loop {
        tokio::select! {
            event = net_events.recv() => {
                if let Ok(event) = event {
                    info!(?event, "network transition");
                }
            }

            trigger = triggers.recv() => {
                if trigger.is_ok() {
                    info!("connection restored, syncing pending data");
                    run_sync_pass(&manager, &token).await;
                }
            }

            // Periodic sync check
            _ = tokio::time::sleep(interval) => {
                if monitor.current_status().is_online {
                    debug!("performing periodic sync check");
                    run_sync_pass(&manager, &token).await;
                }
            }

            // Handle shutdown signals
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping beel-syncd");
                break;
            }
        }
    }

    Ok(())
}

async fn run_sync_pass<A: SurveyApi>(manager: &SyncManager<A>, token: &str) {
    match manager.sync_pending_data(token).await {
        Ok(report) => info!(
            synced = report.success_count,
            failed = report.failure_count,
            skipped = report.skipped,
            total = report.total_items,
            "sync pass finished"
        ),
        Err(SyncError::AlreadySyncing) => debug!("sync already in progress"),
        Err(SyncError::Offline) => debug!("device is offline, skipping sync"),
        Err(SyncError::MissingToken) => {
            warn!("no auth token configured; set [sync] auth_token in the config file")
        }
        Err(e) => error!(error = %e, "sync pass failed"),
    }
}

async fn run_single_sync(config: &Config, store: Arc<OfflineStore>) -> Result<()> {
    let (monitor, manager) = sync_manager(config, store)?;
    let token = config.sync.auth_token.clone().unwrap_or_default();

    let status = monitor.check_now().await;
    if !status.is_online {
        anyhow::bail!("device is offline, cannot sync");
    }

    let report = manager.force_sync_all(&token).await?;
    println!(
        "Synced {} of {} items ({} failed, {} parked)",
        report.success_count, report.total_items, report.failure_count, report.skipped
    );
    for item in &report.errors {
        println!("  {}: {}", item.id, item.message);
    }
    Ok(())
}

async fn download_tiles(
    config: &Config,
    store: Arc<OfflineStore>,
    min_zoom: u8,
    max_zoom: u8,
) -> Result<()> {
    let tiles = tile_manager(config, store)?;
    let mut progress = tiles.subscribe_progress();

    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            info!(
                status = ?event.status,
                downloaded = event.downloaded,
                total = event.total,
                percent = event.progress,
                "tile download"
            );
            if matches!(
                event.status,
                DownloadPhase::Completed | DownloadPhase::Cancelled
            ) {
                break;
            }
        }
    });

    let summary = tiles.download_region(min_zoom, max_zoom).await?;
    let _ = printer.await;

    println!(
        "Downloaded {} of {} tiles for zoom {}-{}",
        summary.downloaded, summary.total, min_zoom, max_zoom
    );
    Ok(())
}

async fn print_cache_status(config: &Config, store: Arc<OfflineStore>) -> Result<()> {
    let tiles = tile_manager(config, store.clone())?;

    match tiles.manifest()? {
        Some(manifest) => {
            println!(
                "Offline map: {} tiles, zoom {}-{}, downloaded {}",
                manifest.total_tiles, manifest.min_zoom, manifest.max_zoom, manifest.downloaded_at
            );
        }
        None => println!("Offline map: not downloaded"),
    }
    println!(
        "Tile cache size: {}",
        geo::format_size(tiles.cache_size().await?)
    );
    println!(
        "Offline data size: {}",
        geo::format_size(store.offline_data_size()?)
    );
    match store.last_sync_timestamp()? {
        Some(ts) => println!("Last sync: {ts}"),
        None => println!("Last sync: never"),
    }
    Ok(())
}
