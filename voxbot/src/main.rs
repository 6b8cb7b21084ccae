//! VoxMusic: queue-based music player with a console front end.

mod console;
mod transport;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxcache::MediaCache;
use voxcontrol::sweeps::{spawn_cache_janitor, spawn_inactivity_reaper};
use voxcontrol::{Player, PlayerSettings, TransportEventBus};
use voxtube::YtDlpResolver;

use crate::transport::FfplayTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ========== Phase 1: configuration and external tools ==========

    let config = voxconfig::get_config();
    let cache_dir = config.get_cache_dir()?;

    let yt_dlp_bin = config.get_yt_dlp_bin()?;
    let yt_dlp_version = voxtube::check_available(&yt_dlp_bin)
        .await
        .context("Media resolver unavailable")?;
    info!("🎬 yt-dlp {yt_dlp_version}");

    // A broken transport at startup is the one fatal error
    let ffplay_bin = config.get_ffplay_bin()?;
    FfplayTransport::check_available(&ffplay_bin)
        .await
        .context("Streaming transport unavailable")?;
    info!("🔊 {ffplay_bin} ready");

    // ========== Phase 2: player wiring ==========

    let cache = Arc::new(
        MediaCache::new(&cache_dir, config.get_cache_limit()?)
            .context("Cannot open the media cache")?,
    );
    info!("💾 Media cache at {}", cache_dir.display());

    let transport_events = TransportEventBus::new();
    let transport = Arc::new(FfplayTransport::new(&ffplay_bin, transport_events.clone()));
    let resolver = Arc::new(YtDlpResolver::new(&yt_dlp_bin, &cache_dir));

    let settings = PlayerSettings {
        max_queue_size: config.get_max_queue_size()?,
        max_duration_secs: config.get_max_duration_secs()? as u64,
    };
    let player = Arc::new(Player::new(
        resolver,
        transport,
        Some(cache.clone()),
        transport_events,
        settings,
    ));
    player.spawn_event_pump();
    console::spawn_notification_printer(&player);

    // ========== Phase 3: background sweeps ==========

    spawn_inactivity_reaper(
        player.clone(),
        Duration::from_secs(config.get_reaper_interval_secs()? as u64),
        Duration::from_secs(config.get_auto_leave_secs()? as u64),
    );
    spawn_cache_janitor(
        player.clone(),
        cache,
        Duration::from_secs(config.get_janitor_interval_secs()? as u64),
        Duration::from_secs(config.get_cache_ttl_secs()? as u64),
    );

    info!("✅ VoxMusic is ready");
    console::run(player).await?;
    Ok(())
}
