//! Background maintenance tasks.
//!
//! Two periodic sweeps run next to the player:
//!   - the inactivity reaper force-stops sessions that sat idle in a voice
//!     channel past the auto-leave timeout,
//!   - the cache janitor reclaims downloaded media files, excluding every
//!     file still referenced by a session.
//!
//! Both are spawned once at startup and run for the life of the process.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use voxcache::MediaCache;

use crate::player::Player;

/// Spawns the periodic sweep force-stopping idle sessions.
pub fn spawn_inactivity_reaper(
    player: Arc<Player>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = player.reap_idle_sessions(timeout).await;
            if reaped > 0 {
                debug!(reaped, "Inactivity sweep");
            }
        }
    })
}

/// Spawns the periodic sweep reclaiming stale cached media.
///
/// Cache I/O is synchronous (filesystem + SQLite) and runs on the blocking
/// pool; the exclusion set is snapshotted from the player first.
pub fn spawn_cache_janitor(
    player: Arc<Player>,
    cache: Arc<MediaCache>,
    interval: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let in_use = player.referenced_ids().await;
            let cache = cache.clone();
            let sweep = tokio::task::spawn_blocking(move || sweep_cache(&cache, ttl, &in_use));
            match sweep.await {
                Ok(Ok(removed)) => {
                    if removed > 0 {
                        debug!(removed, "Cache sweep");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Cache sweep failed"),
                Err(e) => warn!(error = %e, "Cache sweep task failed"),
            }
        }
    })
}

fn sweep_cache(
    cache: &MediaCache,
    ttl: Duration,
    in_use: &HashSet<String>,
) -> anyhow::Result<usize> {
    let ttl = chrono::Duration::from_std(ttl)?;
    let purged = cache.purge_stale(ttl, in_use)?;
    let evicted = cache.enforce_limit(in_use)?;
    Ok(purged + evicted)
}
