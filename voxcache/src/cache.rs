//! On-disk media cache.
//!
//! Stores resolved media files under a single directory and tracks them in a
//! small SQLite database. Two reclamation policies run over it:
//!
//! - a TTL purge (`purge_stale`) removing files unused for longer than a
//!   configured duration,
//! - an LRU size cap (`enforce_limit`) bounding the number of cached files.
//!
//! Both policies take an *in-use* exclusion set so that files currently being
//! streamed or queued are never reclaimed. All operations are synchronous;
//! async callers wrap them in `spawn_blocking`.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::{CacheEntry, Db};

const DB_FILE: &str = "cache.db";

/// File cache with SQLite-backed metadata.
#[derive(Debug)]
pub struct MediaCache {
    dir: PathBuf,
    limit: usize,
    db: Db,
}

impl MediaCache {
    /// Opens the cache rooted at `dir`, creating the directory and the
    /// metadata database as needed. `limit` caps the number of cached files.
    pub fn new(dir: impl Into<PathBuf>, limit: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Creating cache directory {}", dir.display()))?;
        let db = Db::init(&dir.join(DB_FILE))
            .with_context(|| format!("Opening cache database in {}", dir.display()))?;
        Ok(Self { dir, limit, db })
    }

    /// Directory holding the cached files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Looks up a cached file by key, bumping its usage statistics on a hit.
    ///
    /// A database row whose file has disappeared from disk is treated as a
    /// miss and its row is dropped.
    pub fn lookup(&self, pk: &str) -> Option<PathBuf> {
        let entry = self.db.get(pk).ok()?;
        let path = PathBuf::from(&entry.path);

        if !path.exists() {
            warn!(pk, path = %path.display(), "Cached file vanished, dropping entry");
            let _ = self.db.delete(pk);
            return None;
        }

        if let Err(e) = self.db.update_hit(pk) {
            warn!(pk, error = %e, "Failed to record cache hit");
        }
        debug!(pk, path = %path.display(), "Cache hit");
        Some(path)
    }

    /// Records a freshly downloaded file under `pk`.
    ///
    /// The file is expected to already live inside the cache directory (the
    /// resolver downloads straight into it). Returns the recorded path.
    pub fn insert_file(&self, pk: &str, source_url: &str, path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            anyhow::bail!("Cannot cache missing file {}", path.display());
        }
        self.db
            .add(pk, source_url, &path.to_string_lossy())
            .with_context(|| format!("Recording cache entry {pk}"))?;
        debug!(pk, path = %path.display(), "Cached media file");
        Ok(path.to_path_buf())
    }

    /// Number of tracked entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.db.count()?)
    }

    /// True when the cache tracks no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes entries unused for longer than `ttl`, skipping keys present
    /// in `in_use`. Returns the number of files removed.
    pub fn purge_stale(&self, ttl: Duration, in_use: &HashSet<String>) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let stale = self.db.older_than(cutoff)?;

        let mut removed = 0;
        for entry in stale {
            if in_use.contains(&entry.pk) {
                continue;
            }
            self.evict(&entry)?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "Purged stale cache entries");
        }
        Ok(removed)
    }

    /// Evicts least-recently-used entries until the cache is back under its
    /// size limit, skipping keys present in `in_use`. Returns the number of
    /// files removed.
    pub fn enforce_limit(&self, in_use: &HashSet<String>) -> Result<usize> {
        let count = self.db.count()?;
        if count <= self.limit {
            return Ok(0);
        }

        let excess = count - self.limit;
        // Over-fetch so in-use entries at the LRU end do not stall eviction
        let candidates = self.db.get_oldest(excess + in_use.len())?;

        let mut removed = 0;
        for entry in candidates {
            if removed == excess {
                break;
            }
            if in_use.contains(&entry.pk) {
                continue;
            }
            self.evict(&entry)?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, limit = self.limit, "Evicted cache entries over limit");
        }
        Ok(removed)
    }

    fn evict(&self, entry: &CacheEntry) -> Result<()> {
        let path = Path::new(&entry.path);
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Removing cached file {}", path.display()))?;
        }
        self.db.delete(&entry.pk)?;
        debug!(pk = %entry.pk, "Evicted cache entry");
        Ok(())
    }
}
