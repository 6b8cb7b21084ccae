//! # VoxMusic Media Cache
//!
//! On-disk cache for resolved media files with SQLite-backed metadata.
//!
//! The cache deliberately knows nothing about playback: callers hand it an
//! exclusion set of keys that must survive reclamation, and the janitor task
//! in the player wires the two together.

mod cache;
mod db;

pub use cache::MediaCache;
pub use db::{CacheEntry, Db};
