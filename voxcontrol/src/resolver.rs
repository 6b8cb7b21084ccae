//! Media resolver contract.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::ControlError;
use crate::model::MediaDescriptor;

/// Search and download service producing playable local files.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolves a free-text query or a direct URL to a media descriptor.
    async fn search(&self, query: &str) -> Result<MediaDescriptor, ControlError>;

    /// Materializes the descriptor as a local file.
    ///
    /// Must be idempotent per `external_id`: a repeated fetch for the same
    /// id reuses a previously downloaded file when it is still present.
    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<PathBuf, ControlError>;
}
