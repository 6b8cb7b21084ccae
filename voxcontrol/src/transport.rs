//! Streaming transport contract.
//!
//! One fixed interface, implemented once per backend; version differences of
//! the underlying streaming stack are absorbed by the adapter, never probed
//! at call time.

use async_trait::async_trait;
use std::path::Path;

use crate::errors::ControlError;
use crate::model::ChatId;

/// Real-time voice-channel streaming service.
///
/// Implementations publish their lifecycle events (`StreamEnded`, `Kicked`,
/// `ChannelClosed`) on the [`TransportEventBus`](crate::TransportEventBus)
/// the player hands them at construction.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Joins the conversation's voice channel if not connected, otherwise
    /// replaces the actively streaming media with `handle`.
    async fn start_or_change(&self, chat: ChatId, handle: &Path) -> Result<(), ControlError>;

    /// Pauses the active stream. Idempotent when already paused.
    async fn pause(&self, chat: ChatId) -> Result<(), ControlError>;

    /// Resumes a paused stream. Idempotent when already playing.
    async fn resume(&self, chat: ChatId) -> Result<(), ControlError>;

    /// Leaves the voice channel. Best-effort: not-connected conditions are
    /// swallowed by the implementation.
    async fn leave(&self, chat: ChatId);
}
