//! Shared data model for the playback layer.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Identifier of one conversation (group chat or direct chat).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a resolver search yields before any download happens.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaDescriptor {
    pub title: String,
    /// Canonical URL of the media at its source
    pub source_url: String,
    pub duration_secs: u64,
    /// Stable identifier at the source, used as cache/dedup key
    pub external_id: String,
}

/// One queued or playing unit of audio.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaItem {
    pub title: String,
    pub source_url: String,
    pub duration_secs: u64,
    pub external_id: String,
    /// Display name of the user who requested the item
    pub requested_by: String,
    /// Local file produced by the resolver, filled on demand
    pub local_handle: Option<PathBuf>,
}

impl MediaItem {
    /// Builds an item from a resolver descriptor and its requester.
    pub fn from_descriptor(descriptor: &MediaDescriptor, requested_by: &str) -> Self {
        Self {
            title: descriptor.title.clone(),
            source_url: descriptor.source_url.clone(),
            duration_secs: descriptor.duration_secs,
            external_id: descriptor.external_id.clone(),
            requested_by: requested_by.to_string(),
            local_handle: None,
        }
    }

    pub fn descriptor(&self) -> MediaDescriptor {
        MediaDescriptor {
            title: self.title.clone(),
            source_url: self.source_url.clone(),
            duration_secs: self.duration_secs,
            external_id: self.external_id.clone(),
        }
    }
}

/// Replay policy applied when a stream finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LoopMode {
    Off,
    /// Replay the current item indefinitely
    Single,
    /// Re-append the finished item to the tail of the queue
    Queue,
}

impl LoopMode {
    /// Next mode in the Off -> Single -> Queue -> Off cycle.
    pub fn cycle(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Single,
            LoopMode::Single => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopMode::Off => "off",
            LoopMode::Single => "single",
            LoopMode::Queue => "queue",
        };
        write!(f, "{label}")
    }
}

/// Playback state of one conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Stopped,
    /// Between dequeue and a successful stream start
    Loading,
    Playing,
    Paused,
}

/// Outcome of a successful `play` request.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayOutcome {
    /// The session was idle; playback of this item is starting
    Started { item: MediaItem },
    /// Something is already playing; the item waits at `position` (1-based)
    Enqueued { item: MediaItem, position: usize },
}

/// Read-only snapshot of one session's queue, for display.
#[derive(Clone, Debug, Serialize)]
pub struct QueueView {
    pub current: Option<MediaItem>,
    pub pending: Vec<MediaItem>,
    pub loop_mode: LoopMode,
    pub state: PlaybackState,
}

/// Aggregate counters over all sessions.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PlayerStats {
    pub sessions: usize,
    pub playing: usize,
    pub queued_items: usize,
}

/// Asynchronous lifecycle events emitted by the streaming transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The active stream played to its end
    StreamEnded(ChatId),
    /// The bot was removed from the voice channel
    Kicked(ChatId),
    /// The voice channel itself went away
    ChannelClosed(ChatId),
}

impl TransportEvent {
    pub fn chat(&self) -> ChatId {
        match self {
            TransportEvent::StreamEnded(chat)
            | TransportEvent::Kicked(chat)
            | TransportEvent::ChannelClosed(chat) => *chat,
        }
    }
}

/// Notifications pushed to the command layer, which renders them.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    NowPlaying {
        chat: ChatId,
        item: MediaItem,
        /// Head of the pending queue, for a "coming up" preview
        next: Option<MediaItem>,
    },
    /// The item could not be resolved or streamed and was dropped
    ItemSkipped { chat: ChatId, item: MediaItem },
    /// The queue drained and the session left the voice channel
    QueueFinished { chat: ChatId },
    /// The inactivity reaper force-stopped an idle session
    InactivityLeave { chat: ChatId },
}
