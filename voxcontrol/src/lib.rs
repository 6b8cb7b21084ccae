//! # VoxMusic Playback Control
//!
//! Per-conversation playback sessions for a voice-chat music bot: queue
//! management, the playback state machine, transport event routing, and the
//! background sweeps keeping sessions and the media cache tidy.
//!
//! The two external collaborators are abstracted behind traits:
//! [`MediaResolver`] (search + download) and [`StreamTransport`] (voice
//! channel streaming). Everything user-visible leaves this crate as a
//! structured outcome or a [`Notification`]; no user-facing text is produced
//! here.

mod events;
mod player;
mod queue;
mod session;

pub mod errors;
pub mod model;
pub mod resolver;
pub mod sweeps;
pub mod transport;

pub use errors::ControlError;
pub use events::{NotificationBus, TransportEventBus};
pub use model::{
    ChatId, LoopMode, MediaDescriptor, MediaItem, Notification, PlayOutcome, PlaybackState,
    PlayerStats, QueueView, TransportEvent,
};
pub use player::{Player, PlayerSettings};
pub use queue::SessionQueue;
pub use resolver::MediaResolver;
pub use session::{Session, SessionRegistry};
pub use transport::StreamTransport;
