use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Resolution error: {0}")]
    Resolution(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Queue is full ({0} items)")]
    QueueFull(usize),
    #[error("Duration {actual}s exceeds the {limit}s limit")]
    DurationExceeded { limit: u64, actual: u64 },
    #[error("Operation '{0}' requires admin rights")]
    NotAllowed(String),
    #[error("Nothing is playing")]
    NothingPlaying,
    #[error("Playback is not paused")]
    NotPaused,
    #[error("Queue is empty")]
    QueueEmpty,
    #[error("No queue entry at position {0}")]
    InvalidIndex(usize),
}

impl ControlError {
    pub fn resolution(message: impl Into<String>) -> Self {
        ControlError::Resolution(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ControlError::Transport(message.into())
    }
}
