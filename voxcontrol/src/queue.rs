//! Per-conversation queue state.
//!
//! `SessionQueue` is pure data: no I/O, no locking of its own. The owning
//! `Session` serializes access, and the player is the only writer of the
//! playback state. Loop policy lives entirely in `dequeue_next`.

use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::time::Instant;

use crate::errors::ControlError;
use crate::model::{LoopMode, MediaItem, PlaybackState, QueueView};

/// Queue, current item and playback mode of one conversation.
#[derive(Debug)]
pub struct SessionQueue {
    pending: VecDeque<MediaItem>,
    current: Option<MediaItem>,
    loop_mode: LoopMode,
    state: PlaybackState,
    last_activity: Instant,
    /// True while the transport holds a live voice-channel connection
    connected: bool,
    max_size: usize,
}

impl SessionQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::Off,
            state: PlaybackState::Stopped,
            last_activity: Instant::now(),
            connected: false,
            max_size,
        }
    }

    pub fn current(&self) -> Option<&MediaItem> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, item: Option<MediaItem>) {
        self.current = item;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Marks the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&mut self, by: std::time::Duration) {
        if let Some(then) = Instant::now().checked_sub(by) {
            self.last_activity = then;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// First pending item, the one an advance would play next under OFF.
    pub fn peek_head(&self) -> Option<&MediaItem> {
        self.pending.front()
    }

    /// Appends an item, returning its 1-based position in the pending queue.
    pub fn enqueue(&mut self, item: MediaItem) -> Result<usize, ControlError> {
        if self.pending.len() >= self.max_size {
            return Err(ControlError::QueueFull(self.max_size));
        }
        self.pending.push_back(item);
        Ok(self.pending.len())
    }

    /// Inserts an item at the head of the pending queue, to be played next.
    pub fn enqueue_front(&mut self, item: MediaItem) -> Result<(), ControlError> {
        if self.pending.len() >= self.max_size {
            return Err(ControlError::QueueFull(self.max_size));
        }
        self.pending.push_front(item);
        Ok(())
    }

    /// Picks the next item to play, applying the loop policy.
    ///
    /// - `Single`: the current item is returned again, untouched; falls back
    ///   to the queue head when there is no current item.
    /// - `Queue`: the current item moves to the tail, then the head is popped,
    ///   so a full pass over the queue restores its original order.
    /// - `Off`: the current item is dropped and the head is popped.
    pub fn dequeue_next(&mut self) -> Option<MediaItem> {
        match self.loop_mode {
            LoopMode::Single => {
                if let Some(current) = &self.current {
                    return Some(current.clone());
                }
                self.pending.pop_front()
            }
            LoopMode::Queue => {
                if let Some(current) = self.current.take() {
                    self.pending.push_back(current);
                }
                self.pending.pop_front()
            }
            LoopMode::Off => {
                self.current = None;
                self.pending.pop_front()
            }
        }
    }

    /// Resets the session to its defaults. The loop mode survives so that a
    /// replay preference set by an admin is not silently lost on stop.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.state = PlaybackState::Stopped;
        self.connected = false;
    }

    /// Randomizes the pending queue; the current item never moves.
    pub fn shuffle(&mut self) {
        self.pending
            .make_contiguous()
            .shuffle(&mut rand::rng());
    }

    /// Removes and returns the pending item at `position` (1-based).
    pub fn remove(&mut self, position: usize) -> Option<MediaItem> {
        if position == 0 || position > self.pending.len() {
            return None;
        }
        self.pending.remove(position - 1)
    }

    pub fn snapshot(&self) -> QueueView {
        QueueView {
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            state: self.state,
        }
    }
}
