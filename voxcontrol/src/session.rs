//! Session registry.
//!
//! One `Session` per conversation, created lazily on first use and kept for
//! the lifetime of the process; a stop resets its contents rather than
//! removing the entry.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::model::ChatId;
use crate::queue::SessionQueue;

/// Playback state container of one conversation.
///
/// Locking discipline:
/// - `state` guards the queue data and is held across at most one transport
///   call, never across resolver I/O;
/// - `advance_gate` serializes whole queue-advance runs, so a manual skip
///   racing a stream-ended event cannot double-advance;
/// - `epoch` is bumped by `stop`, letting an in-flight advance notice it has
///   been cancelled after every await point.
pub struct Session {
    pub chat: ChatId,
    pub(crate) state: Mutex<SessionQueue>,
    pub(crate) advance_gate: Mutex<()>,
    pub(crate) epoch: AtomicU64,
}

impl Session {
    fn new(chat: ChatId, max_queue_size: usize) -> Self {
        Self {
            chat,
            state: Mutex::new(SessionQueue::new(max_queue_size)),
            advance_gate: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }
}

/// Map of all known sessions, keyed by conversation.
///
/// The outer lock is only ever held for map lookups, never across awaits.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ChatId, Arc<Session>>>,
    max_queue_size: usize,
}

impl SessionRegistry {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_queue_size,
        }
    }

    /// Returns the session for `chat`, creating it on first use.
    pub fn get_or_create(&self, chat: ChatId) -> Arc<Session> {
        if let Some(session) = self.sessions.read().unwrap().get(&chat) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(chat)
            .or_insert_with(|| Arc::new(Session::new(chat, self.max_queue_size)))
            .clone()
    }

    /// Returns the session for `chat` if one exists.
    pub fn get(&self, chat: ChatId) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(&chat).cloned()
    }

    /// Snapshot of all sessions, for sweeps and statistics.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
