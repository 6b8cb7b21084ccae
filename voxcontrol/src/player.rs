//! Playback player: the per-conversation state machine.
//!
//! All user commands and all transport events funnel through here. The
//! player owns the session registry and drives the resolver and the
//! streaming transport; it never produces user-facing text, only structured
//! outcomes and [`Notification`]s.
//!
//! Queue advancement is the delicate part:
//!   - `advance_gate` guarantees at most one advance per conversation,
//!   - the `expected_current` guard collapses a manual skip racing the
//!     stream-ended event of the same item into a single advance,
//!   - the session epoch lets `stop` cancel an in-flight advance at its
//!     next await boundary,
//!   - the retry loop is bounded by the queue length, so a queue whose
//!     items all fail to resolve drains in one pass and stops.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voxcache::MediaCache;

use crate::errors::ControlError;
use crate::events::{NotificationBus, TransportEventBus};
use crate::model::{
    ChatId, LoopMode, MediaItem, Notification, PlayOutcome, PlaybackState, PlayerStats, QueueView,
    TransportEvent,
};
use crate::resolver::MediaResolver;
use crate::session::{Session, SessionRegistry};
use crate::transport::StreamTransport;

/// Admission limits applied by the player.
#[derive(Clone, Copy, Debug)]
pub struct PlayerSettings {
    /// Maximum number of pending items per conversation
    pub max_queue_size: usize,
    /// Longest admissible item, in seconds
    pub max_duration_secs: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_duration_secs: 3600,
        }
    }
}

/// The playback state machine over all conversations.
pub struct Player {
    registry: SessionRegistry,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn StreamTransport>,
    cache: Option<Arc<MediaCache>>,
    transport_events: TransportEventBus,
    notifications: NotificationBus,
    max_duration_secs: u64,
}

impl Player {
    /// Builds a player.
    ///
    /// `transport_events` must be the bus the transport adapter publishes
    /// its lifecycle events on; [`Player::spawn_event_pump`] subscribes to
    /// it at startup.
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        transport: Arc<dyn StreamTransport>,
        cache: Option<Arc<MediaCache>>,
        transport_events: TransportEventBus,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(settings.max_queue_size),
            resolver,
            transport,
            cache,
            transport_events,
            notifications: NotificationBus::new(),
            max_duration_secs: settings.max_duration_secs,
        }
    }

    /// Bus carrying player notifications (now-playing, skips, ...).
    pub fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    /// Resolves `query` and admits the result into the conversation's queue,
    /// starting playback when the session is idle.
    pub async fn play(
        &self,
        chat: ChatId,
        query: &str,
        requested_by: &str,
    ) -> Result<PlayOutcome, ControlError> {
        let descriptor = self.resolver.search(query).await?;
        if descriptor.duration_secs > self.max_duration_secs {
            return Err(ControlError::DurationExceeded {
                limit: self.max_duration_secs,
                actual: descriptor.duration_secs,
            });
        }

        let item = MediaItem::from_descriptor(&descriptor, requested_by);
        let session = self.registry.get_or_create(chat);

        let enqueued_at = {
            let mut queue = session.state.lock().await;
            if queue.state() == PlaybackState::Stopped {
                // Idle session: the item goes to the head and plays right away
                queue.enqueue_front(item.clone())?;
                queue.set_state(PlaybackState::Loading);
                queue.touch();
                None
            } else {
                let position = queue.enqueue(item.clone())?;
                queue.touch();
                Some(position)
            }
        };

        match enqueued_at {
            Some(position) => {
                info!(%chat, title = %item.title, position, "Enqueued");
                Ok(PlayOutcome::Enqueued { item, position })
            }
            None => {
                self.advance(&session, None, false).await;
                Ok(PlayOutcome::Started { item })
            }
        }
    }

    /// Pauses the active stream.
    pub async fn pause(&self, chat: ChatId) -> Result<(), ControlError> {
        let session = self.registry.get(chat).ok_or(ControlError::NothingPlaying)?;
        let mut queue = session.state.lock().await;
        if queue.state() != PlaybackState::Playing {
            return Err(ControlError::NothingPlaying);
        }
        self.transport.pause(chat).await?;
        queue.set_state(PlaybackState::Paused);
        queue.touch();
        Ok(())
    }

    /// Resumes a paused stream.
    pub async fn resume(&self, chat: ChatId) -> Result<(), ControlError> {
        let session = self.registry.get(chat).ok_or(ControlError::NotPaused)?;
        let mut queue = session.state.lock().await;
        if queue.state() != PlaybackState::Paused {
            return Err(ControlError::NotPaused);
        }
        self.transport.resume(chat).await?;
        queue.set_state(PlaybackState::Playing);
        queue.touch();
        Ok(())
    }

    /// Skips past the current item, returning it. Under `Single` loop the
    /// skip forces past the repeat.
    pub async fn skip(&self, chat: ChatId) -> Result<MediaItem, ControlError> {
        let session = self.registry.get(chat).ok_or(ControlError::NothingPlaying)?;
        let skipped = {
            let queue = session.state.lock().await;
            queue.current().cloned().ok_or(ControlError::NothingPlaying)?
        };
        self.advance(&session, Some(&skipped.external_id), true).await;
        Ok(skipped)
    }

    /// Stops playback, clears the queue and leaves the voice channel.
    /// Cancels any in-flight advance for this conversation.
    pub async fn stop(&self, chat: ChatId) -> Result<(), ControlError> {
        let Some(session) = self.registry.get(chat) else {
            return Ok(());
        };
        session.epoch.fetch_add(1, Ordering::SeqCst);
        {
            // Leave while still holding the lock: a play admitted right
            // after clear() must not have its fresh stream torn down by
            // this stale leave
            let mut queue = session.state.lock().await;
            let connected = queue.connected();
            queue.clear();
            if connected {
                self.transport.leave(chat).await;
            }
        }
        info!(%chat, "Stopped");
        Ok(())
    }

    /// Sets the loop mode, returning the mode now in effect.
    pub async fn set_loop(&self, chat: ChatId, mode: LoopMode) -> LoopMode {
        let session = self.registry.get_or_create(chat);
        let mut queue = session.state.lock().await;
        queue.set_loop_mode(mode);
        mode
    }

    /// Advances the loop mode along Off -> Single -> Queue -> Off.
    pub async fn cycle_loop(&self, chat: ChatId) -> LoopMode {
        let session = self.registry.get_or_create(chat);
        let mut queue = session.state.lock().await;
        let mode = queue.loop_mode().cycle();
        queue.set_loop_mode(mode);
        mode
    }

    /// Shuffles the pending queue, returning its length.
    pub async fn shuffle(&self, chat: ChatId) -> Result<usize, ControlError> {
        let session = self.registry.get(chat).ok_or(ControlError::QueueEmpty)?;
        let mut queue = session.state.lock().await;
        if queue.pending_len() == 0 {
            return Err(ControlError::QueueEmpty);
        }
        queue.shuffle();
        Ok(queue.pending_len())
    }

    /// Removes the pending item at `position` (1-based).
    pub async fn remove(&self, chat: ChatId, position: usize) -> Result<MediaItem, ControlError> {
        let session = self
            .registry
            .get(chat)
            .ok_or(ControlError::InvalidIndex(position))?;
        let mut queue = session.state.lock().await;
        queue.remove(position).ok_or(ControlError::InvalidIndex(position))
    }

    /// Read-only snapshot of one conversation's queue.
    pub async fn queue_snapshot(&self, chat: ChatId) -> Option<QueueView> {
        let session = self.registry.get(chat)?;
        let queue = session.state.lock().await;
        Some(queue.snapshot())
    }

    /// Aggregate counters over all sessions.
    pub async fn stats(&self) -> PlayerStats {
        let mut stats = PlayerStats {
            sessions: self.registry.len(),
            ..Default::default()
        };
        for session in self.registry.all() {
            let queue = session.state.lock().await;
            if queue.state() == PlaybackState::Playing {
                stats.playing += 1;
            }
            stats.queued_items += queue.pending_len();
        }
        stats
    }

    /// External ids referenced by any session's current or pending items.
    /// The cache janitor uses this as its reclamation exclusion set.
    pub async fn referenced_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for session in self.registry.all() {
            let queue = session.state.lock().await;
            if let Some(current) = queue.current() {
                ids.insert(current.external_id.clone());
            }
            for item in &queue.snapshot().pending {
                ids.insert(item.external_id.clone());
            }
        }
        ids
    }

    /// Force-stops sessions that have been stopped-but-connected and idle
    /// for longer than `timeout`. Returns the number of sessions reaped.
    /// Re-sweeping an already cleaned session is a no-op.
    pub async fn reap_idle_sessions(&self, timeout: Duration) -> usize {
        let mut reaped = 0;
        for session in self.registry.all() {
            let idle = {
                let mut queue = session.state.lock().await;
                let idle = queue.state() == PlaybackState::Stopped
                    && queue.connected()
                    && queue.last_activity().elapsed() > timeout;
                if idle {
                    queue.clear();
                    // Leave under the lock so a concurrent play cannot start
                    // a stream this stale leave would then tear down
                    self.transport.leave(session.chat).await;
                }
                idle
            };
            if idle {
                info!(chat = %session.chat, "Reaped idle session");
                self.notifications
                    .broadcast(Notification::InactivityLeave { chat: session.chat });
                reaped += 1;
            }
        }
        reaped
    }

    /// Dispatches one transport lifecycle event.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StreamEnded(chat) => {
                let Some(session) = self.registry.get(chat) else {
                    return;
                };
                let expected = {
                    let queue = session.state.lock().await;
                    queue.current().map(|item| item.external_id.clone())
                };
                // No current item: a stop or skip already handled this stream
                let Some(expected) = expected else { return };
                self.advance(&session, Some(&expected), false).await;
            }
            TransportEvent::Kicked(chat) | TransportEvent::ChannelClosed(chat) => {
                warn!(%chat, ?event, "Voice channel lost, resetting session");
                if let Err(e) = self.stop(chat).await {
                    warn!(%chat, error = %e, "Reset after channel loss failed");
                }
            }
        }
    }

    /// Spawns the task feeding transport events into the player.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let player = self.clone();
        let mut events = self.transport_events.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(?event, "Transport event");
                player.handle_transport_event(event).await;
            }
        })
    }

    /// Moves the conversation to its next playable item.
    ///
    /// `expected_current`: external id of the item this trigger believes is
    /// current; when it no longer is, another trigger already performed the
    /// transition and this call is a no-op. `force_past_single` drops the
    /// current item first so a manual skip escapes `Single` loop.
    async fn advance(
        &self,
        session: &Arc<Session>,
        expected_current: Option<&str>,
        force_past_single: bool,
    ) {
        let _gate = session.advance_gate.lock().await;
        let epoch = session.epoch.load(Ordering::SeqCst);
        let chat = session.chat;

        let mut attempts = {
            let mut queue = session.state.lock().await;
            if let Some(expected) = expected_current {
                match queue.current() {
                    Some(current) if current.external_id == expected => {}
                    _ => return,
                }
            }
            if force_past_single && queue.loop_mode() == LoopMode::Single {
                queue.set_current(None);
            }
            queue.set_state(PlaybackState::Loading);
            queue.pending_len() + 1
        };

        loop {
            if attempts > 0 {
                attempts -= 1;
                if session.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }

                let next = {
                    let mut queue = session.state.lock().await;
                    queue.dequeue_next()
                };
                if let Some(item) = next {
                    // Resolver I/O happens outside the session lock
                    let handle = match self.resolve(&item).await {
                        Ok(handle) => handle,
                        Err(e) => {
                            warn!(%chat, title = %item.title, error = %e, "Skipping unresolvable item");
                            self.drop_failed_current(session, &item).await;
                            self.notifications
                                .broadcast(Notification::ItemSkipped { chat, item });
                            continue;
                        }
                    };

                    if session.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }

                    // One transport call under the session lock, so current
                    // and the active stream change together
                    let mut queue = session.state.lock().await;
                    if session.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    match self.transport.start_or_change(chat, &handle).await {
                        Ok(()) => {
                            let mut playing = item;
                            playing.local_handle = Some(handle);
                            let next = queue.peek_head().cloned();
                            queue.set_current(Some(playing.clone()));
                            queue.set_state(PlaybackState::Playing);
                            queue.set_connected(true);
                            queue.touch();
                            drop(queue);
                            info!(%chat, title = %playing.title, "Now playing");
                            self.notifications.broadcast(Notification::NowPlaying {
                                chat,
                                item: playing,
                                next,
                            });
                            return;
                        }
                        Err(e) => {
                            drop(queue);
                            warn!(%chat, title = %item.title, error = %e, "Stream start failed, skipping");
                            self.drop_failed_current(session, &item).await;
                            self.notifications
                                .broadcast(Notification::ItemSkipped { chat, item });
                            continue;
                        }
                    }
                }
            }

            // Budget used up or the queue came back empty. Re-check the live
            // queue under the lock: an item admitted while a failing fetch
            // was in flight extends the pass instead of being thrown away.
            let connected = {
                let mut queue = session.state.lock().await;
                if session.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                if queue.pending_len() > 0 {
                    attempts = queue.pending_len();
                    None
                } else {
                    let connected = queue.connected();
                    queue.clear();
                    Some(connected)
                }
            };
            let Some(connected) = connected else { continue };

            if connected {
                self.transport.leave(chat).await;
            }
            info!(%chat, "Queue finished");
            self.notifications
                .broadcast(Notification::QueueFinished { chat });
            return;
        }
    }

    /// Under `Single` loop a failing current item would be retried forever;
    /// drop it so the advance loop falls through to the pending queue.
    async fn drop_failed_current(&self, session: &Arc<Session>, failed: &MediaItem) {
        let mut queue = session.state.lock().await;
        if queue.loop_mode() == LoopMode::Single
            && queue
                .current()
                .map(|c| c.external_id == failed.external_id)
                .unwrap_or(false)
        {
            queue.set_current(None);
        }
    }

    /// Produces a playable local file for `item`, cheapest source first:
    /// the item's own handle, then the media cache, then a resolver fetch.
    async fn resolve(&self, item: &MediaItem) -> Result<PathBuf, ControlError> {
        if let Some(handle) = &item.local_handle {
            if handle.exists() {
                return Ok(handle.clone());
            }
        }

        if let Some(cache) = &self.cache {
            let cache = cache.clone();
            let pk = item.external_id.clone();
            let hit = tokio::task::spawn_blocking(move || cache.lookup(&pk))
                .await
                .map_err(|e| ControlError::resolution(format!("Cache lookup task failed: {e}")))?;
            if let Some(path) = hit {
                return Ok(path);
            }
        }

        let handle = self.resolver.fetch(&item.descriptor()).await?;

        if let Some(cache) = &self.cache {
            let cache = cache.clone();
            let pk = item.external_id.clone();
            let url = item.source_url.clone();
            let path = handle.clone();
            match tokio::task::spawn_blocking(move || cache.insert_file(&pk, &url, &path)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(pk = %item.external_id, error = %e, "Caching download failed"),
                Err(e) => warn!(pk = %item.external_id, error = %e, "Cache insert task failed"),
            }
        }

        Ok(handle)
    }
}
