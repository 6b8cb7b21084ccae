use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

use voxcontrol::{
    ChatId, ControlError, LoopMode, MediaDescriptor, MediaResolver, Notification, PlayOutcome,
    Player, PlayerSettings, PlaybackState, StreamTransport, TransportEvent, TransportEventBus,
};

const CHAT: ChatId = ChatId(-100);

/// Resolver scripted entirely from the query string: the query doubles as
/// the external id, durations and failures are looked up in tables.
#[derive(Default)]
struct ScriptedResolver {
    durations: HashMap<String, u64>,
    failing: HashSet<String>,
    /// Fetch for this id blocks until `release` is notified
    gated: Mutex<Option<String>>,
    release: Notify,
    fetches: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    fn with_duration(mut self, id: &str, secs: u64) -> Self {
        self.durations.insert(id.to_string(), secs);
        self
    }

    fn with_failure(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn gate(&self, id: &str) {
        *self.gated.lock().unwrap() = Some(id.to_string());
    }

    /// Releases the currently gated fetch and gates `id` instead
    fn move_gate(&self, id: &str) {
        *self.gated.lock().unwrap() = Some(id.to_string());
        self.release.notify_waiters();
    }

    fn open_gate(&self) {
        *self.gated.lock().unwrap() = None;
        self.release.notify_waiters();
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaResolver for ScriptedResolver {
    async fn search(&self, query: &str) -> Result<MediaDescriptor, ControlError> {
        Ok(MediaDescriptor {
            title: format!("Track {query}"),
            source_url: format!("https://tube.test/watch?v={query}"),
            duration_secs: self.durations.get(query).copied().unwrap_or(180),
            external_id: query.to_string(),
        })
    }

    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<PathBuf, ControlError> {
        loop {
            let released = self.release.notified();
            if self.gated.lock().unwrap().as_deref() != Some(descriptor.external_id.as_str()) {
                break;
            }
            released.await;
        }
        self.fetches.lock().unwrap().push(descriptor.external_id.clone());
        if self.failing.contains(&descriptor.external_id) {
            return Err(ControlError::resolution(format!(
                "no stream for {}",
                descriptor.external_id
            )));
        }
        Ok(PathBuf::from(format!("/nonexistent/{}.m4a", descriptor.external_id)))
    }
}

/// Transport recording every call; streams named in `failing` refuse to start.
#[derive(Default)]
struct RecordingTransport {
    failing: HashSet<String>,
    starts: Mutex<Vec<String>>,
    leaves: Mutex<Vec<ChatId>>,
    pauses: Mutex<usize>,
    resumes: Mutex<usize>,
}

impl RecordingTransport {
    fn with_failure(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    fn leaves(&self) -> Vec<ChatId> {
        self.leaves.lock().unwrap().clone()
    }
}

fn handle_id(handle: &Path) -> String {
    handle
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl StreamTransport for RecordingTransport {
    async fn start_or_change(&self, _chat: ChatId, handle: &Path) -> Result<(), ControlError> {
        let id = handle_id(handle);
        if self.failing.contains(&id) {
            return Err(ControlError::transport(format!("cannot stream {id}")));
        }
        self.starts.lock().unwrap().push(id);
        Ok(())
    }

    async fn pause(&self, _chat: ChatId) -> Result<(), ControlError> {
        *self.pauses.lock().unwrap() += 1;
        Ok(())
    }

    async fn resume(&self, _chat: ChatId) -> Result<(), ControlError> {
        *self.resumes.lock().unwrap() += 1;
        Ok(())
    }

    async fn leave(&self, chat: ChatId) {
        self.leaves.lock().unwrap().push(chat);
    }
}

struct Fixture {
    player: Arc<Player>,
    resolver: Arc<ScriptedResolver>,
    transport: Arc<RecordingTransport>,
    notifications: UnboundedReceiver<Notification>,
}

fn fixture(resolver: ScriptedResolver, transport: RecordingTransport) -> Fixture {
    fixture_with(resolver, transport, PlayerSettings::default())
}

fn fixture_with(
    resolver: ScriptedResolver,
    transport: RecordingTransport,
    settings: PlayerSettings,
) -> Fixture {
    let resolver = Arc::new(resolver);
    let transport = Arc::new(transport);
    let player = Arc::new(Player::new(
        resolver.clone(),
        transport.clone(),
        None,
        TransportEventBus::new(),
        settings,
    ));
    let notifications = player.notifications().subscribe();
    Fixture {
        player,
        resolver,
        transport,
        notifications,
    }
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

async fn stream_ended(player: &Player) {
    player
        .handle_transport_event(TransportEvent::StreamEnded(CHAT))
        .await;
}

#[tokio::test]
async fn test_play_runs_queue_to_completion() {
    let mut fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    // A starts immediately on an idle session, B waits in the queue
    match fx.player.play(CHAT, "a", "alice").await.unwrap() {
        PlayOutcome::Started { item } => assert_eq!(item.external_id, "a"),
        other => panic!("expected Started, got {other:?}"),
    }
    match fx.player.play(CHAT, "b", "bob").await.unwrap() {
        PlayOutcome::Enqueued { item, position } => {
            assert_eq!(item.external_id, "b");
            assert_eq!(position, 1);
        }
        other => panic!("expected Enqueued, got {other:?}"),
    }

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Playing);
    assert_eq!(view.current.as_ref().unwrap().external_id, "a");
    assert_eq!(view.pending.len(), 1);

    stream_ended(&fx.player).await;
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "b");
    assert!(view.pending.is_empty());

    stream_ended(&fx.player).await;
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Stopped);
    assert!(view.current.is_none());

    // One leave for the whole run
    assert_eq!(fx.transport.leaves(), vec![CHAT]);
    assert_eq!(fx.transport.starts(), vec!["a", "b"]);

    let notifications = drain(&mut fx.notifications);
    let finished = notifications
        .iter()
        .filter(|n| matches!(n, Notification::QueueFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn test_too_long_item_is_rejected_before_any_mutation() {
    let resolver = ScriptedResolver::default().with_duration("marathon", 4000);
    let fx = fixture(resolver, RecordingTransport::default());

    match fx.player.play(CHAT, "marathon", "alice").await {
        Err(ControlError::DurationExceeded { limit: 3600, actual: 4000 }) => {}
        other => panic!("expected DurationExceeded, got {other:?}"),
    }

    // Rejected at admission: no session state was created at all
    assert!(fx.player.queue_snapshot(CHAT).await.is_none());
    assert!(fx.transport.starts().is_empty());
}

#[tokio::test]
async fn test_full_queue_rejects_without_mutation() {
    let settings = PlayerSettings {
        max_queue_size: 2,
        ..Default::default()
    };
    let fx = fixture_with(
        ScriptedResolver::default(),
        RecordingTransport::default(),
        settings,
    );

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.play(CHAT, "c", "alice").await.unwrap();

    match fx.player.play(CHAT, "d", "alice").await {
        Err(ControlError::QueueFull(2)) => {}
        other => panic!("expected QueueFull, got {other:?}"),
    }

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    let pending: Vec<_> = view.pending.iter().map(|i| i.external_id.clone()).collect();
    assert_eq!(pending, vec!["b", "c"]);
}

#[tokio::test]
async fn test_failing_item_is_skipped_and_next_plays() {
    let resolver = ScriptedResolver::default().with_failure("bad");
    let mut fx = fixture(resolver, RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "bad", "bob").await.unwrap();
    fx.player.play(CHAT, "c", "carol").await.unwrap();
    drain(&mut fx.notifications);

    stream_ended(&fx.player).await;

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "c");

    let notifications = drain(&mut fx.notifications);
    match &notifications[0] {
        Notification::ItemSkipped { item, .. } => assert_eq!(item.external_id, "bad"),
        other => panic!("expected ItemSkipped first, got {other:?}"),
    }
    match &notifications[1] {
        Notification::NowPlaying { item, .. } => assert_eq!(item.external_id, "c"),
        other => panic!("expected NowPlaying second, got {other:?}"),
    }
    // The failing item never reached the transport
    assert_eq!(fx.transport.starts(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_all_failing_queue_drains_and_stops() {
    let resolver = ScriptedResolver::default()
        .with_failure("bad1")
        .with_failure("bad2");
    let mut fx = fixture(resolver, RecordingTransport::default());

    fx.player.play(CHAT, "bad1", "alice").await.unwrap();
    fx.player.play(CHAT, "bad2", "alice").await.unwrap();

    // Each play found a stopped session, ran one bounded advance, skipped
    // the failing item and stopped again instead of retrying forever
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Stopped);
    assert!(view.current.is_none());
    assert!(view.pending.is_empty());

    assert!(fx.transport.starts().is_empty());
    // Never connected, so nothing to leave
    assert!(fx.transport.leaves().is_empty());

    let notifications = drain(&mut fx.notifications);
    let skipped = notifications
        .iter()
        .filter(|n| matches!(n, Notification::ItemSkipped { .. }))
        .count();
    assert_eq!(skipped, 2);
}

#[tokio::test]
async fn test_enqueue_during_failing_advance_is_not_lost() {
    let resolver = ScriptedResolver::default()
        .with_failure("bad1")
        .with_failure("bad2");
    let mut fx = fixture(resolver, RecordingTransport::default());

    fx.player.play(CHAT, "ok", "alice").await.unwrap();
    fx.player.play(CHAT, "bad1", "alice").await.unwrap();
    drain(&mut fx.notifications);

    // Hold the advance inside bad1's fetch, then keep admitting items while
    // it is still churning through failures
    fx.resolver.gate("bad1");
    let player = fx.player.clone();
    let advance = tokio::spawn(async move {
        player
            .handle_transport_event(TransportEvent::StreamEnded(CHAT))
            .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    match fx.player.play(CHAT, "bad2", "bob").await.unwrap() {
        PlayOutcome::Enqueued { position, .. } => assert_eq!(position, 1),
        other => panic!("expected Enqueued, got {other:?}"),
    }
    fx.resolver.move_gate("bad2");
    tokio::time::sleep(Duration::from_millis(20)).await;

    match fx.player.play(CHAT, "c", "carol").await.unwrap() {
        PlayOutcome::Enqueued { position, .. } => assert_eq!(position, 1),
        other => panic!("expected Enqueued, got {other:?}"),
    }
    fx.resolver.open_gate();
    advance.await.unwrap();

    // The item admitted mid-advance plays instead of being swept away
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Playing);
    assert_eq!(view.current.as_ref().unwrap().external_id, "c");
    assert!(view.pending.is_empty());
    assert_eq!(fx.resolver.fetches(), vec!["ok", "bad1", "bad2", "c"]);

    let notifications = drain(&mut fx.notifications);
    assert!(matches!(
        &notifications[0],
        Notification::ItemSkipped { item, .. } if item.external_id == "bad1"
    ));
    assert!(matches!(
        &notifications[1],
        Notification::ItemSkipped { item, .. } if item.external_id == "bad2"
    ));
    assert!(matches!(
        &notifications[2],
        Notification::NowPlaying { item, .. } if item.external_id == "c"
    ));
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, Notification::QueueFinished { .. })));
}

#[tokio::test]
async fn test_skip_racing_stream_ended_advances_once() {
    let resolver = ScriptedResolver::default();
    let mut fx = fixture(resolver, RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.play(CHAT, "c", "alice").await.unwrap();
    drain(&mut fx.notifications);

    // Hold the advance triggered by skip inside the resolver, then let the
    // transport's stream-ended event arrive for the same item
    fx.resolver.gate("b");
    let player = fx.player.clone();
    let skip = tokio::spawn(async move { player.skip(CHAT).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    stream_ended(&fx.player).await;
    fx.resolver.open_gate();

    let skipped = skip.await.unwrap().unwrap();
    assert_eq!(skipped.external_id, "a");

    // Exactly one advance happened: b is current and c was not skipped over
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "b");
    let pending: Vec<_> = view.pending.iter().map(|i| i.external_id.clone()).collect();
    assert_eq!(pending, vec!["c"]);
    assert_eq!(fx.resolver.fetches(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_single_loop_replays_current() {
    let mut fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.set_loop(CHAT, LoopMode::Single).await;
    drain(&mut fx.notifications);

    stream_ended(&fx.player).await;
    stream_ended(&fx.player).await;

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "a");
    let pending: Vec<_> = view.pending.iter().map(|i| i.external_id.clone()).collect();
    assert_eq!(pending, vec!["b"]);
    assert_eq!(fx.transport.starts(), vec!["a", "a", "a"]);
}

#[tokio::test]
async fn test_skip_escapes_single_loop() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.set_loop(CHAT, LoopMode::Single).await;

    let skipped = fx.player.skip(CHAT).await.unwrap();
    assert_eq!(skipped.external_id, "a");

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "b");
}

#[tokio::test]
async fn test_queue_loop_rotates_through_items() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.set_loop(CHAT, LoopMode::Queue).await;
    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.play(CHAT, "c", "alice").await.unwrap();

    // One full pass over the three items restores the original lineup
    for expected in ["b", "c", "a"] {
        stream_ended(&fx.player).await;
        let view = fx.player.queue_snapshot(CHAT).await.unwrap();
        assert_eq!(view.current.as_ref().unwrap().external_id, expected);
    }

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    let pending: Vec<_> = view.pending.iter().map(|i| i.external_id.clone()).collect();
    assert_eq!(pending, vec!["b", "c"]);
}

#[tokio::test]
async fn test_pause_and_resume_transitions() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    // Nothing playing yet
    assert!(matches!(
        fx.player.pause(CHAT).await,
        Err(ControlError::NothingPlaying)
    ));

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    assert!(matches!(
        fx.player.resume(CHAT).await,
        Err(ControlError::NotPaused)
    ));

    fx.player.pause(CHAT).await.unwrap();
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Paused);

    // Pausing a paused session is rejected, not forwarded to the transport
    assert!(matches!(
        fx.player.pause(CHAT).await,
        Err(ControlError::NothingPlaying)
    ));

    fx.player.resume(CHAT).await.unwrap();
    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Playing);
}

#[tokio::test]
async fn test_stop_clears_session_and_leaves() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.stop(CHAT).await.unwrap();

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Stopped);
    assert!(view.current.is_none());
    assert!(view.pending.is_empty());
    assert_eq!(fx.transport.leaves(), vec![CHAT]);

    assert!(matches!(
        fx.player.skip(CHAT).await,
        Err(ControlError::NothingPlaying)
    ));

    // Stopping again is harmless and does not leave twice
    fx.player.stop(CHAT).await.unwrap();
    assert_eq!(fx.transport.leaves(), vec![CHAT]);
}

#[tokio::test]
async fn test_stream_start_failure_skips_to_next() {
    let transport = RecordingTransport::default().with_failure("cursed");
    let mut fx = fixture(ScriptedResolver::default(), transport);

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "cursed", "bob").await.unwrap();
    fx.player.play(CHAT, "c", "carol").await.unwrap();
    drain(&mut fx.notifications);

    stream_ended(&fx.player).await;

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.current.as_ref().unwrap().external_id, "c");
    assert_eq!(fx.transport.starts(), vec!["a", "c"]);

    let notifications = drain(&mut fx.notifications);
    assert!(matches!(
        &notifications[0],
        Notification::ItemSkipped { item, .. } if item.external_id == "cursed"
    ));
}

#[tokio::test]
async fn test_kicked_resets_the_session() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();

    fx.player
        .handle_transport_event(TransportEvent::Kicked(CHAT))
        .await;

    let view = fx.player.queue_snapshot(CHAT).await.unwrap();
    assert_eq!(view.state, PlaybackState::Stopped);
    assert!(view.current.is_none());
    assert!(view.pending.is_empty());
}

#[tokio::test]
async fn test_remove_and_shuffle_guards() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    assert!(matches!(
        fx.player.shuffle(CHAT).await,
        Err(ControlError::QueueEmpty)
    ));

    fx.player.play(CHAT, "a", "alice").await.unwrap();
    fx.player.play(CHAT, "b", "alice").await.unwrap();
    fx.player.play(CHAT, "c", "alice").await.unwrap();

    let removed = fx.player.remove(CHAT, 2).await.unwrap();
    assert_eq!(removed.external_id, "c");
    assert!(matches!(
        fx.player.remove(CHAT, 5).await,
        Err(ControlError::InvalidIndex(5))
    ));

    assert_eq!(fx.player.shuffle(CHAT).await.unwrap(), 1);
}

#[tokio::test]
async fn test_stats_aggregates_sessions() {
    let fx = fixture(ScriptedResolver::default(), RecordingTransport::default());

    fx.player.play(ChatId(1), "a", "alice").await.unwrap();
    fx.player.play(ChatId(1), "b", "alice").await.unwrap();
    fx.player.play(ChatId(2), "c", "bob").await.unwrap();
    fx.player.stop(ChatId(2)).await.unwrap();

    let stats = fx.player.stats().await;
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.playing, 1);
    assert_eq!(stats.queued_items, 1);
}
