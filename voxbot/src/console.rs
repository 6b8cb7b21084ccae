//! Interactive console driving the player.
//!
//! This is the command layer: it parses one-line commands, calls the player
//! and renders the structured outcomes and notifications as text. All
//! commands act on a single local conversation.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use voxcontrol::{
    ChatId, ControlError, LoopMode, Notification, PlayOutcome, Player, QueueView,
};

const LOCAL_CHAT: ChatId = ChatId(0);

const HELP: &str = "\
Commands:
  play <query or URL>   search and play / enqueue
  pause | resume        hold and release the stream
  skip                  jump to the next item
  stop                  stop and clear the queue
  queue                 show current item and pending queue
  loop [off|single|queue]  set or cycle the loop mode
  shuffle               shuffle the pending queue
  remove <position>     drop one pending item
  stats                 player counters
  quit                  exit";

/// Prints player notifications as they arrive. Spawned once at startup.
pub fn spawn_notification_printer(player: &Player) -> tokio::task::JoinHandle<()> {
    let mut notifications = player.notifications().subscribe();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                Notification::NowPlaying { item, next, .. } => {
                    println!("▶ Now playing: {} ({}s)", item.title, item.duration_secs);
                    if let Some(next) = next {
                        println!("  up next: {}", next.title);
                    }
                }
                Notification::ItemSkipped { item, .. } => {
                    println!("⏭ Skipped (unplayable): {}", item.title);
                }
                Notification::QueueFinished { .. } => {
                    println!("⏹ Queue finished");
                }
                Notification::InactivityLeave { .. } => {
                    println!("💤 Left after inactivity");
                }
            }
        }
    })
}

fn render_queue(view: Option<QueueView>) {
    let Some(view) = view else {
        println!("(no session)");
        return;
    };
    match &view.current {
        Some(item) => println!("current [{:?}]: {}", view.state, item.title),
        None => println!("current: none"),
    }
    if view.pending.is_empty() {
        println!("queue: empty (loop {})", view.loop_mode);
    } else {
        println!("queue ({} items, loop {}):", view.pending.len(), view.loop_mode);
        for (i, item) in view.pending.iter().enumerate() {
            println!("  {}. {} — {}", i + 1, item.title, item.requested_by);
        }
    }
}

fn render_error(error: ControlError) {
    println!("✗ {error}");
}

async fn dispatch(player: &Player, line: &str) {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "play" | "p" => {
            if rest.is_empty() {
                println!("usage: play <query or URL>");
                return;
            }
            match player.play(LOCAL_CHAT, rest, "console").await {
                Ok(PlayOutcome::Started { item }) => println!("▶ Starting: {}", item.title),
                Ok(PlayOutcome::Enqueued { item, position }) => {
                    println!("＋ Queued at {}: {}", position, item.title)
                }
                Err(e) => render_error(e),
            }
        }
        "pause" => match player.pause(LOCAL_CHAT).await {
            Ok(()) => println!("⏸ Paused"),
            Err(e) => render_error(e),
        },
        "resume" => match player.resume(LOCAL_CHAT).await {
            Ok(()) => println!("▶ Resumed"),
            Err(e) => render_error(e),
        },
        "skip" | "next" => match player.skip(LOCAL_CHAT).await {
            Ok(item) => println!("⏭ Skipped: {}", item.title),
            Err(e) => render_error(e),
        },
        "stop" => match player.stop(LOCAL_CHAT).await {
            Ok(()) => println!("⏹ Stopped"),
            Err(e) => render_error(e),
        },
        "queue" | "q" => render_queue(player.queue_snapshot(LOCAL_CHAT).await),
        "loop" => {
            let mode = match rest {
                "" => Some(player.cycle_loop(LOCAL_CHAT).await),
                "off" => Some(player.set_loop(LOCAL_CHAT, LoopMode::Off).await),
                "single" => Some(player.set_loop(LOCAL_CHAT, LoopMode::Single).await),
                "queue" => Some(player.set_loop(LOCAL_CHAT, LoopMode::Queue).await),
                _ => {
                    println!("usage: loop [off|single|queue]");
                    None
                }
            };
            if let Some(mode) = mode {
                println!("🔁 Loop mode: {mode}");
            }
        }
        "shuffle" => match player.shuffle(LOCAL_CHAT).await {
            Ok(len) => println!("🔀 Shuffled {len} items"),
            Err(e) => render_error(e),
        },
        "remove" | "rm" => match rest.parse::<usize>() {
            Ok(position) => match player.remove(LOCAL_CHAT, position).await {
                Ok(item) => println!("－ Removed: {}", item.title),
                Err(e) => render_error(e),
            },
            Err(_) => println!("usage: remove <position>"),
        },
        "stats" => {
            let stats = player.stats().await;
            println!(
                "sessions: {}, playing: {}, queued items: {}",
                stats.sessions, stats.playing, stats.queued_items
            );
        }
        "help" | "?" => println!("{HELP}"),
        "" => {}
        other => println!("unknown command '{other}' (try 'help')"),
    }
}

/// Reads commands from stdin until EOF, `quit` or ctrl-c.
pub async fn run(player: Arc<Player>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    println!("{HELP}");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }
        dispatch(&player, line).await;
    }

    // Tear the local session down before exiting
    player.stop(LOCAL_CHAT).await?;
    Ok(())
}
