//! Local streaming transport backed by ffplay.
//!
//! One ffplay child process per conversation plays the resolved file out
//! loud. A watcher task waits on each child and publishes `StreamEnded`
//! when it terminates on its own; deliberate replacements and leaves bump
//! the stream generation first, so their exits stay silent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, warn};

use voxcontrol::{ChatId, ControlError, StreamTransport, TransportEvent, TransportEventBus};

#[derive(Clone, Copy)]
struct ActiveStream {
    pid: u32,
    generation: u64,
}

pub struct FfplayTransport {
    bin: String,
    events: TransportEventBus,
    streams: Arc<Mutex<HashMap<ChatId, ActiveStream>>>,
    generations: AtomicU64,
}

impl FfplayTransport {
    pub fn new(bin: impl Into<String>, events: TransportEventBus) -> Self {
        Self {
            bin: bin.into(),
            events,
            streams: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Startup probe. Failure here is the one fatal error of the process.
    pub async fn check_available(bin: &str) -> Result<(), ControlError> {
        let status = Command::new(bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ControlError::transport(format!("{bin} is not available: {e}")))?;
        if !status.success() {
            return Err(ControlError::transport(format!(
                "{bin} -version exited with {status}"
            )));
        }
        Ok(())
    }

    async fn signal(pid: u32, signal: &str) -> Result<(), ControlError> {
        let status = Command::new("kill")
            .arg(format!("-{signal}"))
            .arg(pid.to_string())
            .status()
            .await
            .map_err(|e| ControlError::transport(format!("Cannot signal player: {e}")))?;
        if !status.success() {
            return Err(ControlError::transport(format!(
                "Signal {signal} to pid {pid} failed"
            )));
        }
        Ok(())
    }

    fn active_pid(&self, chat: ChatId) -> Result<u32, ControlError> {
        self.streams
            .lock()
            .unwrap()
            .get(&chat)
            .map(|stream| stream.pid)
            .ok_or_else(|| ControlError::transport(format!("No active stream for chat {chat}")))
    }
}

#[async_trait]
impl StreamTransport for FfplayTransport {
    async fn start_or_change(&self, chat: ChatId, handle: &Path) -> Result<(), ControlError> {
        let mut child = Command::new(&self.bin)
            .args(["-nodisp", "-autoexit", "-loglevel", "quiet"])
            .arg(handle)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ControlError::transport(format!("Cannot start {}: {e}", self.bin)))?;
        let pid = child
            .id()
            .ok_or_else(|| ControlError::transport("Player exited before it started"))?;

        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut streams = self.streams.lock().unwrap();
            streams.insert(chat, ActiveStream { pid, generation })
        };
        if let Some(previous) = previous {
            // Its watcher sees a newer generation and stays silent
            if let Err(e) = Self::signal(previous.pid, "KILL").await {
                debug!(%chat, error = %e, "Previous stream already gone");
            }
        }
        debug!(%chat, pid, path = %handle.display(), "Stream started");

        let streams = self.streams.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            let ended_naturally = {
                let mut streams = streams.lock().unwrap();
                match streams.get(&chat) {
                    Some(active) if active.generation == generation => {
                        streams.remove(&chat);
                        true
                    }
                    _ => false,
                }
            };
            if ended_naturally {
                events.broadcast(TransportEvent::StreamEnded(chat));
            }
        });

        Ok(())
    }

    async fn pause(&self, chat: ChatId) -> Result<(), ControlError> {
        let pid = self.active_pid(chat)?;
        Self::signal(pid, "STOP").await
    }

    async fn resume(&self, chat: ChatId) -> Result<(), ControlError> {
        let pid = self.active_pid(chat)?;
        Self::signal(pid, "CONT").await
    }

    async fn leave(&self, chat: ChatId) {
        let removed = self.streams.lock().unwrap().remove(&chat);
        if let Some(stream) = removed {
            if let Err(e) = Self::signal(stream.pid, "KILL").await {
                warn!(%chat, error = %e, "Stream cleanup failed");
            }
        }
    }
}
