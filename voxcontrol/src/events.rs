use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::model::{Notification, TransportEvent};

/// Routes transport lifecycle events into the player.
///
/// Transport adapters broadcast from their watcher tasks; the player's event
/// pump subscribes once at startup. Dead receivers are dropped on send.
#[derive(Clone, Default)]
pub struct TransportEventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<TransportEvent>>>>,
}

impl TransportEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TransportEvent> {
        let (tx, rx) = unbounded_channel::<TransportEvent>();
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, event: TransportEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Pushes player notifications out to the command/UI layer.
#[derive(Clone, Default)]
pub struct NotificationBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<Notification>>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Notification> {
        let (tx, rx) = unbounded_channel::<Notification>();
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }
}
