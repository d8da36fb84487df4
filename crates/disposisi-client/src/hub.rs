//! In-process broadcast of notification events to live contexts.

use disposisi_core::NotificationEvent;
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 64;

/// Cloneable broadcast handle. The channel closes when the last hub clone drops.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<NotificationEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of contexts that received the event.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        let kind = event.kind.clone();
        match self.tx.send(event) {
            Ok(n) => {
                debug!(kind = %kind, receivers = n, "event broadcast");
                n
            }
            Err(_) => {
                debug!(kind = %kind, "no live contexts for event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
