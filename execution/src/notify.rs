//! Publish side of the notification channel.

use gavel_types::{AuctionEvent, Topic};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Destination for state-change announcements. Publishing is
/// fire-and-forget: it never fails the operation that triggered it.
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: Topic, event: AuctionEvent);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub topic: Topic,
    pub event: AuctionEvent,
}

/// Fans events out to every subscriber over a `tokio` broadcast channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: Topic, event: AuctionEvent) {
        let name = event.name();
        match self.sender.send(Envelope { topic, event }) {
            Ok(receivers) => trace!(%topic, event = name, receivers, "published"),
            Err(_) => debug!(%topic, event = name, "no subscribers for event"),
        }
    }
}
