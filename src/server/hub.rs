//! Fan-out of collection changes to connected subscribers.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Channel capacity per collection. Lagging receivers only need to know
/// that something changed, so missed notifications collapse into one.
const CHANNEL_CAPACITY: usize = 16;

/// Tracks subscribers per collection.
#[derive(Default)]
pub struct SyncHub {
    channels: RwLock<HashMap<String, broadcast::Sender<()>>>,
}

impl SyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to change notifications for `collection`.
    pub async fn subscribe(&self, collection: &str) -> broadcast::Receiver<()> {
        let mut channels = self.channels.write().await;

        match channels.get(collection) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
                channels.insert(collection.to_string(), sender);
                receiver
            }
        }
    }

    /// Tells every subscriber of `collection` that it changed, and drops
    /// channels whose subscribers have all disconnected.
    pub async fn notify(&self, collection: &str) {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(collection) {
            // Ignore send errors (no subscribers)
            let _ = sender.send(());
        }
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of live subscribers for `collection`.
    pub async fn subscriber_count(&self, collection: &str) -> usize {
        self.channels
            .read()
            .await
            .get(collection)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}
