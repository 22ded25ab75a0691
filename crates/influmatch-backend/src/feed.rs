use tokio::sync::broadcast;

use influmatch_types::FeedEvent;

/// Fan-out point for change-feed events — every subscriber receives every
/// event and filters on its own room map.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Send errors (no live subscribers) are ignored.
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}
