//! Event publication.
//!
//! A single broadcast channel carries every market's events. Each market
//! writer stamps its own monotonic sequence numbers before publishing,
//! and publishes in the order it produced the events, so any subscriber
//! observes per-market causal order. Slow subscribers that fall behind
//! the channel capacity miss events (tokio broadcast lag semantics);
//! recovery for such consumers is the journal, not the live stream.

use tokio::sync::broadcast;
use tracing::trace;

use openpredict_types::MarketEvent;

/// Default buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 4_096;

/// Cloneable handle publishing [`MarketEvent`]s to all subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the full event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    /// Publish one event. Returns the number of live subscribers it
    /// reached; zero subscribers is not an error.
    pub fn publish(&self, event: MarketEvent) -> usize {
        trace!(market = %event.market_id, seq = event.sequence, kind = event.kind(), "publish");
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
