//! Market event stream payloads.
//!
//! Events for one market are published in the order the market's writer
//! produced them and carry a monotonic per-market sequence number.
//! Subscribers therefore observe per-market causal order; there is no
//! ordering guarantee across markets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MarketId, MarketState, OrderId, Resolution, Ticks, Trade, UserId};

/// A sequenced event on one market's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub market_id: MarketId,
    /// Monotonic per-market sequence number.
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub payload: EventPayload,
}

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    OrderAccepted {
        order_id: OrderId,
        user_id: UserId,
    },
    OrderRejected {
        order_id: OrderId,
        user_id: UserId,
        reason: String,
    },
    Trade(Trade),
    OrderCancelled {
        order_id: OrderId,
        user_id: UserId,
        /// Collateral released back to the user's available balance.
        released: Ticks,
        /// Set when the order was already terminal and nothing changed.
        noop: bool,
    },
    MarketStateChanged {
        from: MarketState,
        to: MarketState,
    },
    MarketResolved {
        resolution: Resolution,
    },
}

impl MarketEvent {
    /// Short tag for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::OrderAccepted { .. } => "order_accepted",
            EventPayload::OrderRejected { .. } => "order_rejected",
            EventPayload::Trade(_) => "trade",
            EventPayload::OrderCancelled { .. } => "order_cancelled",
            EventPayload::MarketStateChanged { .. } => "market_state_changed",
            EventPayload::MarketResolved { .. } => "market_resolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_tags() {
        let ev = MarketEvent {
            market_id: MarketId::new(),
            sequence: 1,
            at: Utc::now(),
            payload: EventPayload::MarketStateChanged {
                from: MarketState::Draft,
                to: MarketState::Active,
            },
        };
        assert_eq!(ev.kind(), "market_state_changed");
    }

    #[test]
    fn event_serde_roundtrip() {
        let ev = MarketEvent {
            market_id: MarketId::new(),
            sequence: 7,
            at: Utc::now(),
            payload: EventPayload::OrderCancelled {
                order_id: OrderId::new(),
                user_id: UserId::new(),
                released: 3_600,
                noop: false,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: MarketEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence, 7);
        assert_eq!(back.kind(), "order_cancelled");
    }
}
