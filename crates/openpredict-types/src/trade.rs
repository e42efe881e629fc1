//! Trade records produced by the matching engines.
//!
//! A [`Trade`] is the immutable record of a fill. Book trades carry both
//! order IDs; AMM fills carry the buyer's order ID and the pool account as
//! the counterparty, with no seller order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, OrderSide, Price, Ticks, TradeId, UserId};

/// An immutable fill record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Deterministic from (market, command seq, fill seq).
    pub id: TradeId,
    pub market_id: MarketId,
    /// Index into the market's outcome list.
    pub outcome: usize,
    pub buyer_order_id: OrderId,
    /// `None` when the counterparty is the AMM pool.
    pub seller_order_id: Option<OrderId>,
    pub buyer: UserId,
    pub seller: UserId,
    /// Execution price (the resting order's price; AMM effective price).
    pub price: Price,
    /// Executed size in shares.
    pub size: u64,
    /// Ticks the buyer paid. `price.cost(size)` for book fills; AMM fills
    /// carry the pool's rounded quote, which need not be divisible by size.
    pub cost: Ticks,
    /// Which side the aggressive order was on.
    pub taker_side: OrderSide,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Notional value of the fill in ticks.
    #[must_use]
    pub fn notional(&self) -> Ticks {
        self.cost
    }

    /// Whether the counterparty was an AMM pool.
    #[must_use]
    pub fn is_amm(&self) -> bool {
        self.seller_order_id.is_none()
    }
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade[{}] {} outcome#{} {} x {} = {} ticks",
            self.id.short(),
            self.market_id,
            self.outcome,
            self.size,
            self.price,
            self.cost,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trade() -> Trade {
        let market_id = MarketId::new();
        let price = Price::new(6000).unwrap();
        Trade {
            id: TradeId::deterministic(market_id, 1, 0),
            market_id,
            outcome: 0,
            buyer_order_id: OrderId::new(),
            seller_order_id: Some(OrderId::new()),
            buyer: UserId::new(),
            seller: UserId::new(),
            price,
            size: 100,
            cost: price.cost(100),
            taker_side: OrderSide::Buy,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn trade_notional() {
        let t = make_trade();
        assert_eq!(t.notional(), 600_000);
    }

    #[test]
    fn amm_flag() {
        let mut t = make_trade();
        assert!(!t.is_amm());
        t.seller_order_id = None;
        assert!(t.is_amm());
    }

    #[test]
    fn trade_serde_roundtrip() {
        let trade = make_trade();
        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(trade.id, back.id);
        assert_eq!(trade.price, back.price);
        assert_eq!(trade.size, back.size);
        assert_eq!(trade.cost, back.cost);
    }
}
