//! Order types for the OpenPredict matching engine.
//!
//! An order is exclusively owned by the book that accepted it until it
//! reaches a terminal state. Sizes are integer shares; limit prices live
//! on the basis-point grid (see [`crate::Price`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, Price, UserId};

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The opposing side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Signed share delta this side applies to a position per filled share.
    #[must_use]
    pub fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// The type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal orders can no longer fill or be cancelled (cancel becomes
    /// a no-op).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Core order struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: OrderSide,
    /// Index into the market's outcome list.
    pub outcome: usize,
    pub kind: OrderKind,
    /// Required for limit orders, absent for market orders.
    pub price: Option<Price>,
    /// Total size in shares.
    pub size: u64,
    /// Shares filled so far.
    pub filled: u64,
    pub status: OrderStatus,
    /// Arrival sequence assigned by the market writer (time priority).
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Unfilled residual size.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.size - self.filled
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled == self.size
    }

    /// Whether a resting order at `resting` crosses this order's limit.
    /// Market orders cross unconditionally.
    #[must_use]
    pub fn crosses(&self, resting: Price) -> bool {
        match (self.kind, self.price) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit, Some(limit)) => match self.side {
                OrderSide::Buy => limit >= resting,
                OrderSide::Sell => limit <= resting,
            },
            // A limit order without a price never matches; construction
            // rejects this shape before it reaches the book.
            (OrderKind::Limit, None) => false,
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy_limit(side: OrderSide, price: Price, size: u64) -> Self {
        Self::dummy_limit_for_user(UserId::new(), side, price, size)
    }

    pub fn dummy_limit_for_user(user_id: UserId, side: OrderSide, price: Price, size: u64) -> Self {
        Self {
            id: OrderId::new(),
            market_id: MarketId::new(),
            user_id,
            side,
            outcome: 0,
            kind: OrderKind::Limit,
            price: Some(price),
            size,
            filled: 0,
            status: OrderStatus::Open,
            sequence: 0,
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn dummy_market(side: OrderSide, size: u64) -> Self {
        Self {
            id: OrderId::new(),
            market_id: MarketId::new(),
            user_id: UserId::new(),
            side,
            outcome: 0,
            kind: OrderKind::Market,
            price: None,
            size,
            filled: 0,
            status: OrderStatus::Open,
            sequence: 0,
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(t: u16) -> Price {
        Price::new(t).unwrap()
    }

    #[test]
    fn remaining_tracks_fills() {
        let mut order = Order::dummy_limit(OrderSide::Buy, px(6000), 100);
        assert_eq!(order.remaining(), 100);
        order.filled = 40;
        assert_eq!(order.remaining(), 60);
        assert!(!order.is_filled());
        order.filled = 100;
        assert!(order.is_filled());
    }

    #[test]
    fn limit_crossing() {
        let buy = Order::dummy_limit(OrderSide::Buy, px(6000), 10);
        assert!(buy.crosses(px(5999)));
        assert!(buy.crosses(px(6000)));
        assert!(!buy.crosses(px(6001)));

        let sell = Order::dummy_limit(OrderSide::Sell, px(6000), 10);
        assert!(sell.crosses(px(6001)));
        assert!(sell.crosses(px(6000)));
        assert!(!sell.crosses(px(5999)));
    }

    #[test]
    fn market_orders_cross_anything() {
        let buy = Order::dummy_market(OrderSide::Buy, 10);
        assert!(buy.crosses(px(1)));
        assert!(buy.crosses(px(9999)));
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn side_helpers() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }
}
