//! The order book for a single (market, outcome).
//!
//! Uses `BTreeMap` for price-level ordering:
//! - **Bids** (buys): `BTreeMap<Reverse<Price>, PriceLevel>` -- highest price first
//! - **Asks** (sells): `BTreeMap<Price, PriceLevel>` -- lowest price first
//!
//! An auxiliary `HashMap<OrderId, (Side, Price)>` enables O(log N) cancellation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use openpredict_types::{
    OpenpredictError, Order, OrderId, OrderSide, Price, Result,
};

use crate::price_level::PriceLevel;

/// The order book for a single (market, outcome).
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Index into the market's outcome list this book serves.
    pub outcome: usize,
    /// Buy side: highest price first (`Reverse` key).
    bids: BTreeMap<Reverse<Price>, PriceLevel>,
    /// Sell side: lowest price first.
    asks: BTreeMap<Price, PriceLevel>,
    /// Fast lookup: `OrderId -> (side, price)` for O(log N) cancel.
    index: HashMap<OrderId, (OrderSide, Price)>,
}

impl OrderBook {
    /// Create a new empty order book for the given outcome.
    #[must_use]
    pub fn new(outcome: usize) -> Self {
        Self {
            outcome,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    // =================================================================
    // Insertion
    // =================================================================

    /// Rest a limit order in the book at its price.
    ///
    /// # Errors
    /// Returns `DuplicateOrder` if the ID already rests here, or
    /// `InvalidOrder` for an order without a limit price.
    pub fn insert_order(&mut self, order: Order) -> Result<()> {
        if self.index.contains_key(&order.id) {
            return Err(OpenpredictError::DuplicateOrder(order.id));
        }
        let price = order.price.ok_or_else(|| OpenpredictError::InvalidOrder {
            reason: "only priced limit orders can rest in the book".to_string(),
        })?;

        self.index.insert(order.id, (order.side, price));
        match order.side {
            OrderSide::Buy => {
                self.bids
                    .entry(Reverse(price))
                    .or_insert_with(|| PriceLevel::new(price))
                    .push_back(order);
            }
            OrderSide::Sell => {
                self.asks
                    .entry(price)
                    .or_insert_with(|| PriceLevel::new(price))
                    .push_back(order);
            }
        }
        Ok(())
    }

    // =================================================================
    // Cancellation / removal
    // =================================================================

    /// Remove an order by ID. Returns the removed order.
    ///
    /// # Errors
    /// Returns `UnknownOrder` if the ID doesn't rest in this book.
    pub fn remove_order(&mut self, order_id: &OrderId) -> Result<Order> {
        let (side, price) = self
            .index
            .remove(order_id)
            .ok_or(OpenpredictError::UnknownOrder(*order_id))?;

        let order = match side {
            OrderSide::Buy => {
                let level = self
                    .bids
                    .get_mut(&Reverse(price))
                    .ok_or(OpenpredictError::UnknownOrder(*order_id))?;
                let order = level
                    .remove_order(order_id)
                    .ok_or(OpenpredictError::UnknownOrder(*order_id))?;
                if level.is_empty() {
                    self.bids.remove(&Reverse(price));
                }
                order
            }
            OrderSide::Sell => {
                let level = self
                    .asks
                    .get_mut(&price)
                    .ok_or(OpenpredictError::UnknownOrder(*order_id))?;
                let order = level
                    .remove_order(order_id)
                    .ok_or(OpenpredictError::UnknownOrder(*order_id))?;
                if level.is_empty() {
                    self.asks.remove(&price);
                }
                order
            }
        };

        Ok(order)
    }

    /// Record `size` shares filled against a resting order, removing it
    /// once fully filled. Returns the maker's new residual.
    ///
    /// # Errors
    /// Returns `UnknownOrder` if the ID doesn't rest here, or
    /// `InvariantViolation` if the fill exceeds the residual.
    pub fn fill_order(&mut self, order_id: &OrderId, size: u64) -> Result<u64> {
        let (side, price) = *self
            .index
            .get(order_id)
            .ok_or(OpenpredictError::UnknownOrder(*order_id))?;

        let level = match side {
            OrderSide::Buy => self.bids.get_mut(&Reverse(price)),
            OrderSide::Sell => self.asks.get_mut(&price),
        }
        .ok_or(OpenpredictError::UnknownOrder(*order_id))?;

        let order = level
            .order_mut(order_id)
            .ok_or(OpenpredictError::UnknownOrder(*order_id))?;
        if size > order.remaining() {
            return Err(OpenpredictError::InvariantViolation {
                reason: format!(
                    "fill of {size} exceeds residual {} on order {order_id}",
                    order.remaining()
                ),
            });
        }
        order.filled += size;
        let residual = order.remaining();
        if residual == 0 {
            self.remove_order(order_id)?;
        }
        Ok(residual)
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Best (highest) bid price, or `None` if no bids.
    #[must_use]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next().map(|r| r.0)
    }

    /// Best (lowest) ask price, or `None` if no asks.
    #[must_use]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// A book is crossed when the best bid meets or exceeds the best ask.
    /// Matching must never leave the book in this state.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Total number of orders currently resting.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    /// Number of distinct bid price levels.
    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of distinct ask price levels.
    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Returns `true` if the book has no orders on either side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Check if an order rests in the book.
    #[must_use]
    pub fn contains_order(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    /// Side and price of a resting order.
    #[must_use]
    pub fn order_location(&self, order_id: &OrderId) -> Option<(OrderSide, Price)> {
        self.index.get(order_id).copied()
    }

    // =================================================================
    // Iteration (for the matcher)
    // =================================================================

    /// Iterate bid levels from best (highest) to worst.
    pub fn bid_levels(&self) -> impl Iterator<Item = &PriceLevel> {
        self.bids.values()
    }

    /// Iterate ask levels from best (lowest) to worst.
    pub fn ask_levels(&self) -> impl Iterator<Item = &PriceLevel> {
        self.asks.values()
    }

    /// Iterate the levels the given side would match against, best first.
    pub fn opposing_levels(&self, side: OrderSide) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match side {
            OrderSide::Buy => Box::new(self.ask_levels()),
            OrderSide::Sell => Box::new(self.bid_levels()),
        }
    }

    /// All resting orders, for checkpointing. No particular order across
    /// levels; FIFO within a level.
    pub fn all_orders(&self) -> impl Iterator<Item = &Order> {
        self.bids
            .values()
            .chain(self.asks.values())
            .flat_map(|level| level.orders.iter())
    }
}

#[cfg(test)]
mod tests {
    use openpredict_types::{Order, OrderSide, Price};

    use super::*;

    fn px(t: u16) -> Price {
        Price::new(t).unwrap()
    }

    fn make_order(side: OrderSide, price: u16, size: u64) -> Order {
        Order::dummy_limit(side, px(price), size)
    }

    #[test]
    fn insert_and_query_best_bid_ask() {
        let mut book = OrderBook::new(0);

        book.insert_order(make_order(OrderSide::Buy, 6000, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Buy, 5900, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Sell, 6100, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Sell, 6200, 10)).unwrap();

        assert_eq!(book.best_bid(), Some(px(6000)));
        assert_eq!(book.best_ask(), Some(px(6100)));
        assert!(!book.is_crossed());
        assert_eq!(book.order_count(), 4);
    }

    #[test]
    fn remove_order_clears_book() {
        let mut book = OrderBook::new(0);
        let order = make_order(OrderSide::Buy, 6000, 10);
        let id = order.id;

        book.insert_order(order).unwrap();
        assert_eq!(book.order_count(), 1);

        let removed = book.remove_order(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(book.order_count(), 0);
        assert!(book.is_empty());
    }

    #[test]
    fn remove_nonexistent_order() {
        let mut book = OrderBook::new(0);
        let result = book.remove_order(&openpredict_types::OrderId::new());
        assert!(matches!(result, Err(OpenpredictError::UnknownOrder(_))));
    }

    #[test]
    fn remove_clears_empty_level() {
        let mut book = OrderBook::new(0);
        let order = make_order(OrderSide::Buy, 6000, 10);
        let id = order.id;

        book.insert_order(order).unwrap();
        assert_eq!(book.bid_depth(), 1);

        book.remove_order(&id).unwrap();
        assert_eq!(book.bid_depth(), 0);
    }

    #[test]
    fn duplicate_order_rejected() {
        let mut book = OrderBook::new(0);
        let order = make_order(OrderSide::Buy, 6000, 10);
        let dup = order.clone();

        book.insert_order(order).unwrap();
        let result = book.insert_order(dup);
        assert!(matches!(result, Err(OpenpredictError::DuplicateOrder(_))));
    }

    #[test]
    fn market_order_cannot_rest() {
        let mut book = OrderBook::new(0);
        let order = Order::dummy_market(OrderSide::Buy, 10);
        assert!(matches!(
            book.insert_order(order),
            Err(OpenpredictError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn fill_order_partial_then_full() {
        let mut book = OrderBook::new(0);
        let order = make_order(OrderSide::Sell, 6000, 100);
        let id = order.id;
        book.insert_order(order).unwrap();

        let residual = book.fill_order(&id, 40).unwrap();
        assert_eq!(residual, 60);
        assert!(book.contains_order(&id));

        let residual = book.fill_order(&id, 60).unwrap();
        assert_eq!(residual, 0);
        assert!(!book.contains_order(&id));
        assert_eq!(book.ask_depth(), 0);
    }

    #[test]
    fn fill_over_residual_rejected() {
        let mut book = OrderBook::new(0);
        let order = make_order(OrderSide::Sell, 6000, 10);
        let id = order.id;
        book.insert_order(order).unwrap();
        assert!(matches!(
            book.fill_order(&id, 11),
            Err(OpenpredictError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn bid_levels_iterate_highest_first() {
        let mut book = OrderBook::new(0);
        book.insert_order(make_order(OrderSide::Buy, 5500, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Buy, 6000, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Buy, 5800, 10)).unwrap();

        let prices: Vec<Price> = book.bid_levels().map(|l| l.price).collect();
        assert_eq!(prices, vec![px(6000), px(5800), px(5500)]);
    }

    #[test]
    fn ask_levels_iterate_lowest_first() {
        let mut book = OrderBook::new(0);
        book.insert_order(make_order(OrderSide::Sell, 6500, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Sell, 6100, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Sell, 6300, 10)).unwrap();

        let prices: Vec<Price> = book.ask_levels().map(|l| l.price).collect();
        assert_eq!(prices, vec![px(6100), px(6300), px(6500)]);
    }

    #[test]
    fn crossed_detection() {
        let mut book = OrderBook::new(0);
        book.insert_order(make_order(OrderSide::Buy, 6000, 10)).unwrap();
        book.insert_order(make_order(OrderSide::Sell, 6000, 10)).unwrap();
        assert!(book.is_crossed());
    }

    #[test]
    fn empty_book() {
        let book = OrderBook::new(0);
        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert!(!book.is_crossed());
    }
}
