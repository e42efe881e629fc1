//! Engine dispatch: the order book and the AMM behind one surface.
//!
//! A market's writer owns exactly one [`MarketEngine`]. Both variants
//! settle through the same [`Ledger`] primitives, so resolution and
//! conservation work identically regardless of engine.
//!
//! Submits are atomic: fills are planned first, every ledger movement is
//! applied (each one validate-then-commit), and only then is the book or
//! pool mutated. A rejection part-way leaves no effects behind.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use openpredict_amm::{LiquidityChange, Pool, Quote};
use openpredict_book::{commit_plan, plan_match, MatchPlan, OrderBook};
use openpredict_types::{
    constants::PRICE_SCALE, MarketId, MarketOrderPolicy, OpenpredictError, Order, OrderId,
    OrderKind, OrderSide, OrderStatus, Result, SelfTradePolicy, Ticks, Trade, TradeId, UserId,
};

use crate::ledger::{Funding, Ledger};

/// Result of an admitted submit.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Final state of the submitted order.
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Reason attached when the residual was cancelled (market orders).
    pub cancel_reason: Option<String>,
}

/// Result of a cancel.
#[derive(Debug, Clone, Copy)]
pub struct CancelReport {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Collateral released back to available.
    pub released: Ticks,
    /// The order was already terminal; nothing changed.
    pub noop: bool,
}

/// Serializable engine state for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineState {
    Book { open_orders: Vec<Order> },
    Amm { pool: Pool },
}

/// The two pricing engines behind one dispatch surface.
#[derive(Debug)]
pub enum MarketEngine {
    Book(BookEngine),
    Amm(AmmEngine),
}

impl MarketEngine {
    /// Collateral a submit would reserve, for the risk gate.
    pub fn required_collateral(
        &self,
        ledger: &Ledger,
        order: &Order,
        self_trade: SelfTradePolicy,
    ) -> Result<Ticks> {
        match self {
            Self::Book(engine) => engine.required_collateral(order, self_trade),
            Self::Amm(engine) => engine.required_collateral(ledger, order),
        }
    }

    /// Execute an admitted order.
    pub fn submit(
        &mut self,
        ledger: &Ledger,
        order: Order,
        command_seq: u64,
        self_trade: SelfTradePolicy,
        policy: MarketOrderPolicy,
    ) -> Result<ExecutionReport> {
        match self {
            Self::Book(engine) => engine.submit(ledger, order, command_seq, self_trade, policy),
            Self::Amm(engine) => engine.submit(ledger, order, command_seq),
        }
    }

    /// Cancel an order. Idempotent: terminal orders report `noop`.
    pub fn cancel(&mut self, ledger: &Ledger, order_id: OrderId) -> Result<CancelReport> {
        match self {
            Self::Book(engine) => engine.cancel(ledger, order_id),
            Self::Amm(_) => Err(OpenpredictError::UnknownOrder(order_id)),
        }
    }

    /// Cancel every resting order, releasing its collateral. Used on
    /// transitions out of trading.
    pub fn cancel_all(&mut self, ledger: &Ledger) -> Result<Vec<CancelReport>> {
        match self {
            Self::Book(engine) => engine.cancel_all(ledger),
            Self::Amm(_) => Ok(Vec::new()),
        }
    }

    /// Serializable state for checkpoints.
    #[must_use]
    pub fn state(&self) -> EngineState {
        match self {
            Self::Book(engine) => EngineState::Book {
                open_orders: engine.open_orders(),
            },
            Self::Amm(engine) => EngineState::Amm {
                pool: engine.pool.clone(),
            },
        }
    }
}

// ===================================================================
// Order book engine
// ===================================================================

/// One order book per outcome plus cancel bookkeeping.
#[derive(Debug)]
pub struct BookEngine {
    market_id: MarketId,
    books: Vec<OrderBook>,
    /// Which outcome's book an open order rests in.
    locations: HashMap<OrderId, usize>,
    /// Terminal orders, kept so a late cancel is a clean no-op.
    terminal: HashMap<OrderId, OrderStatus>,
}

impl BookEngine {
    #[must_use]
    pub fn new(market_id: MarketId, outcome_count: usize) -> Self {
        Self {
            market_id,
            books: (0..outcome_count).map(OrderBook::new).collect(),
            locations: HashMap::new(),
            terminal: HashMap::new(),
        }
    }

    /// Restore from a checkpoint's open orders.
    pub fn restore(market_id: MarketId, outcome_count: usize, open_orders: Vec<Order>) -> Result<Self> {
        let mut engine = Self::new(market_id, outcome_count);
        for order in open_orders {
            let outcome = order.outcome;
            engine.locations.insert(order.id, outcome);
            engine.books[outcome].insert_order(order)?;
        }
        Ok(engine)
    }

    #[must_use]
    pub fn book(&self, outcome: usize) -> Option<&OrderBook> {
        self.books.get(outcome)
    }

    /// All resting orders, for checkpoints.
    #[must_use]
    pub fn open_orders(&self) -> Vec<Order> {
        self.books
            .iter()
            .flat_map(|b| b.all_orders().cloned())
            .collect()
    }

    /// Reservation for a limit order at its own limit price.
    fn limit_collateral(order: &Order) -> Result<Ticks> {
        let price = order.price.ok_or_else(|| OpenpredictError::InvalidOrder {
            reason: "limit orders require a price".to_string(),
        })?;
        Ok(match order.side {
            OrderSide::Buy => price.cost(order.size),
            OrderSide::Sell => price.sell_collateral(order.size),
        })
    }

    fn plan(&self, order: &Order, self_trade: SelfTradePolicy) -> MatchPlan {
        plan_match(&self.books[order.outcome], order, self_trade)
    }

    /// Collateral a submit would reserve: the full size at the limit
    /// price, or exactly what the planned fills consume for market orders.
    pub fn required_collateral(&self, order: &Order, self_trade: SelfTradePolicy) -> Result<Ticks> {
        match order.kind {
            OrderKind::Limit => Self::limit_collateral(order),
            OrderKind::Market => Ok(self.plan(order, self_trade).taker_collateral(order.side)),
        }
    }

    fn submit(
        &mut self,
        ledger: &Ledger,
        mut order: Order,
        command_seq: u64,
        self_trade: SelfTradePolicy,
        policy: MarketOrderPolicy,
    ) -> Result<ExecutionReport> {
        let outcome = order.outcome;
        if outcome >= self.books.len() {
            return Err(OpenpredictError::InvalidOutcome {
                index: outcome,
                count: self.books.len(),
            });
        }
        if order.kind == OrderKind::Limit && order.price.is_none() {
            return Err(OpenpredictError::InvalidOrder {
                reason: "limit orders require a price".to_string(),
            });
        }
        let plan = self.plan(&order, self_trade);

        // Reserve collateral. Limit orders reserve their full size at the
        // limit price; market orders reserve exactly the planned cost.
        match order.kind {
            OrderKind::Limit => {
                ledger.reserve(order.user_id, self.market_id, Self::limit_collateral(&order)?)?;
            }
            OrderKind::Market => {
                if policy == MarketOrderPolicy::AllOrNone && !plan.fills_completely(order.size) {
                    return Err(OpenpredictError::InsufficientLiquidity);
                }
                if plan.taker_filled > 0 {
                    ledger.reserve(
                        order.user_id,
                        self.market_id,
                        plan.taker_collateral(order.side),
                    )?;
                }
            }
        }

        // Settle each fill; every movement validates before mutating.
        let mut trades = Vec::with_capacity(plan.fills.len());
        for (fill_seq, fill) in plan.fills.iter().enumerate() {
            let cost = fill.price.cost(fill.size);
            let (buyer, seller, buyer_order_id, seller_order_id) = match order.side {
                OrderSide::Buy => (order.user_id, fill.maker_user, order.id, fill.maker_order_id),
                OrderSide::Sell => (fill.maker_user, order.user_id, fill.maker_order_id, order.id),
            };
            let flows = ledger.settle_fill(
                self.market_id,
                outcome,
                buyer,
                seller,
                fill.size,
                cost,
                Funding::Reserved,
                Funding::Reserved,
            )?;

            // Release reservation excess over what the fill consumed.
            // The taker's reserve price is its limit (or the trade price
            // for market orders); the maker's is always its own limit,
            // which equals the trade price.
            let taker_reserve_per_fill = match (order.kind, order.side) {
                (OrderKind::Limit, OrderSide::Buy) => {
                    order.price.expect("limit price").cost(fill.size)
                }
                (OrderKind::Limit, OrderSide::Sell) => {
                    order.price.expect("limit price").sell_collateral(fill.size)
                }
                (OrderKind::Market, OrderSide::Buy) => cost,
                (OrderKind::Market, OrderSide::Sell) => fill.price.sell_collateral(fill.size),
            };
            match order.side {
                OrderSide::Buy => {
                    ledger.release(order.user_id, self.market_id, taker_reserve_per_fill - cost)?;
                    ledger.release(
                        fill.maker_user,
                        self.market_id,
                        fill.price.sell_collateral(fill.size) - flows.seller_collateral_consumed,
                    )?;
                }
                OrderSide::Sell => {
                    ledger.release(
                        order.user_id,
                        self.market_id,
                        taker_reserve_per_fill - flows.seller_collateral_consumed,
                    )?;
                    // A resting buyer's reservation is consumed exactly.
                }
            }

            trades.push(Trade {
                id: TradeId::deterministic(self.market_id, command_seq, fill_seq as u64),
                market_id: self.market_id,
                outcome,
                buyer_order_id,
                seller_order_id: Some(seller_order_id),
                buyer,
                seller,
                price: fill.price,
                size: fill.size,
                cost,
                taker_side: order.side,
                executed_at: Utc::now(),
            });
        }

        // Commit maker-side fills to the book and retire filled makers.
        commit_plan(&mut self.books[outcome], &plan)?;
        for fill in &plan.fills {
            if !self.books[outcome].contains_order(&fill.maker_order_id) {
                self.locations.remove(&fill.maker_order_id);
                self.terminal
                    .insert(fill.maker_order_id, OrderStatus::Filled);
            }
        }

        order.filled = plan.taker_filled;
        order.updated_at = Utc::now();
        let mut cancel_reason = None;
        if order.remaining() == 0 {
            order.status = OrderStatus::Filled;
            self.terminal.insert(order.id, OrderStatus::Filled);
        } else {
            match order.kind {
                OrderKind::Limit => {
                    order.status = if order.filled > 0 {
                        OrderStatus::PartiallyFilled
                    } else {
                        OrderStatus::Open
                    };
                    self.locations.insert(order.id, outcome);
                    self.books[outcome].insert_order(order.clone())?;
                }
                OrderKind::Market => {
                    // Residual of a market order cannot rest.
                    order.status = OrderStatus::Cancelled;
                    cancel_reason = Some(OpenpredictError::InsufficientLiquidity.to_string());
                    self.terminal.insert(order.id, OrderStatus::Cancelled);
                }
            }
        }

        debug!(
            market = %self.market_id,
            order = %order.id,
            filled = order.filled,
            trades = trades.len(),
            "book submit"
        );
        Ok(ExecutionReport {
            order,
            trades,
            cancel_reason,
        })
    }

    fn cancel(&mut self, ledger: &Ledger, order_id: OrderId) -> Result<CancelReport> {
        if self.terminal.contains_key(&order_id) {
            // Cancelling an already-terminal order succeeds as a no-op.
            return Ok(CancelReport {
                order_id,
                user_id: UserId::default(),
                released: 0,
                noop: true,
            });
        }
        let outcome = *self
            .locations
            .get(&order_id)
            .ok_or(OpenpredictError::UnknownOrder(order_id))?;
        let order = self.books[outcome].remove_order(&order_id)?;
        self.locations.remove(&order_id);

        let released = match order.side {
            OrderSide::Buy => order.price.expect("resting order").cost(order.remaining()),
            OrderSide::Sell => order
                .price
                .expect("resting order")
                .sell_collateral(order.remaining()),
        };
        ledger.release(order.user_id, self.market_id, released)?;
        self.terminal.insert(order_id, OrderStatus::Cancelled);

        debug!(market = %self.market_id, order = %order_id, released, "cancel");
        Ok(CancelReport {
            order_id,
            user_id: order.user_id,
            released,
            noop: false,
        })
    }

    fn cancel_all(&mut self, ledger: &Ledger) -> Result<Vec<CancelReport>> {
        let ids: Vec<OrderId> = self.locations.keys().copied().collect();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            reports.push(self.cancel(ledger, id)?);
        }
        Ok(reports)
    }
}

// ===================================================================
// AMM engine
// ===================================================================

/// Constant-product pool plus its ledger account.
#[derive(Debug)]
pub struct AmmEngine {
    market_id: MarketId,
    pub pool: Pool,
    pub pool_account: UserId,
}

impl AmmEngine {
    #[must_use]
    pub fn new(market_id: MarketId, fee_bps: u32) -> Self {
        Self {
            market_id,
            pool: Pool::new(market_id, fee_bps),
            pool_account: UserId::pool_account(market_id),
        }
    }

    /// Restore from a checkpointed pool.
    #[must_use]
    pub fn restore(market_id: MarketId, pool: Pool) -> Self {
        Self {
            market_id,
            pool,
            pool_account: UserId::pool_account(market_id),
        }
    }

    /// Quote without executing.
    pub fn quote(&self, outcome: usize, size: u64, side: OrderSide) -> Result<Quote> {
        match side {
            OrderSide::Buy => self.pool.quote_buy(outcome, size),
            OrderSide::Sell => self.pool.quote_sell(outcome, size),
        }
    }

    /// Ticks the submitting user's balance must cover: the quoted input
    /// for a buy; for a sell, the complement-side collateral on whatever
    /// part of the size mints new shorts after netting the user's longs.
    pub fn required_collateral(&self, ledger: &Ledger, order: &Order) -> Result<Ticks> {
        let quote = self.quote(order.outcome, order.size, order.side)?;
        match order.side {
            OrderSide::Buy => Ok(quote.amount),
            OrderSide::Sell => {
                let q = order.size as i64;
                let long = ledger
                    .position_shares(order.user_id, self.market_id, order.outcome)
                    .clamp(0, q);
                let mint = q - long;
                let proceeds_mint =
                    quote.amount - (i128::from(quote.amount) * i128::from(long) / i128::from(q)) as Ticks;
                Ok((PRICE_SCALE * mint - proceeds_mint).max(0))
            }
        }
    }

    fn submit(&mut self, ledger: &Ledger, mut order: Order, command_seq: u64) -> Result<ExecutionReport> {
        if order.outcome > 1 {
            return Err(OpenpredictError::InvalidOutcome {
                index: order.outcome,
                count: 2,
            });
        }
        let quote = self.quote(order.outcome, order.size, order.side)?;

        // A limit price on an AMM order is a slippage bound.
        if let Some(limit) = order.price {
            let violated = match order.side {
                OrderSide::Buy => quote.effective_price > limit,
                OrderSide::Sell => quote.effective_price < limit,
            };
            if violated {
                return Err(OpenpredictError::InsufficientLiquidity);
            }
        }

        // Settle against the pool account; swaps debit available balance
        // directly. The pool tops the escrow pot up to the full payout
        // backing, so resolution treats AMM shares like book shares.
        let (buyer, seller) = match order.side {
            OrderSide::Buy => (order.user_id, self.pool_account),
            OrderSide::Sell => (self.pool_account, order.user_id),
        };
        ledger.settle_fill(
            self.market_id,
            order.outcome,
            buyer,
            seller,
            order.size,
            quote.amount,
            Funding::Available,
            Funding::Available,
        )?;

        // Ledger accepted; reserves follow (same quote, same inputs).
        let applied = match order.side {
            OrderSide::Buy => self.pool.swap_buy(order.outcome, order.size)?,
            OrderSide::Sell => self.pool.swap_sell(order.outcome, order.size)?,
        };
        debug_assert_eq!(applied.amount, quote.amount);

        order.filled = order.size;
        order.status = OrderStatus::Filled;
        order.updated_at = Utc::now();

        let trade = Trade {
            id: TradeId::deterministic(self.market_id, command_seq, 0),
            market_id: self.market_id,
            outcome: order.outcome,
            buyer_order_id: order.id,
            seller_order_id: None,
            buyer,
            seller,
            price: quote.effective_price,
            size: order.size,
            cost: quote.amount,
            taker_side: order.side,
            executed_at: Utc::now(),
        };
        debug!(market = %self.market_id, order = %order.id, cost = quote.amount, "amm swap");

        Ok(ExecutionReport {
            order,
            trades: vec![trade],
            cancel_reason: None,
        })
    }

    /// Seed the pool: the provider funds the initial reserves.
    pub fn seed(
        &mut self,
        ledger: &Ledger,
        provider: UserId,
        r_yes: u64,
        r_no: u64,
    ) -> Result<LiquidityChange> {
        if self.pool.total_shares() != 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "pool already seeded".to_string(),
            });
        }
        ledger.transfer_available(provider, self.pool_account, r_yes as Ticks + r_no as Ticks)?;
        self.pool.seed(provider, r_yes, r_no)
    }

    /// Add liquidity: funds move first, reserves follow.
    pub fn add_liquidity(
        &mut self,
        ledger: &Ledger,
        provider: UserId,
        amount: u64,
    ) -> Result<LiquidityChange> {
        let preview = self.pool.preview_add(amount)?;
        ledger.transfer_available(provider, self.pool_account, preview.amount)?;
        self.pool.add_liquidity(provider, amount)
    }

    /// Remove liquidity: the pool account pays the provider pro-rata.
    pub fn remove_liquidity(
        &mut self,
        ledger: &Ledger,
        provider: UserId,
        shares: u64,
    ) -> Result<LiquidityChange> {
        let preview = self.pool.preview_remove(provider, shares)?;
        ledger.transfer_available(self.pool_account, provider, preview.amount)?;
        self.pool.remove_liquidity(provider, shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpredict_types::Price;

    fn px(t: u16) -> Price {
        Price::new(t).unwrap()
    }

    fn funded_user(ledger: &Ledger, amount: Ticks) -> UserId {
        let user = UserId::new();
        ledger.deposit(user, amount).unwrap();
        user
    }

    fn limit_order(
        market: MarketId,
        user: UserId,
        side: OrderSide,
        price: u16,
        size: u64,
        seq: u64,
    ) -> Order {
        let mut order = Order::dummy_limit_for_user(user, side, px(price), size);
        order.market_id = market;
        order.sequence = seq;
        order
    }

    fn setup_book() -> (Ledger, MarketId, BookEngine) {
        let ledger = Ledger::new();
        let market = MarketId::new();
        let engine = BookEngine::new(market, 2);
        (ledger, market, engine)
    }

    #[test]
    fn resting_limit_order_reserves_collateral() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);

        let order = limit_order(market, alice, OrderSide::Buy, 6_000, 100, 1);
        let report = engine
            .submit(&ledger, order, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        assert_eq!(report.order.status, OrderStatus::Open);
        assert!(report.trades.is_empty());
        assert_eq!(ledger.balance(alice).reserved, 600_000);
        assert_eq!(ledger.balance(alice).available, 400_000);
    }

    #[test]
    fn cross_produces_trade_and_positions() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        let buy = limit_order(market, alice, OrderSide::Buy, 6_000, 100, 1);
        engine
            .submit(&ledger, buy, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        let sell = limit_order(market, bob, OrderSide::Sell, 6_000, 100, 2);
        let report = engine
            .submit(&ledger, sell, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.price, px(6_000));
        assert_eq!(trade.size, 100);
        assert_eq!(trade.buyer, alice);
        assert_eq!(trade.seller, bob);
        assert_eq!(report.order.status, OrderStatus::Filled);

        assert_eq!(ledger.position_shares(alice, market, 0), 100);
        assert_eq!(ledger.position_shares(bob, market, 0), -100);
        assert_eq!(ledger.balance(alice).reserved, 0);
        assert_eq!(ledger.balance(bob).reserved, 0);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn price_improvement_releases_excess() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        // Bob rests an ask at 55.00%.
        let sell = limit_order(market, bob, OrderSide::Sell, 5_500, 100, 1);
        engine
            .submit(&ledger, sell, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        // Alice is willing to pay 60.00% but trades at the maker's price.
        let buy = limit_order(market, alice, OrderSide::Buy, 6_000, 100, 2);
        let report = engine
            .submit(&ledger, buy, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        assert_eq!(report.trades[0].price, px(5_500));
        // Alice paid 550_000, not 600_000; everything else came back.
        assert_eq!(ledger.balance(alice).available, 450_000);
        assert_eq!(ledger.balance(alice).reserved, 0);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn partial_fill_keeps_residual_reserved() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        let buy = limit_order(market, alice, OrderSide::Buy, 6_000, 100, 1);
        engine
            .submit(&ledger, buy, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        let sell = limit_order(market, bob, OrderSide::Sell, 6_000, 40, 2);
        let report = engine
            .submit(&ledger, sell, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();
        assert_eq!(report.trades[0].size, 40);

        // Alice's residual 60 stays reserved at her limit: 60 * 6000.
        assert_eq!(ledger.balance(alice).reserved, 360_000);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn cancel_releases_residual_collateral() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        let buy = limit_order(market, alice, OrderSide::Buy, 6_000, 100, 1);
        let buy_id = buy.id;
        engine
            .submit(&ledger, buy, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();
        let sell = limit_order(market, bob, OrderSide::Sell, 6_000, 40, 2);
        engine
            .submit(&ledger, sell, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        let report = engine.cancel(&ledger, buy_id).unwrap();
        assert!(!report.noop);
        assert_eq!(report.released, 360_000);
        assert_eq!(ledger.balance(alice).reserved, 0);

        // Cancelling again is a success no-op.
        let again = engine.cancel(&ledger, buy_id).unwrap();
        assert!(again.noop);
        assert_eq!(again.released, 0);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn cancel_unknown_order_errors() {
        let (ledger, _, mut engine) = setup_book();
        assert!(matches!(
            engine.cancel(&ledger, OrderId::new()),
            Err(OpenpredictError::UnknownOrder(_))
        ));
    }

    #[test]
    fn all_or_none_market_order_rejects_without_movement() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        let sell = limit_order(market, bob, OrderSide::Sell, 6_000, 50, 1);
        engine
            .submit(&ledger, sell, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        let mut market_buy = Order::dummy_market(OrderSide::Buy, 100);
        market_buy.market_id = market;
        market_buy.user_id = alice;
        let before = ledger.balance(alice);
        let err = engine
            .submit(&ledger, market_buy, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::AllOrNone)
            .unwrap_err();
        assert!(matches!(err, OpenpredictError::InsufficientLiquidity));
        assert_eq!(ledger.balance(alice), before, "no ledger movement");
        assert_eq!(engine.book(0).unwrap().order_count(), 1, "book untouched");
    }

    #[test]
    fn partial_ok_market_order_cancels_residual() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        let sell = limit_order(market, bob, OrderSide::Sell, 6_000, 50, 1);
        engine
            .submit(&ledger, sell, 1, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        let mut market_buy = Order::dummy_market(OrderSide::Buy, 100);
        market_buy.market_id = market;
        market_buy.user_id = alice;
        let report = engine
            .submit(&ledger, market_buy, 2, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
            .unwrap();

        assert_eq!(report.order.filled, 50);
        assert_eq!(report.order.status, OrderStatus::Cancelled);
        assert!(report.cancel_reason.is_some());
        assert_eq!(ledger.balance(alice).reserved, 0, "nothing left reserved");
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn cancel_all_sweeps_every_resting_order() {
        let (ledger, market, mut engine) = setup_book();
        let alice = funded_user(&ledger, 1_000_000);
        let bob = funded_user(&ledger, 1_000_000);

        for (seq, (user, side, price)) in [
            (alice, OrderSide::Buy, 5_000),
            (bob, OrderSide::Sell, 7_000),
            (alice, OrderSide::Buy, 4_000),
        ]
        .into_iter()
        .enumerate()
        {
            let order = limit_order(market, user, side, price, 10, seq as u64);
            engine
                .submit(&ledger, order, seq as u64, SelfTradePolicy::Prevent, MarketOrderPolicy::PartialOk)
                .unwrap();
        }

        let reports = engine.cancel_all(&ledger).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(ledger.balance(alice).reserved, 0);
        assert_eq!(ledger.balance(bob).reserved, 0);
        assert_eq!(engine.open_orders().len(), 0);
    }

    // ---------------------------------------------------------------
    // AMM engine
    // ---------------------------------------------------------------

    fn setup_amm() -> (Ledger, MarketId, AmmEngine, UserId) {
        let ledger = Ledger::new();
        let market = MarketId::new();
        let mut engine = AmmEngine::new(market, 0);
        let provider = funded_user(&ledger, 100_000_000);
        engine.seed(&ledger, provider, 1_000, 1_000).unwrap();
        // Working capital for pot top-ups beyond the seeded reserves.
        ledger
            .transfer_available(provider, engine.pool_account, 80_000_000)
            .unwrap();
        (ledger, market, engine, provider)
    }

    #[test]
    fn amm_buy_debits_quote_and_credits_shares() {
        let (ledger, market, mut engine, _) = setup_amm();
        let user = funded_user(&ledger, 1_000_000);

        let mut order = Order::dummy_market(OrderSide::Buy, 100);
        order.market_id = market;
        order.user_id = user;
        let report = engine.submit(&ledger, order, 1).unwrap();

        assert_eq!(report.trades.len(), 1);
        assert!(report.trades[0].is_amm());
        assert_eq!(report.trades[0].cost, 112);
        assert_eq!(ledger.balance(user).available, 1_000_000 - 112);
        assert_eq!(ledger.position_shares(user, market, 0), 100);
        assert_eq!(engine.pool.reserves(), [900, 1_112]);
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn amm_round_trip_restores_flat_position() {
        let (ledger, market, mut engine, _) = setup_amm();
        let user = funded_user(&ledger, 1_000_000);

        let mut buy = Order::dummy_market(OrderSide::Buy, 100);
        buy.market_id = market;
        buy.user_id = user;
        engine.submit(&ledger, buy, 1).unwrap();

        let mut sell = Order::dummy_market(OrderSide::Sell, 100);
        sell.market_id = market;
        sell.user_id = user;
        engine.submit(&ledger, sell, 2).unwrap();

        assert_eq!(ledger.position_shares(user, market, 0), 0);
        assert!(ledger.balance(user).available <= 1_000_000, "no free profit");
        ledger.verify_conservation().unwrap();
    }

    #[test]
    fn amm_slippage_bound_rejects() {
        let (ledger, market, mut engine, _) = setup_amm();
        let user = funded_user(&ledger, 1_000_000);

        // Pool quotes ~1.12 ticks per share; a 1-tick bound must fail.
        let mut order = Order::dummy_limit_for_user(user, OrderSide::Buy, px(1), 100);
        order.market_id = market;
        order.kind = OrderKind::Market;
        let err = engine.submit(&ledger, order, 1).unwrap_err();
        assert!(matches!(err, OpenpredictError::InsufficientLiquidity));
    }

    #[test]
    fn amm_liquidity_add_remove() {
        let (ledger, _, mut engine, provider) = setup_amm();
        let before = ledger.balance(provider).available;

        let added = engine.add_liquidity(&ledger, provider, 500).unwrap();
        assert_eq!(added.shares, 500);
        assert_eq!(ledger.balance(provider).available, before - added.amount);

        let removed = engine.remove_liquidity(&ledger, provider, 500).unwrap();
        assert_eq!(removed.shares, 500);
        ledger.verify_conservation().unwrap();
    }
}
