//! Continuous price-time priority matching.
//!
//! Matching is split into two phases so callers can make the whole
//! submit atomic:
//!
//! 1. [`plan_match`] scans the book without mutating it and produces a
//!    [`MatchPlan`] — the exact fills the order would take.
//! 2. The caller applies collateral movements for the plan; only once
//!    those succeed does [`commit_plan`] mutate the book.
//!
//! A failure between the phases leaves the book untouched.
//!
//! ## Self-Trade Prevention
//!
//! Under [`SelfTradePolicy::Prevent`], resting orders owned by the
//! incoming order's user are skipped (wash trading prevention); matching
//! continues against the next order at the level.

use openpredict_types::{
    Order, OrderId, OrderSide, Price, Result, SelfTradePolicy, Ticks, UserId,
};

use crate::book::OrderBook;

/// One fill the incoming order would take against a resting maker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFill {
    pub maker_order_id: OrderId,
    pub maker_user: UserId,
    /// Trade price: the resting order's price (maker gets the price).
    pub price: Price,
    pub size: u64,
}

/// The full set of fills an incoming order would take.
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    /// Total shares the incoming order would fill.
    pub taker_filled: u64,
}

impl MatchPlan {
    /// Whether the plan fills the full `size`.
    #[must_use]
    pub fn fills_completely(&self, size: u64) -> bool {
        self.taker_filled == size
    }

    /// Collateral the taker consumes across the plan, at trade prices:
    /// the buy cost for a buyer, the complement-side collateral for a
    /// minting seller.
    #[must_use]
    pub fn taker_collateral(&self, side: OrderSide) -> Ticks {
        self.fills
            .iter()
            .map(|f| match side {
                OrderSide::Buy => f.price.cost(f.size),
                OrderSide::Sell => f.price.sell_collateral(f.size),
            })
            .sum()
    }
}

/// Scan the book for the fills `taker` would take, without mutating it.
///
/// Walks opposing levels best-first while the incoming order's limit
/// crosses (market orders cross unconditionally), FIFO within a level.
#[must_use]
pub fn plan_match(book: &OrderBook, taker: &Order, self_trade: SelfTradePolicy) -> MatchPlan {
    let mut plan = MatchPlan::default();
    let mut needed = taker.remaining();

    'levels: for level in book.opposing_levels(taker.side) {
        if needed == 0 {
            break;
        }
        if !taker.crosses(level.price) {
            break;
        }
        for maker in &level.orders {
            if needed == 0 {
                break 'levels;
            }
            if self_trade == SelfTradePolicy::Prevent && maker.user_id == taker.user_id {
                continue;
            }
            let size = needed.min(maker.remaining());
            if size == 0 {
                continue;
            }
            plan.fills.push(PlannedFill {
                maker_order_id: maker.id,
                maker_user: maker.user_id,
                price: level.price,
                size,
            });
            plan.taker_filled += size;
            needed -= size;
        }
    }

    plan
}

/// Apply a plan's maker-side fills to the book: decrement residuals and
/// remove makers that reach zero.
///
/// # Errors
/// Propagates book errors; these indicate the plan went stale, which
/// cannot happen while the market writer serialises all access.
pub fn commit_plan(book: &mut OrderBook, plan: &MatchPlan) -> Result<()> {
    for fill in &plan.fills {
        book.fill_order(&fill.maker_order_id, fill.size)?;
    }
    Ok(())
}
