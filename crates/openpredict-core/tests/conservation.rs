//! Property tests for the monetary invariants.
//!
//! These drive random order flow straight through the book engine and
//! ledger (synchronously, so the generators stay simple) and assert the
//! system-wide invariants after every step:
//!
//! 1. Monetary conservation: user balances plus pots never change under
//!    matching, cancelling, and resolving — only deposits move the total.
//! 2. Reservation correctness: an open limit order's attributable
//!    reservation equals its residual at its reserve price.
//! 3. No crossed book after any submit.

use openpredict_core::{BookEngine, Ledger, MarketEngine};
use openpredict_types::{
    constants::PRICE_SCALE, MarketId, MarketOrderPolicy, Order, OrderId, OrderSide, OrderStatus,
    Price, SelfTradePolicy, Ticks, UserId,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Action {
    user_ix: usize,
    side: OrderSide,
    price: u16,
    size: u64,
    /// Cancel this submit later (by position in the flow).
    cancel: bool,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    (
        0usize..4,
        prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)],
        2_000u16..8_000u16,
        1u64..200u64,
        any::<bool>(),
    )
        .prop_map(|(user_ix, side, price, size, cancel)| Action {
            user_ix,
            side,
            price,
            size,
            cancel,
        })
}

struct Harness {
    ledger: Ledger,
    engine: MarketEngine,
    market: MarketId,
    users: Vec<UserId>,
    seq: u64,
}

impl Harness {
    fn new() -> Self {
        let ledger = Ledger::new();
        let market = MarketId::new();
        let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
        for user in &users {
            ledger.deposit(*user, 100_000_000).unwrap();
        }
        Self {
            ledger,
            engine: MarketEngine::Book(BookEngine::new(market, 2)),
            market,
            users,
            seq: 1,
        }
    }

    fn total_money(&self) -> Ticks {
        self.ledger.total_user_balance() + self.ledger.pot(self.market)
    }

    /// Submit a funded limit order; returns its ID (terminal or resting).
    fn submit(&mut self, action: &Action) -> OrderId {
        self.seq += 1;
        let user = self.users[action.user_ix];
        let mut order = Order::dummy_limit_for_user(
            user,
            action.side,
            Price::new(action.price).unwrap(),
            action.size,
        );
        order.market_id = self.market;
        order.sequence = self.seq;
        let id = order.id;

        let report = self
            .engine
            .submit(
                &self.ledger,
                order,
                self.seq,
                SelfTradePolicy::Prevent,
                MarketOrderPolicy::PartialOk,
            )
            .expect("funded limit submits never fail");
        assert_ne!(report.order.status, OrderStatus::Rejected);
        id
    }

    fn book(&self) -> &BookEngine {
        match &self.engine {
            MarketEngine::Book(engine) => engine,
            MarketEngine::Amm(_) => unreachable!("harness only builds book engines"),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant 1: total money (balances + pot) is constant under any
    /// sequence of submits and cancels with no deposits or withdrawals.
    #[test]
    fn conservation_under_matching(actions in prop::collection::vec(action_strategy(), 1..50)) {
        let mut harness = Harness::new();
        let initial = harness.total_money();

        let mut to_cancel = Vec::new();
        for action in &actions {
            let id = harness.submit(action);
            if action.cancel {
                to_cancel.push(id);
            }
            prop_assert_eq!(harness.total_money(), initial, "conservation broke on submit");
            harness.ledger.verify_conservation().unwrap();
        }
        // Cancels are idempotent: orders that meanwhile filled no-op.
        for id in to_cancel {
            harness.engine.cancel(&harness.ledger, id).unwrap();
            prop_assert_eq!(harness.total_money(), initial, "conservation broke on cancel");
        }
    }

    /// Invariant 2: after any flow, each user's reservation in the
    /// market equals the sum over their open orders of residual times
    /// reserve price (buy: price; sell: complement).
    #[test]
    fn reservations_match_open_orders(actions in prop::collection::vec(action_strategy(), 1..50)) {
        let mut harness = Harness::new();
        for action in &actions {
            harness.submit(action);
        }

        let mut expected: std::collections::HashMap<UserId, Ticks> = Default::default();
        for ix in 0..2 {
            let book = harness.book().book(ix).unwrap();
            for order in book.all_orders() {
                let price = order.price.unwrap();
                let ticks = match order.side {
                    OrderSide::Buy => price.cost(order.remaining()),
                    OrderSide::Sell => price.sell_collateral(order.remaining()),
                };
                *expected.entry(order.user_id).or_insert(0) += ticks;
            }
        }
        for user in &harness.users {
            let reserved = harness.ledger.reserved_in_market(*user, harness.market);
            let wanted = expected.get(user).copied().unwrap_or(0);
            prop_assert_eq!(reserved, wanted, "user {} reservation mismatch", user);
        }
    }

    /// Invariants 3/4: the book is never crossed after a submit returns.
    #[test]
    fn book_never_crossed_through_engine(actions in prop::collection::vec(action_strategy(), 1..50)) {
        let mut harness = Harness::new();
        for action in &actions {
            harness.submit(action);
            let book = harness.book().book(0).unwrap();
            prop_assert!(!book.is_crossed());
        }
    }

    /// Resolution conservation: resolving and paying out any random
    /// final state moves money between users but never creates or
    /// destroys it, and drains the pot to zero.
    #[test]
    fn resolution_conserves_and_drains_pot(
        actions in prop::collection::vec(action_strategy(), 1..40),
        winner in 0usize..2,
    ) {
        let mut harness = Harness::new();
        for action in &actions {
            harness.submit(action);
        }
        let initial = harness.total_money();

        // Close the book, then pay everyone out.
        harness.engine.cancel_all(&harness.ledger).unwrap();
        let payouts = [
            if winner == 0 { PRICE_SCALE } else { 0 },
            if winner == 1 { PRICE_SCALE } else { 0 },
        ];
        let holders = harness.ledger.holders(harness.market);
        for user in holders {
            harness
                .ledger
                .apply_resolution(harness.market, user, &payouts)
                .unwrap();
        }

        prop_assert_eq!(harness.ledger.pot(harness.market), 0, "pot must drain");
        prop_assert_eq!(harness.total_money(), initial, "resolution created money");
        harness.ledger.verify_conservation().unwrap();
    }
}
