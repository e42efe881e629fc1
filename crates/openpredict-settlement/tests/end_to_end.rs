//! Full settlement cycle: trade → resolve → dispatch → payout → audit.

use std::sync::Arc;
use std::time::Duration;

use openpredict_core::{Coordinator, OrderRequest};
use openpredict_resilience::TaskQueue;
use openpredict_settlement::{SettlementDispatcher, Settler};
use openpredict_types::{
    constants::PRICE_SCALE, EngineConfig, EngineKind, MarketId, MarketKind, MarketSpec,
    MarketState, OrderKind, OrderSide, Price, Resolution, ScalarBounds, TaskQueueConfig, UserId,
};

fn limit(market_id: MarketId, user: UserId, side: OrderSide, price: u16, size: u64) -> OrderRequest {
    OrderRequest {
        market_id,
        user_id: user,
        side,
        outcome: 0,
        kind: OrderKind::Limit,
        price: Some(Price::new(price).unwrap()),
        size,
        accredited: false,
        deadline: None,
    }
}

async fn traded_market(coordinator: &Coordinator) -> (MarketId, UserId, UserId) {
    let market_id = coordinator
        .create_market(MarketSpec::dummy_binary(EngineKind::OrderBook))
        .unwrap();
    coordinator
        .transition_market(market_id, MarketState::Active, None)
        .await
        .unwrap();

    let alice = UserId::new();
    let bob = UserId::new();
    coordinator.ledger().deposit(alice, 1_000_000).unwrap();
    coordinator.ledger().deposit(bob, 1_000_000).unwrap();

    coordinator
        .submit_order(limit(market_id, alice, OrderSide::Buy, 6_000, 100))
        .await
        .unwrap();
    coordinator
        .submit_order(limit(market_id, bob, OrderSide::Sell, 6_000, 100))
        .await
        .unwrap();
    (market_id, alice, bob)
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// The task-queue path: resolution fans out one payout task per holder;
/// winners collect the full payout, shorts their complement (zero here),
/// audit records land, and money is conserved.
#[tokio::test]
async fn resolution_settles_through_task_queue() {
    let coordinator = Coordinator::new(EngineConfig::default());
    let settler = Arc::new(Settler::new(coordinator.ledger().clone()));
    let queue = TaskQueue::new(TaskQueueConfig {
        workers: 2,
        ..TaskQueueConfig::default()
    });
    queue.start_workers();
    SettlementDispatcher::start(coordinator.clone(), queue.clone(), settler.clone());

    let (market_id, alice, bob) = traded_market(&coordinator).await;

    coordinator
        .transition_market(market_id, MarketState::Resolved, Some(Resolution::Outcome(0)))
        .await
        .unwrap();

    // One YES share pays PRICE_SCALE ticks: Alice's 100 longs redeem
    // 1_000_000; Bob's shorts redeem nothing on the winning outcome.
    let ledger = coordinator.ledger().clone();
    wait_for(|| ledger.balance(alice).total() == 1_400_000).await;
    assert_eq!(ledger.balance(bob).total(), 600_000);
    assert_eq!(ledger.pot(market_id), 0);
    assert_eq!(ledger.position_shares(alice, market_id, 0), 0);
    assert_eq!(ledger.position_shares(bob, market_id, 0), 0);
    ledger.verify_conservation().unwrap();

    // Exactly one payout was audited (Bob's zero-tick leg writes none).
    wait_for(|| settler.audit_len() == 1).await;
    settler.verify_audit_chain().unwrap();
    let records = settler.audit_for_market(market_id);
    assert_eq!(records[0].user_id, alice);
    assert_eq!(records[0].amount, 1_000_000);

    queue.shutdown();
}

/// Re-running settlement after completion changes nothing.
#[tokio::test]
async fn settlement_is_idempotent() {
    let coordinator = Coordinator::new(EngineConfig::default());
    let settler = Settler::new(coordinator.ledger().clone());

    let (market_id, alice, bob) = traded_market(&coordinator).await;
    let market = coordinator
        .transition_market(market_id, MarketState::Resolved, Some(Resolution::Outcome(0)))
        .await
        .unwrap();

    let first = settler.settle_market(&market).unwrap();
    assert_eq!(first.users_settled, 2);
    assert_eq!(first.total_paid, PRICE_SCALE * 100);
    let alice_after = coordinator.ledger().balance(alice);
    let bob_after = coordinator.ledger().balance(bob);
    let audit_after = settler.audit_len();

    let second = settler.settle_market(&market).unwrap();
    assert_eq!(second.users_settled, 0);
    assert_eq!(second.total_paid, 0);
    assert_eq!(coordinator.ledger().balance(alice), alice_after);
    assert_eq!(coordinator.ledger().balance(bob), bob_after);
    assert_eq!(settler.audit_len(), audit_after);
}

/// Losing-side resolution pays the shorts their complement.
#[tokio::test]
async fn shorts_collect_on_losing_outcome() {
    let coordinator = Coordinator::new(EngineConfig::default());
    let settler = Settler::new(coordinator.ledger().clone());

    let (market_id, alice, bob) = traded_market(&coordinator).await;
    let market = coordinator
        .transition_market(market_id, MarketState::Resolved, Some(Resolution::Outcome(1)))
        .await
        .unwrap();

    settler.settle_market(&market).unwrap();
    let ledger = coordinator.ledger();
    // Alice's longs on the losing outcome expire worthless; Bob's shorts
    // redeem the full payout against his 400_000 collateral.
    assert_eq!(ledger.balance(alice).total(), 400_000);
    assert_eq!(ledger.balance(bob).total(), 1_600_000);
    ledger.verify_conservation().unwrap();
}

/// Scalar market: payouts interpolate linearly between the bounds and
/// both legs of every pair sum to the full payout.
#[tokio::test]
async fn scalar_resolution_interpolates() {
    let coordinator = Coordinator::new(EngineConfig::default());
    let settler = Settler::new(coordinator.ledger().clone());

    let mut spec = MarketSpec::dummy_binary(EngineKind::OrderBook);
    spec.kind = MarketKind::Scalar;
    spec.outcomes = vec!["Over".into(), "Under".into()];
    spec.scalar_bounds = Some(ScalarBounds {
        lower: 0,
        upper: 100,
    });
    let market_id = coordinator.create_market(spec).unwrap();
    coordinator
        .transition_market(market_id, MarketState::Active, None)
        .await
        .unwrap();

    let alice = UserId::new();
    let bob = UserId::new();
    coordinator.ledger().deposit(alice, 1_000_000).unwrap();
    coordinator.ledger().deposit(bob, 1_000_000).unwrap();
    coordinator
        .submit_order(limit(market_id, alice, OrderSide::Buy, 5_000, 100))
        .await
        .unwrap();
    coordinator
        .submit_order(limit(market_id, bob, OrderSide::Sell, 5_000, 100))
        .await
        .unwrap();

    // Resolves at 75 of [0, 100]: longs get 75%, shorts 25%.
    let market = coordinator
        .transition_market(market_id, MarketState::Resolved, Some(Resolution::Value(75)))
        .await
        .unwrap();
    settler.settle_market(&market).unwrap();

    let ledger = coordinator.ledger();
    assert_eq!(ledger.balance(alice).total(), 1_250_000);
    assert_eq!(ledger.balance(bob).total(), 750_000);
    assert_eq!(ledger.pot(market_id), 0);
    ledger.verify_conservation().unwrap();
}
