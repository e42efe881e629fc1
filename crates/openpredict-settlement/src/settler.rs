//! Finalisation of resolved markets.
//!
//! The settler consumes resolutions: for each user holding a position
//! (or leftover order collateral) in the market, it pays the resolved
//! payout vector through the ledger, writes one audit record per payout,
//! and releases whatever was still reserved. Settling is idempotent
//! keyed by (market, user) — re-running a completed settlement is a
//! no-op — and conservation is verified after every batch.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use openpredict_core::Ledger;
use openpredict_types::{
    constants::SETTLEMENT_IDEMPOTENCY_CACHE_SIZE, Market, OpenpredictError, Result, Ticks, UserId,
};

use crate::audit::AuditLog;
use crate::idempotency::SettlementGuard;

/// What one settlement run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementSummary {
    /// Users actually paid this run (skipped users excluded).
    pub users_settled: usize,
    /// Total ticks credited this run.
    pub total_paid: Ticks,
    /// Users skipped because they had already settled.
    pub skipped: usize,
}

/// Settles resolved markets against the ledger.
pub struct Settler {
    ledger: Arc<Ledger>,
    guard: Mutex<SettlementGuard>,
    audit: Mutex<AuditLog>,
}

impl Settler {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            guard: Mutex::new(SettlementGuard::new(SETTLEMENT_IDEMPOTENCY_CACHE_SIZE)),
            audit: Mutex::new(AuditLog::new()),
        }
    }

    /// Settle one user in a resolved market. Returns the ticks paid;
    /// zero when the user had nothing (or already settled).
    ///
    /// # Errors
    /// `NotResolved` for an unresolved market; ledger invariant errors.
    pub fn settle_user(&self, market: &Market, user: UserId) -> Result<Ticks> {
        let resolution = market
            .resolution
            .ok_or(OpenpredictError::NotResolved(market.id))?;
        let payouts = market.payout_vector()?;

        if !self.guard.lock().mark_settled(market.id, user) {
            return Ok(0);
        }

        let paid = self.ledger.apply_resolution(market.id, user, &payouts)?;
        if paid > 0 {
            self.audit.lock().append(market.id, user, paid, resolution);
        }
        Ok(paid)
    }

    /// Settle every holder of a resolved market, in deterministic user
    /// order, then verify conservation.
    ///
    /// # Errors
    /// `NotResolved` for an unresolved market; the first ledger failure;
    /// `ConservationViolation` if the books don't balance afterwards.
    pub fn settle_market(&self, market: &Market) -> Result<SettlementSummary> {
        if market.resolution.is_none() {
            return Err(OpenpredictError::NotResolved(market.id));
        }

        let mut summary = SettlementSummary::default();
        for user in self.ledger.holders(market.id) {
            if self.guard.lock().is_settled(market.id, user) {
                summary.skipped += 1;
                continue;
            }
            let paid = self.settle_user(market, user)?;
            summary.users_settled += 1;
            summary.total_paid += paid;
        }

        self.ledger.verify_conservation().map_err(|err| {
            warn!(market = %market.id, %err, "conservation check failed after settlement");
            err
        })?;

        // The pot must be fully drained once every holder is paid.
        let pot = self.ledger.pot(market.id);
        if pot != 0 {
            return Err(OpenpredictError::ConservationViolation {
                reason: format!("market {} pot holds {pot} after settlement", market.id),
            });
        }

        info!(
            market = %market.id,
            users = summary.users_settled,
            paid = summary.total_paid,
            skipped = summary.skipped,
            "market settled"
        );
        Ok(summary)
    }

    /// Verify the audit chain end to end.
    ///
    /// # Errors
    /// `InvariantViolation` naming the first broken record.
    pub fn verify_audit_chain(&self) -> Result<()> {
        self.audit.lock().verify_chain()
    }

    /// Number of audit records written so far.
    #[must_use]
    pub fn audit_len(&self) -> usize {
        self.audit.lock().len()
    }

    /// Audit records for one market, cloned oldest-first.
    #[must_use]
    pub fn audit_for_market(&self, market: openpredict_types::MarketId) -> Vec<crate::audit::AuditRecord> {
        self.audit
            .lock()
            .for_market(market)
            .into_iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpredict_core::Funding;
    use openpredict_types::{
        EngineKind, MarketId, MarketSpec, MarketState, Price, Resolution,
    };

    fn resolved_market(winner: usize) -> Market {
        let mut market =
            Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook)
                .unwrap();
        market.transition(MarketState::Active, None).unwrap();
        market
            .transition(MarketState::Resolved, Some(Resolution::Outcome(winner)))
            .unwrap();
        market
    }

    fn minted_pair(ledger: &Ledger, market: MarketId, price: u16, size: u64) -> (UserId, UserId) {
        let long = UserId::new();
        let short = UserId::new();
        let price = Price::new(price).unwrap();
        ledger.deposit(long, 1_000_000).unwrap();
        ledger.deposit(short, 1_000_000).unwrap();
        ledger
            .settle_fill(market, 0, long, short, size, price.cost(size), Funding::Available, Funding::Available)
            .unwrap();
        (long, short)
    }

    #[test]
    fn settles_longs_and_shorts() {
        let ledger = Arc::new(Ledger::new());
        let market = resolved_market(0);
        let (long, short) = minted_pair(&ledger, market.id, 6_000, 100);

        let settler = Settler::new(ledger.clone());
        let summary = settler.settle_market(&market).unwrap();

        assert_eq!(summary.users_settled, 2);
        assert_eq!(summary.total_paid, 1_000_000);
        assert_eq!(ledger.balance(long).total(), 1_400_000);
        assert_eq!(ledger.balance(short).total(), 600_000);
        assert_eq!(ledger.pot(market.id), 0);
        settler.verify_audit_chain().unwrap();
        // Only the winning side produced a payout record.
        assert_eq!(settler.audit_len(), 1);
    }

    #[test]
    fn settling_twice_is_a_no_op() {
        let ledger = Arc::new(Ledger::new());
        let market = resolved_market(0);
        let (long, _) = minted_pair(&ledger, market.id, 6_000, 100);

        let settler = Settler::new(ledger.clone());
        settler.settle_market(&market).unwrap();
        let after_first = ledger.balance(long).total();
        let audit_after_first = settler.audit_len();

        let second = settler.settle_market(&market).unwrap();
        assert_eq!(second.users_settled, 0);
        assert_eq!(second.total_paid, 0);
        assert_eq!(second.skipped, 0, "flat users drop out of holders");
        assert_eq!(ledger.balance(long).total(), after_first);
        assert_eq!(settler.audit_len(), audit_after_first);
    }

    #[test]
    fn unresolved_market_rejected() {
        let ledger = Arc::new(Ledger::new());
        let mut market =
            Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook)
                .unwrap();
        market.transition(MarketState::Active, None).unwrap();

        let settler = Settler::new(ledger);
        assert!(matches!(
            settler.settle_market(&market),
            Err(OpenpredictError::NotResolved(_))
        ));
    }

    #[test]
    fn settle_user_skips_already_settled() {
        let ledger = Arc::new(Ledger::new());
        let market = resolved_market(0);
        let (long, _) = minted_pair(&ledger, market.id, 6_000, 100);

        let settler = Settler::new(ledger.clone());
        let paid = settler.settle_user(&market, long).unwrap();
        assert_eq!(paid, 1_000_000);
        let again = settler.settle_user(&market, long).unwrap();
        assert_eq!(again, 0);
    }
}
