//! Pre-trade risk gate.
//!
//! A pure function of its inputs — no I/O, no clocks, no lock
//! acquisition. The caller (the market writer) supplies the user
//! snapshot, market metadata, and the collateral the engine would
//! reserve; the gate returns `Ok` or the **first** failing check:
//!
//! 1. Market exists and is tradable.
//! 2. User permitted for the market (accredited flag honoured).
//! 3. Order size positive; limit price present exactly when required.
//! 4. Current + projected position within the market's per-user cap.
//! 5. Available balance covers the reservation the engine would request.

use openpredict_types::{
    BalanceEntry, Market, OpenpredictError, OrderKind, OrderSide, Price, Result, Ticks,
};

/// Caller-supplied inputs for one admission decision.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs<'a> {
    pub market: &'a Market,
    /// The submitting user's balance.
    pub balance: BalanceEntry,
    /// Signed shares the user already holds on the order's outcome.
    pub current_position: i64,
    /// Whether the identity layer vouches for the user as accredited.
    pub accredited: bool,
}

/// Parameters of the order under admission.
#[derive(Debug, Clone, Copy)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub outcome: usize,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub size: u64,
    /// Collateral the engine would reserve if admitted.
    pub required_collateral: Ticks,
}

/// Run every check in order; return the first failure.
///
/// # Errors
/// Typed rejection for the first failing check.
pub fn check_order(inputs: &RiskInputs<'_>, intent: &OrderIntent) -> Result<()> {
    // 1. Market tradable.
    if !inputs.market.state.is_tradable() {
        return Err(OpenpredictError::MarketNotTradable {
            state: inputs.market.state,
        });
    }

    // 2. Access control.
    if inputs.market.accredited_only && !inputs.accredited {
        return Err(OpenpredictError::NotAccredited);
    }

    // 3. Shape: outcome, size, price.
    inputs.market.check_outcome(intent.outcome)?;
    if intent.size == 0 {
        return Err(OpenpredictError::InvalidOrder {
            reason: "size must be positive".to_string(),
        });
    }
    match (intent.kind, intent.price) {
        (OrderKind::Limit, None) => {
            return Err(OpenpredictError::InvalidOrder {
                reason: "limit orders require a price".to_string(),
            });
        }
        // Price validity itself is enforced by construction of `Price`;
        // a market order may carry one as a slippage bound.
        _ => {}
    }

    // 4. Position cap on the projected magnitude.
    let projected = inputs.current_position + intent.side.sign() * intent.size as i64;
    if projected.unsigned_abs() > inputs.market.position_cap {
        return Err(OpenpredictError::OverLimit {
            projected,
            cap: inputs.market.position_cap,
        });
    }

    // 5. Balance covers the reservation.
    if inputs.balance.available < intent.required_collateral {
        return Err(OpenpredictError::InsufficientFunds {
            needed: intent.required_collateral,
            available: inputs.balance.available,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpredict_types::{EngineKind, Market, MarketSpec, MarketState};

    fn active_market() -> Market {
        let mut market =
            Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook)
                .unwrap();
        market.transition(MarketState::Active, None).unwrap();
        market
    }

    fn intent(size: u64, collateral: Ticks) -> OrderIntent {
        OrderIntent {
            side: OrderSide::Buy,
            outcome: 0,
            kind: OrderKind::Limit,
            price: Some(Price::new(6_000).unwrap()),
            size,
            required_collateral: collateral,
        }
    }

    fn inputs(market: &Market) -> RiskInputs<'_> {
        RiskInputs {
            market,
            balance: BalanceEntry {
                available: 1_000_000,
                reserved: 0,
            },
            current_position: 0,
            accredited: false,
        }
    }

    #[test]
    fn valid_order_passes() {
        let market = active_market();
        assert!(check_order(&inputs(&market), &intent(100, 600_000)).is_ok());
    }

    #[test]
    fn inactive_market_rejected_first() {
        let market =
            Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook)
                .unwrap();
        // Even a zero-size order fails on the market check first.
        let err = check_order(&inputs(&market), &intent(0, 0)).unwrap_err();
        assert!(matches!(err, OpenpredictError::MarketNotTradable { .. }));
    }

    #[test]
    fn accreditation_honoured() {
        let mut market = active_market();
        market.accredited_only = true;

        let err = check_order(&inputs(&market), &intent(10, 60_000)).unwrap_err();
        assert!(matches!(err, OpenpredictError::NotAccredited));

        let mut ok = inputs(&market);
        ok.accredited = true;
        assert!(check_order(&ok, &intent(10, 60_000)).is_ok());
    }

    #[test]
    fn zero_size_rejected() {
        let market = active_market();
        let err = check_order(&inputs(&market), &intent(0, 0)).unwrap_err();
        assert!(matches!(err, OpenpredictError::InvalidOrder { .. }));
    }

    #[test]
    fn limit_without_price_rejected() {
        let market = active_market();
        let mut bad = intent(10, 0);
        bad.price = None;
        let err = check_order(&inputs(&market), &bad).unwrap_err();
        assert!(matches!(err, OpenpredictError::InvalidOrder { .. }));
    }

    #[test]
    fn bad_outcome_rejected() {
        let market = active_market();
        let mut bad = intent(10, 60_000);
        bad.outcome = 5;
        let err = check_order(&inputs(&market), &bad).unwrap_err();
        assert!(matches!(err, OpenpredictError::InvalidOutcome { .. }));
    }

    #[test]
    fn position_cap_counts_projection() {
        let mut market = active_market();
        market.position_cap = 100;

        let mut ctx = inputs(&market);
        ctx.current_position = 60;
        let err = check_order(&ctx, &intent(50, 10)).unwrap_err();
        assert!(matches!(err, OpenpredictError::OverLimit { .. }));

        // Selling down from a long is fine.
        let sell = OrderIntent {
            side: OrderSide::Sell,
            ..intent(50, 10)
        };
        assert!(check_order(&ctx, &sell).is_ok());

        // But a sell that flips past the cap short is not.
        let flip = OrderIntent {
            side: OrderSide::Sell,
            ..intent(170, 10)
        };
        let err = check_order(&ctx, &flip).unwrap_err();
        assert!(matches!(err, OpenpredictError::OverLimit { .. }));
    }

    #[test]
    fn insufficient_balance_rejected_last() {
        let market = active_market();
        let mut ctx = inputs(&market);
        ctx.balance.available = 100;
        let err = check_order(&ctx, &intent(100, 600_000)).unwrap_err();
        assert!(matches!(err, OpenpredictError::InsufficientFunds { .. }));
    }
}
