//! Signed share positions with cost-basis tracking.
//!
//! A position's `shares` is signed: positive is long, negative is a
//! minted short on the same outcome. `cost_basis` is the total ticks the
//! holder has invested in the position — the purchase cost for longs, the
//! complement-side collateral for shorts — so that, summed across
//! outcomes, it equals the net collateral the user has consumed in the
//! market.

use serde::{Deserialize, Serialize};

use crate::constants::PRICE_SCALE;
use crate::{Price, Ticks};

/// A user's position on one (market, outcome).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Signed share count: positive long, negative short.
    pub shares: i64,
    /// Total ticks invested in the open position.
    pub cost_basis: Ticks,
    /// Realized profit and loss from closed shares and resolutions.
    pub realized_pnl: Ticks,
}

impl Position {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.shares == 0
    }

    /// Current value of the open position marked at `mark`, in ticks.
    ///
    /// Longs are worth `mark` per share; shorts are worth the complement
    /// (what it would cost to *not* buy them back is the complement of the
    /// buy-back price).
    #[must_use]
    pub fn mark_value(&self, mark: Price) -> Ticks {
        if self.shares >= 0 {
            i64::from(mark.ticks()) * self.shares
        } else {
            (PRICE_SCALE - i64::from(mark.ticks())) * (-self.shares)
        }
    }

    /// Unrealized PnL at `mark`: mark value minus invested basis.
    /// Recomputed on demand; never stored.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Price) -> Ticks {
        self.mark_value(mark) - self.cost_basis
    }

    /// Remove `count` shares' worth of basis pro-rata. Returns the basis
    /// removed. `count` must not exceed the open share magnitude.
    pub fn remove_basis(&mut self, count: u64) -> Ticks {
        let open = self.shares.unsigned_abs();
        debug_assert!(count <= open, "basis removal exceeds open shares");
        if count == open {
            // Close-out takes the whole basis, avoiding rounding dust.
            let removed = self.cost_basis;
            self.cost_basis = 0;
            return removed;
        }
        let removed =
            (i128::from(self.cost_basis) * i128::from(count) / i128::from(open)) as Ticks;
        self.cost_basis -= removed;
        removed
    }
}
