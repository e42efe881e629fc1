//! Integer monetary primitives.
//!
//! All prices and balances are integer **ticks**. A share price is an
//! integer in `[1, 9999]` — basis points of the [`PRICE_SCALE`] payout a
//! winning share redeems for. No floating point appears anywhere in
//! matching or settlement.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_PRICE_TICK, MIN_PRICE_TICK, PRICE_SCALE};
use crate::{OpenpredictError, Result};

/// Currency amount in ticks. Signed so that intermediate deltas and
/// realized PnL can be negative; account balances are kept non-negative
/// by the ledger.
pub type Ticks = i64;

/// A validated share price on the basis-point grid.
///
/// `Price(6000)` means the market assigns a 60.00% probability: a buyer
/// pays 6000 ticks per share, and the matching sell reservation is the
/// complement, 4000 ticks per share.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(u16);

impl Price {
    /// Construct a price, rejecting anything off the `[1, 9999]` grid.
    ///
    /// # Errors
    /// Returns `InvalidPrice` for 0 or anything >= `PRICE_SCALE`.
    pub fn new(ticks: u16) -> Result<Self> {
        if !(MIN_PRICE_TICK..=MAX_PRICE_TICK).contains(&ticks) {
            return Err(OpenpredictError::InvalidPrice { ticks });
        }
        Ok(Self(ticks))
    }

    /// Raw tick value.
    #[must_use]
    pub fn ticks(self) -> u16 {
        self.0
    }

    /// The complement price: what the short side of a minted pair pays.
    #[must_use]
    pub fn complement(self) -> Self {
        // PRICE_SCALE - p stays on the grid for p in [1, 9999].
        Self((PRICE_SCALE as u16) - self.0)
    }

    /// Collateral for buying `size` shares at this price. Saturates on
    /// absurd sizes so the risk gate rejects them on balance instead of
    /// wrapping.
    #[must_use]
    pub fn cost(self, size: u64) -> Ticks {
        i64::try_from(u128::from(self.0 as u64) * u128::from(size)).unwrap_or(Ticks::MAX)
    }

    /// Collateral for selling `size` shares at this price
    /// (the complement side of the minted pair).
    #[must_use]
    pub fn sell_collateral(self, size: u64) -> Ticks {
        self.complement().cost(size)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 6000 -> "60.00%"
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Full payout of `size` winning shares.
#[must_use]
pub fn payout(size: u64) -> Ticks {
    PRICE_SCALE * size as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_bounds() {
        assert!(Price::new(0).is_err());
        assert!(Price::new(1).is_ok());
        assert!(Price::new(9999).is_ok());
        assert!(Price::new(10_000).is_err());
        assert!(Price::new(u16::MAX).is_err());
    }

    #[test]
    fn complement_is_involutive() {
        let p = Price::new(6000).unwrap();
        assert_eq!(p.complement().ticks(), 4000);
        assert_eq!(p.complement().complement(), p);
    }

    #[test]
    fn cost_and_sell_collateral_sum_to_payout() {
        let p = Price::new(6000).unwrap();
        assert_eq!(p.cost(100), 600_000);
        assert_eq!(p.sell_collateral(100), 400_000);
        assert_eq!(p.cost(100) + p.sell_collateral(100), payout(100));
    }

    #[test]
    fn display_as_percentage() {
        assert_eq!(Price::new(6000).unwrap().to_string(), "60.00%");
        assert_eq!(Price::new(1).unwrap().to_string(), "0.01%");
        assert_eq!(Price::new(9999).unwrap().to_string(), "99.99%");
    }

    #[test]
    fn serde_is_transparent() {
        let p = Price::new(4250).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "4250");
        let back: Price = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
