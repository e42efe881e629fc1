//! Balance tracking types for the OpenPredict collateral model.
//!
//! Every user has an `available` balance (usable for new orders or
//! withdrawal) and a `reserved` balance (collateral locked by live orders).
//! Both stay non-negative under every ledger operation.

use serde::{Deserialize, Serialize};

use crate::Ticks;

/// A single user's balance entry, in ticks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    /// Available for new orders / withdrawal.
    pub available: Ticks,
    /// Locked as collateral for live orders.
    pub reserved: Ticks,
}

impl BalanceEntry {
    /// Create a zero balance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total balance (available + reserved).
    #[must_use]
    pub fn total(&self) -> Ticks {
        self.available + self.reserved
    }

    /// Whether this entry has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available == 0 && self.reserved == 0
    }
}
