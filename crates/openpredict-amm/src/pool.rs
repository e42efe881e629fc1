//! Constant-product pool for a binary market.
//!
//! The pool holds one reserve per outcome, `(r_yes, r_no)`, with
//! invariant `k = r_yes * r_no`. Buying `size` shares of outcome `i`
//! removes them from `r_i` and requires an input `x` satisfying
//!
//! ```text
//! (r_i - size) * (r_j + x * (1 - fee)) >= k
//! ```
//!
//! solved in integer arithmetic with pool-favourable rounding: required
//! inputs round **up**, sale proceeds round **down**. The full input
//! (fee included) joins the opposing reserve, so with a non-zero fee the
//! invariant strictly grows on every swap.
//!
//! Liquidity shares: the first provider seeds the reserve pair and
//! receives `isqrt(r_yes * r_no)` shares; later providers deposit
//! proportionally to current reserves and mint pro-rata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use openpredict_types::{
    constants::MAX_PRICE_TICK, MarketId, OpenpredictError, Price, Result, Ticks, UserId,
};

use crate::math::{div_ceil, isqrt};

/// Basis-point denominator for the swap fee.
const BPS: u128 = 10_000;

/// A priced swap, before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Shares bought from (or sold to) the pool.
    pub size: u64,
    /// Ticks the user pays (buy) or receives (sell), fee included.
    pub amount: Ticks,
    /// Per-share price clamped onto the tick grid, for trade records.
    pub effective_price: Price,
}

/// Outcome of a liquidity operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityChange {
    /// Liquidity shares minted (add) or burned (remove).
    pub shares: u64,
    /// Ticks the provider paid in (add) or receives back (remove).
    pub amount: Ticks,
}

/// Constant-product pool state for one binary market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub market_id: MarketId,
    /// Swap fee in basis points, charged on the input side.
    pub fee_bps: u32,
    /// One reserve per outcome.
    reserves: [u64; 2],
    /// Total liquidity shares outstanding.
    total_shares: u64,
    /// Per-provider share counts.
    providers: HashMap<UserId, u64>,
}

impl Pool {
    /// Create an empty (unfunded) pool. The fee is clamped below 100%
    /// so the basis-point arithmetic stays well-defined.
    #[must_use]
    pub fn new(market_id: MarketId, fee_bps: u32) -> Self {
        Self {
            market_id,
            fee_bps: fee_bps.min(BPS as u32 - 1),
            reserves: [0, 0],
            total_shares: 0,
            providers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn reserves(&self) -> [u64; 2] {
        self.reserves
    }

    #[must_use]
    pub fn invariant(&self) -> u128 {
        u128::from(self.reserves[0]) * u128::from(self.reserves[1])
    }

    #[must_use]
    pub fn total_shares(&self) -> u64 {
        self.total_shares
    }

    #[must_use]
    pub fn provider_shares(&self, provider: &UserId) -> u64 {
        self.providers.get(provider).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_funded(&self) -> bool {
        self.reserves[0] > 0 && self.reserves[1] > 0
    }

    fn check_outcome(outcome: usize) -> Result<()> {
        if outcome > 1 {
            return Err(OpenpredictError::InvalidOutcome {
                index: outcome,
                count: 2,
            });
        }
        Ok(())
    }

    /// Marginal probability of outcome `i` implied by the reserves:
    /// `r_j / (r_i + r_j)`, clamped onto the price grid.
    #[must_use]
    pub fn spot_price(&self, outcome: usize) -> Option<Price> {
        if !self.is_funded() || outcome > 1 {
            return None;
        }
        let r_i = u128::from(self.reserves[outcome]);
        let r_j = u128::from(self.reserves[1 - outcome]);
        let scale = u128::from(openpredict_types::constants::PRICE_SCALE as u64);
        let ticks = (r_j * scale / (r_i + r_j)) as u16;
        Some(clamp_price(ticks))
    }

    // =================================================================
    // Quoting
    // =================================================================

    /// Quote buying `size` shares of `outcome` from the pool.
    ///
    /// # Errors
    /// `InsufficientLiquidity` when the pool is unfunded or `size` would
    /// drain the outcome reserve.
    pub fn quote_buy(&self, outcome: usize, size: u64) -> Result<Quote> {
        Self::check_outcome(outcome)?;
        if size == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "swap size must be positive".to_string(),
            });
        }
        let r_i = self.reserves[outcome];
        let r_j = self.reserves[1 - outcome];
        if !self.is_funded() || size >= r_i {
            return Err(OpenpredictError::InsufficientLiquidity);
        }

        let k = self.invariant();
        // Net input that must reach the opposing reserve, rounded up.
        let new_r_j = div_ceil(k, u128::from(r_i - size));
        let net_in = new_r_j - u128::from(r_j);
        // Gross the fee up on the input side, rounded up again.
        let required = div_ceil(net_in * BPS, BPS - u128::from(self.fee_bps));

        let amount = Ticks::try_from(required).map_err(|_| {
            OpenpredictError::InvariantViolation {
                reason: "swap input overflows tick range".to_string(),
            }
        })?;
        Ok(Quote {
            size,
            amount,
            effective_price: per_share_price(required, size),
        })
    }

    /// Quote selling `size` shares of `outcome` back to the pool.
    ///
    /// # Errors
    /// `InsufficientLiquidity` when the pool is unfunded or the proceeds
    /// round to zero.
    pub fn quote_sell(&self, outcome: usize, size: u64) -> Result<Quote> {
        Self::check_outcome(outcome)?;
        if size == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "swap size must be positive".to_string(),
            });
        }
        if !self.is_funded() {
            return Err(OpenpredictError::InsufficientLiquidity);
        }
        let r_i = u128::from(self.reserves[outcome]);
        let r_j = u128::from(self.reserves[1 - outcome]);

        let k = self.invariant();
        // Gross proceeds out of the opposing reserve, rounded down.
        let kept_r_j = div_ceil(k, r_i + u128::from(size));
        let gross_out = r_j.saturating_sub(kept_r_j);
        // Fee on the output side, rounded down.
        let net_out = gross_out * (BPS - u128::from(self.fee_bps)) / BPS;
        if net_out == 0 || net_out >= r_j {
            return Err(OpenpredictError::InsufficientLiquidity);
        }

        Ok(Quote {
            size,
            amount: net_out as Ticks,
            effective_price: per_share_price(net_out, size),
        })
    }

    // =================================================================
    // Swaps
    // =================================================================

    /// Execute a buy at a fresh quote, updating reserves.
    ///
    /// Returns the quote actually applied. Reserve updates and the
    /// caller's balance movements must land in the same atomic step; the
    /// market writer guarantees that by owning both.
    pub fn swap_buy(&mut self, outcome: usize, size: u64) -> Result<Quote> {
        let quote = self.quote_buy(outcome, size)?;
        self.reserves[outcome] -= size;
        // The full input joins the reserve: with a fee the invariant
        // strictly grows.
        self.reserves[1 - outcome] = self.reserves[1 - outcome]
            .checked_add(quote.amount as u64)
            .ok_or_else(|| OpenpredictError::InvariantViolation {
                reason: "reserve overflow on swap".to_string(),
            })?;
        Ok(quote)
    }

    /// Execute a sell at a fresh quote, updating reserves.
    pub fn swap_sell(&mut self, outcome: usize, size: u64) -> Result<Quote> {
        let quote = self.quote_sell(outcome, size)?;
        self.reserves[outcome] = self.reserves[outcome]
            .checked_add(size)
            .ok_or_else(|| OpenpredictError::InvariantViolation {
                reason: "reserve overflow on swap".to_string(),
            })?;
        // Only the net proceeds leave the reserve; the fee stays behind.
        self.reserves[1 - outcome] -= quote.amount as u64;
        Ok(quote)
    }

    // =================================================================
    // Liquidity
    // =================================================================

    /// Seed an empty pool. The first provider sets the initial ratio and
    /// receives `isqrt(r_yes * r_no)` shares.
    ///
    /// # Errors
    /// `InvalidOrder` when the pool is already funded or a reserve is zero.
    pub fn seed(&mut self, provider: UserId, r_yes: u64, r_no: u64) -> Result<LiquidityChange> {
        if self.total_shares != 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "pool already seeded".to_string(),
            });
        }
        if r_yes == 0 || r_no == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "initial reserves must be positive".to_string(),
            });
        }
        self.reserves = [r_yes, r_no];
        let minted = isqrt(u128::from(r_yes) * u128::from(r_no)) as u64;
        self.total_shares = minted;
        self.providers.insert(provider, minted);
        Ok(LiquidityChange {
            shares: minted,
            amount: r_yes as Ticks + r_no as Ticks,
        })
    }

    /// Price an [`Pool::add_liquidity`] without mutating the pool, so the
    /// caller can move the provider's funds first.
    ///
    /// # Errors
    /// Same conditions as [`Pool::add_liquidity`].
    pub fn preview_add(&self, amount: u64) -> Result<LiquidityChange> {
        if self.total_shares == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "seed the pool before adding liquidity".to_string(),
            });
        }
        if amount == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "liquidity amount must be positive".to_string(),
            });
        }
        let value = isqrt(self.invariant());
        let minted = (u128::from(self.total_shares) * u128::from(amount) / value) as u64;
        if minted == 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "liquidity amount too small to mint a share".to_string(),
            });
        }
        let paid: Ticks = self
            .reserves
            .iter()
            .map(|r| (u128::from(*r) * u128::from(amount) / value) as Ticks)
            .sum();
        Ok(LiquidityChange {
            shares: minted,
            amount: paid,
        })
    }

    /// Add liquidity proportional to current reserves. `amount` is
    /// measured in pool value units (the geometric mean of the reserves);
    /// both reserves grow by the same factor and shares mint pro-rata.
    ///
    /// # Errors
    /// `InvalidOrder` on an unfunded pool (use [`Pool::seed`]) or zero amount.
    pub fn add_liquidity(&mut self, provider: UserId, amount: u64) -> Result<LiquidityChange> {
        let change = self.preview_add(amount)?;
        let value = isqrt(self.invariant());
        for r in &mut self.reserves {
            let delta = (u128::from(*r) * u128::from(amount) / value) as u64;
            *r += delta;
        }
        self.total_shares += change.shares;
        *self.providers.entry(provider).or_insert(0) += change.shares;
        Ok(change)
    }

    /// Price a [`Pool::remove_liquidity`] without mutating the pool.
    ///
    /// # Errors
    /// Same conditions as [`Pool::remove_liquidity`].
    pub fn preview_remove(&self, provider: UserId, shares: u64) -> Result<LiquidityChange> {
        let held = self.provider_shares(&provider);
        if held == 0 {
            return Err(OpenpredictError::UnknownProvider(provider));
        }
        if shares == 0 || shares > held {
            return Err(OpenpredictError::InvalidOrder {
                reason: format!("cannot burn {shares} of {held} held shares"),
            });
        }
        let total = u128::from(self.total_shares);
        let returned: Ticks = self
            .reserves
            .iter()
            .map(|r| (u128::from(*r) * u128::from(shares) / total) as Ticks)
            .sum();
        Ok(LiquidityChange {
            shares,
            amount: returned,
        })
    }

    /// Burn `shares` of the provider's liquidity, shrinking both reserves
    /// pro-rata. Rounding is in the pool's favour.
    ///
    /// # Errors
    /// `UnknownProvider` when the provider holds no shares,
    /// `InvalidOrder` when burning more than held.
    pub fn remove_liquidity(&mut self, provider: UserId, shares: u64) -> Result<LiquidityChange> {
        let change = self.preview_remove(provider, shares)?;
        let total = u128::from(self.total_shares);
        for r in &mut self.reserves {
            let delta = (u128::from(*r) * u128::from(shares) / total) as u64;
            *r -= delta;
        }
        let held = self
            .providers
            .get_mut(&provider)
            .expect("preview validated the provider");
        *held -= shares;
        if *held == 0 {
            self.providers.remove(&provider);
        }
        self.total_shares -= shares;
        Ok(change)
    }
}

/// Per-share price of a swap, clamped onto the tick grid for records.
fn per_share_price(amount: u128, size: u64) -> Price {
    let ticks = div_ceil(amount, u128::from(size)).min(u128::from(MAX_PRICE_TICK)) as u16;
    clamp_price(ticks)
}

fn clamp_price(ticks: u16) -> Price {
    Price::new(ticks.clamp(1, MAX_PRICE_TICK)).expect("clamped onto the grid")
}
