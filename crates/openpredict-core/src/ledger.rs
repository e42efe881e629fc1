//! The authoritative money and position ledger.
//!
//! Balances have two components per user:
//! - **available**: usable for new orders or withdrawal
//! - **reserved**: collateral locked by live orders, tracked per market
//!
//! ## Escrow pot
//!
//! Every market carries an escrow **pot**. A trade between a buyer and a
//! seller without inventory *mints* a long/short share pair, and the pot
//! takes in exactly `PRICE_SCALE` ticks per minted share: the buyer's
//! cost plus the seller's complement-side collateral. A trade that closes
//! existing inventory moves money the other way: a closing seller
//! receives the buyer's payment, a buyer closing a short redeems
//! `PRICE_SCALE` per share from the pot. Resolution pays longs
//! `payout` and shorts `PRICE_SCALE - payout` per share, draining the
//! pot to exactly zero.
//!
//! The consequence is the conservation invariant: the sum of all user
//! balances plus all pots changes only through explicit deposits and
//! withdrawals — never through matching, swaps, or settlement.
//!
//! Every mutating call validates first and mutates second under one lock,
//! so it either commits all effects or leaves state untouched.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use openpredict_types::{
    constants::PRICE_SCALE, BalanceEntry, MarketId, OpenpredictError, Position, Result, Ticks,
    UserId,
};

/// Where a settling party's money is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    /// Consume previously reserved order collateral (book path).
    Reserved,
    /// Debit the available balance directly (AMM swap path).
    Available,
}

/// Money movements a fill produced, reported back so the engine can
/// release any excess order reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillFlows {
    /// Ticks consumed from the buyer.
    pub buyer_paid: Ticks,
    /// Pot redemption credited to the buyer for closed shorts.
    pub buyer_unmint_credit: Ticks,
    /// Buyer's payment forwarded to the seller for closed longs.
    pub seller_proceeds: Ticks,
    /// Complement-side collateral consumed from the seller for minted
    /// shares. Anything the seller had reserved beyond this is excess.
    pub seller_collateral_consumed: Ticks,
}

/// A user's full ledger view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub balance: BalanceEntry,
    /// (market, outcome, position) for every non-flat position.
    pub positions: Vec<(MarketId, usize, Position)>,
}

/// Serializable ledger state, used by checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub accounts: Vec<(UserId, BalanceEntry)>,
    pub market_reserved: Vec<(UserId, MarketId, Ticks)>,
    pub positions: Vec<(UserId, MarketId, usize, Position)>,
    pub pots: Vec<(MarketId, Ticks)>,
    pub net_deposits: Ticks,
}

#[derive(Debug, Default)]
struct LedgerInner {
    accounts: HashMap<UserId, BalanceEntry>,
    /// Reserved collateral attributed per (user, market); the per-user
    /// sum equals `accounts[user].reserved`.
    market_reserved: HashMap<(UserId, MarketId), Ticks>,
    /// Signed positions keyed by (user, market), then outcome index.
    positions: HashMap<(UserId, MarketId), BTreeMap<usize, Position>>,
    /// Escrow pot per market backing minted share pairs.
    pots: HashMap<MarketId, Ticks>,
    /// Deposits minus withdrawals since genesis.
    net_deposits: Ticks,
}

/// The ledger. All compound updates run under one internal lock, so each
/// operation is atomic and short.
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =================================================================
    // Deposits / withdrawals
    // =================================================================

    /// Credit `amount` to the user's available balance, creating the
    /// account on first use.
    ///
    /// # Errors
    /// `InvalidOrder` if the amount is not positive.
    pub fn deposit(&self, user: UserId, amount: Ticks) -> Result<()> {
        if amount <= 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "deposit amount must be positive".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        inner.accounts.entry(user).or_default().available += amount;
        inner.net_deposits += amount;
        debug!(%user, amount, "deposit");
        Ok(())
    }

    /// Debit `amount` from the user's available balance.
    ///
    /// # Errors
    /// `UnknownUser` or `InsufficientFunds`.
    pub fn withdraw(&self, user: UserId, amount: Ticks) -> Result<()> {
        if amount <= 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "withdraw amount must be positive".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let entry = inner
            .accounts
            .get_mut(&user)
            .ok_or(OpenpredictError::UnknownUser(user))?;
        if entry.available < amount {
            return Err(OpenpredictError::InsufficientFunds {
                needed: amount,
                available: entry.available,
            });
        }
        entry.available -= amount;
        inner.net_deposits -= amount;
        debug!(%user, amount, "withdraw");
        Ok(())
    }

    /// Move available balance between two users (liquidity funding).
    ///
    /// # Errors
    /// `UnknownUser` or `InsufficientFunds` on the source side.
    pub fn transfer_available(&self, from: UserId, to: UserId, amount: Ticks) -> Result<()> {
        if amount <= 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "transfer amount must be positive".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let src = inner
            .accounts
            .get_mut(&from)
            .ok_or(OpenpredictError::UnknownUser(from))?;
        if src.available < amount {
            return Err(OpenpredictError::InsufficientFunds {
                needed: amount,
                available: src.available,
            });
        }
        src.available -= amount;
        inner.accounts.entry(to).or_default().available += amount;
        Ok(())
    }

    // =================================================================
    // Reservations
    // =================================================================

    /// Move `amount` from available to reserved, attributed to `market`.
    ///
    /// # Errors
    /// `UnknownUser` or `InsufficientFunds`.
    pub fn reserve(&self, user: UserId, market: MarketId, amount: Ticks) -> Result<()> {
        if amount <= 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "reserve amount must be positive".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let entry = inner
            .accounts
            .get_mut(&user)
            .ok_or(OpenpredictError::UnknownUser(user))?;
        if entry.available < amount {
            return Err(OpenpredictError::InsufficientFunds {
                needed: amount,
                available: entry.available,
            });
        }
        entry.available -= amount;
        entry.reserved += amount;
        *inner.market_reserved.entry((user, market)).or_insert(0) += amount;
        Ok(())
    }

    /// Move `amount` from reserved (attributed to `market`) back to
    /// available. The inverse of [`Ledger::reserve`]. A zero amount is a
    /// no-op so engines can release computed excesses unconditionally.
    ///
    /// # Errors
    /// `InsufficientReserved` if the attribution doesn't cover it.
    pub fn release(&self, user: UserId, market: MarketId, amount: Ticks) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        if amount < 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "release amount must be non-negative".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        inner.release_locked(user, market, amount)
    }

    // =================================================================
    // Trade settlement
    // =================================================================

    /// The atomic monetary core of a fill.
    ///
    /// Applies, in one step: the buyer's payment of `cost`, position
    /// netting on both sides (closing existing inventory before minting
    /// new pairs), pot contributions for minted shares, pot redemptions
    /// for closed shorts, proceeds to a closing seller, and cost-basis /
    /// realized-PnL updates. Validates every movement before mutating.
    ///
    /// `cost` is the total ticks the buyer pays for `size` shares — the
    /// trade-price cost for book fills, the quoted input for AMM fills.
    ///
    /// # Errors
    /// `InsufficientFunds` / `InsufficientReserved` when a party cannot
    /// fund its side; `InvariantViolation` if the pot cannot cover a
    /// redemption (which indicates a bug, not a caller mistake).
    #[allow(clippy::too_many_arguments)]
    pub fn settle_fill(
        &self,
        market: MarketId,
        outcome: usize,
        buyer: UserId,
        seller: UserId,
        size: u64,
        cost: Ticks,
        buyer_funding: Funding,
        seller_funding: Funding,
    ) -> Result<FillFlows> {
        if size == 0 || cost < 0 {
            return Err(OpenpredictError::InvalidOrder {
                reason: "fill must have positive size and non-negative cost".to_string(),
            });
        }
        let q = size as i64;
        let mut inner = self.inner.lock();

        // --- Plan (no mutation) -------------------------------------------
        let buyer_shares = inner.position_shares(buyer, market, outcome);
        let seller_shares = if seller == buyer {
            buyer_shares + q // the buy leg lands before the sell leg
        } else {
            inner.position_shares(seller, market, outcome)
        };

        // Buyer closes shorts first, then opens longs.
        let close_b = (-buyer_shares).clamp(0, q);
        // Seller closes longs first, then mints shorts.
        let close_s = seller_shares.clamp(0, q);
        let mint = q - close_s;

        let cost_close_b = mul_div(cost, close_b, q);
        let cost_close_s = mul_div(cost, close_s, q);
        let cost_mint = cost - cost_close_s;

        let unmint_credit = PRICE_SCALE * close_b;
        // Each minted share is backed by PRICE_SCALE in the pot; the
        // buyer's share of it is cost_mint, the seller funds the rest.
        let seller_need = PRICE_SCALE * mint - cost_mint;
        if seller_need < 0 {
            return Err(OpenpredictError::InvariantViolation {
                reason: format!("fill cost {cost} exceeds full payout for {mint} minted shares"),
            });
        }

        if seller == buyer && buyer_funding == seller_funding {
            // Self-trade with both legs on one funding source: check the
            // combined draw, not each leg in isolation.
            inner.check_funding(buyer, market, buyer_funding, cost + seller_need)?;
        } else {
            inner.check_funding(buyer, market, buyer_funding, cost)?;
            inner.check_funding(seller, market, seller_funding, seller_need)?;
        }

        let pot = inner.pots.get(&market).copied().unwrap_or(0);
        let pot_after = pot + cost_mint + seller_need - unmint_credit;
        if pot_after < 0 {
            error!(%market, pot, unmint_credit, "pot cannot cover short redemption");
            return Err(OpenpredictError::InvariantViolation {
                reason: format!("market {market} pot {pot} cannot cover redemption"),
            });
        }

        // --- Commit -------------------------------------------------------
        inner.consume_funding(buyer, market, buyer_funding, cost);
        inner.consume_funding(seller, market, seller_funding, seller_need);
        inner.credit_available(buyer, unmint_credit);
        inner.credit_available(seller, cost_close_s);
        *inner.pots.entry(market).or_insert(0) = pot_after;

        // Buyer position: close shorts, then open longs.
        {
            let pos = inner.position_mut(buyer, market, outcome);
            if close_b > 0 {
                let removed = pos.remove_basis(close_b as u64);
                pos.shares += close_b;
                pos.realized_pnl += (PRICE_SCALE * close_b - cost_close_b) - removed;
            }
            let open_b = q - close_b;
            if open_b > 0 {
                pos.shares += open_b;
                pos.cost_basis += cost - cost_close_b;
            }
        }
        // Seller position: close longs, then mint shorts.
        {
            let pos = inner.position_mut(seller, market, outcome);
            if close_s > 0 {
                let removed = pos.remove_basis(close_s as u64);
                pos.shares -= close_s;
                pos.realized_pnl += cost_close_s - removed;
            }
            if mint > 0 {
                pos.shares -= mint;
                pos.cost_basis += seller_need;
            }
        }

        debug_assert!(inner.conservation_holds(), "conservation broken by fill");
        Ok(FillFlows {
            buyer_paid: cost,
            buyer_unmint_credit: unmint_credit,
            seller_proceeds: cost_close_s,
            seller_collateral_consumed: seller_need,
        })
    }

    // =================================================================
    // Resolution
    // =================================================================

    /// Pay out one user's positions in a resolved market and release any
    /// collateral still reserved there. `payouts[i]` is the per-share
    /// payout for outcome `i` in `[0, PRICE_SCALE]`; shorts receive the
    /// complement. Returns the total ticks credited.
    ///
    /// Naturally idempotent: a second call finds flat positions and no
    /// remaining reservation, and credits nothing.
    ///
    /// # Errors
    /// `InvariantViolation` if the pot cannot cover the payout.
    pub fn apply_resolution(
        &self,
        market: MarketId,
        user: UserId,
        payouts: &[Ticks],
    ) -> Result<Ticks> {
        let mut inner = self.inner.lock();

        let mut credit: Ticks = 0;
        let mut settled: Vec<(usize, Ticks, Ticks)> = Vec::new();
        if let Some(positions) = inner.positions.get(&(user, market)) {
            for (&outcome, pos) in positions {
                if pos.is_flat() {
                    continue;
                }
                let per_share = payouts.get(outcome).copied().unwrap_or(0);
                let amount = if pos.shares > 0 {
                    per_share * pos.shares
                } else {
                    (PRICE_SCALE - per_share) * (-pos.shares)
                };
                credit += amount;
                settled.push((outcome, amount, pos.cost_basis));
            }
        }

        let pot = inner.pots.get(&market).copied().unwrap_or(0);
        if credit > pot {
            error!(%market, %user, credit, pot, "pot cannot cover resolution payout");
            return Err(OpenpredictError::InvariantViolation {
                reason: format!("market {market} pot {pot} cannot pay {credit}"),
            });
        }

        if credit > 0 {
            *inner.pots.entry(market).or_insert(0) -= credit;
            inner.credit_available(user, credit);
        }
        // Every position closes at resolution, including worthless ones.
        for (outcome, amount, basis) in settled {
            let pos = inner.position_mut(user, market, outcome);
            pos.realized_pnl += amount - basis;
            pos.shares = 0;
            pos.cost_basis = 0;
        }

        // Zero any leftover reservation for this market.
        let leftover = inner
            .market_reserved
            .get(&(user, market))
            .copied()
            .unwrap_or(0);
        if leftover > 0 {
            inner.release_locked(user, market, leftover)?;
        }

        debug_assert!(inner.conservation_holds(), "conservation broken by payout");
        Ok(credit)
    }

    /// Users with a non-flat position or a live reservation in a market.
    /// Sorted by user ID so settlement order is deterministic.
    #[must_use]
    pub fn holders(&self, market: MarketId) -> Vec<UserId> {
        let inner = self.inner.lock();
        let mut users: Vec<UserId> = inner
            .positions
            .iter()
            .filter(|((_, m), positions)| *m == market && positions.values().any(|p| !p.is_flat()))
            .map(|((u, _), _)| *u)
            .chain(
                inner
                    .market_reserved
                    .iter()
                    .filter(|((_, m), amount)| *m == market && **amount > 0)
                    .map(|((u, _), _)| *u),
            )
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Balance entry for a user; zero for unknown accounts.
    #[must_use]
    pub fn balance(&self, user: UserId) -> BalanceEntry {
        self.inner
            .lock()
            .accounts
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    /// Signed share count on one (user, market, outcome).
    #[must_use]
    pub fn position_shares(&self, user: UserId, market: MarketId, outcome: usize) -> i64 {
        self.inner.lock().position_shares(user, market, outcome)
    }

    /// Full position record on one (user, market, outcome).
    #[must_use]
    pub fn position(&self, user: UserId, market: MarketId, outcome: usize) -> Position {
        self.inner
            .lock()
            .positions
            .get(&(user, market))
            .and_then(|m| m.get(&outcome))
            .copied()
            .unwrap_or_default()
    }

    /// Collateral currently reserved by a user in one market.
    #[must_use]
    pub fn reserved_in_market(&self, user: UserId, market: MarketId) -> Ticks {
        self.inner
            .lock()
            .market_reserved
            .get(&(user, market))
            .copied()
            .unwrap_or(0)
    }

    /// A market's escrow pot.
    #[must_use]
    pub fn pot(&self, market: MarketId) -> Ticks {
        self.inner.lock().pots.get(&market).copied().unwrap_or(0)
    }

    /// Full view of one user.
    ///
    /// # Errors
    /// `UnknownUser` if no account exists.
    pub fn snapshot(&self, user: UserId) -> Result<UserSnapshot> {
        let inner = self.inner.lock();
        let balance = *inner
            .accounts
            .get(&user)
            .ok_or(OpenpredictError::UnknownUser(user))?;
        let mut positions: Vec<(MarketId, usize, Position)> = inner
            .positions
            .iter()
            .filter(|((u, _), _)| *u == user)
            .flat_map(|((_, m), outcomes)| {
                outcomes
                    .iter()
                    .filter(|(_, p)| !p.is_flat())
                    .map(move |(ix, p)| (*m, *ix, *p))
            })
            .collect();
        positions.sort_by_key(|(m, ix, _)| (*m, *ix));
        Ok(UserSnapshot {
            user_id: user,
            balance,
            positions,
        })
    }

    /// Sum of all user balances (available + reserved), excluding pots.
    #[must_use]
    pub fn total_user_balance(&self) -> Ticks {
        self.inner
            .lock()
            .accounts
            .values()
            .map(BalanceEntry::total)
            .sum()
    }

    /// Verify conservation: user balances + pots == deposits - withdrawals.
    ///
    /// # Errors
    /// `ConservationViolation` describing the imbalance.
    pub fn verify_conservation(&self) -> Result<()> {
        let inner = self.inner.lock();
        let users: Ticks = inner.accounts.values().map(BalanceEntry::total).sum();
        let pots: Ticks = inner.pots.values().sum();
        if users + pots != inner.net_deposits {
            return Err(OpenpredictError::ConservationViolation {
                reason: format!(
                    "balances {users} + pots {pots} != net deposits {}",
                    inner.net_deposits
                ),
            });
        }
        Ok(())
    }

    // =================================================================
    // Checkpointing
    // =================================================================

    /// Serializable copy of the full ledger state.
    #[must_use]
    pub fn to_snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.lock();
        LedgerSnapshot {
            accounts: inner.accounts.iter().map(|(u, b)| (*u, *b)).collect(),
            market_reserved: inner
                .market_reserved
                .iter()
                .map(|((u, m), t)| (*u, *m, *t))
                .collect(),
            positions: inner
                .positions
                .iter()
                .flat_map(|((u, m), outcomes)| {
                    outcomes.iter().map(move |(ix, p)| (*u, *m, *ix, *p))
                })
                .collect(),
            pots: inner.pots.iter().map(|(m, t)| (*m, *t)).collect(),
            net_deposits: inner.net_deposits,
        }
    }

    /// Rebuild a ledger from a checkpoint snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        let mut inner = LedgerInner {
            net_deposits: snapshot.net_deposits,
            ..LedgerInner::default()
        };
        for (u, b) in &snapshot.accounts {
            inner.accounts.insert(*u, *b);
        }
        for (u, m, t) in &snapshot.market_reserved {
            inner.market_reserved.insert((*u, *m), *t);
        }
        for (u, m, ix, p) in &snapshot.positions {
            inner
                .positions
                .entry((*u, *m))
                .or_default()
                .insert(*ix, *p);
        }
        for (m, t) in &snapshot.pots {
            inner.pots.insert(*m, *t);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl LedgerInner {
    fn position_shares(&self, user: UserId, market: MarketId, outcome: usize) -> i64 {
        self.positions
            .get(&(user, market))
            .and_then(|m| m.get(&outcome))
            .map_or(0, |p| p.shares)
    }

    fn position_mut(&mut self, user: UserId, market: MarketId, outcome: usize) -> &mut Position {
        self.positions
            .entry((user, market))
            .or_default()
            .entry(outcome)
            .or_default()
    }

    fn credit_available(&mut self, user: UserId, amount: Ticks) {
        if amount > 0 {
            self.accounts.entry(user).or_default().available += amount;
        }
    }

    fn check_funding(
        &self,
        user: UserId,
        market: MarketId,
        funding: Funding,
        amount: Ticks,
    ) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let entry = self
            .accounts
            .get(&user)
            .ok_or(OpenpredictError::UnknownUser(user))?;
        match funding {
            Funding::Reserved => {
                let attributed = self
                    .market_reserved
                    .get(&(user, market))
                    .copied()
                    .unwrap_or(0);
                if entry.reserved < amount || attributed < amount {
                    return Err(OpenpredictError::InsufficientReserved);
                }
            }
            Funding::Available => {
                if entry.available < amount {
                    return Err(OpenpredictError::InsufficientFunds {
                        needed: amount,
                        available: entry.available,
                    });
                }
            }
        }
        Ok(())
    }

    fn consume_funding(&mut self, user: UserId, market: MarketId, funding: Funding, amount: Ticks) {
        if amount == 0 {
            return;
        }
        let entry = self.accounts.entry(user).or_default();
        match funding {
            Funding::Reserved => {
                entry.reserved -= amount;
                *self.market_reserved.entry((user, market)).or_insert(0) -= amount;
            }
            Funding::Available => {
                entry.available -= amount;
            }
        }
    }

    fn release_locked(&mut self, user: UserId, market: MarketId, amount: Ticks) -> Result<()> {
        let attributed = self
            .market_reserved
            .get_mut(&(user, market))
            .filter(|t| **t >= amount)
            .ok_or(OpenpredictError::InsufficientReserved)?;
        let entry = self
            .accounts
            .get_mut(&user)
            .ok_or(OpenpredictError::UnknownUser(user))?;
        if entry.reserved < amount {
            return Err(OpenpredictError::InsufficientReserved);
        }
        *attributed -= amount;
        entry.reserved -= amount;
        entry.available += amount;
        Ok(())
    }

    fn conservation_holds(&self) -> bool {
        let users: Ticks = self.accounts.values().map(BalanceEntry::total).sum();
        let pots: Ticks = self.pots.values().sum();
        users + pots == self.net_deposits
    }
}

/// `value * num / den` in i128, for pro-rata splits.
fn mul_div(value: Ticks, num: i64, den: i64) -> Ticks {
    debug_assert!(den > 0);
    (i128::from(value) * i128::from(num) / i128::from(den)) as Ticks
}
