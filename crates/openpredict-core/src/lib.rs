//! # openpredict-core
//!
//! The stateful heart of the **OpenPredict** engine:
//!
//! - [`Ledger`]: balances, reservations, positions, and the per-market
//!   escrow pot; atomic fill settlement and resolution payouts under the
//!   monetary conservation invariant
//! - [`risk`]: the pure pre-trade gate
//! - [`MarketEngine`]: order book and AMM behind one dispatch surface
//! - [`Coordinator`]: one writer task per market over bounded command
//!   channels, lifecycle transitions, sequenced event publication
//! - [`journal`]: accepted-command journal, checkpoints, crash recovery
//!
//! ## Ownership model
//!
//! Relationships are stable IDs and index maps, never pointer graphs:
//! book and pool state is owned by the market's writer task, balance and
//! position state by the ledger. That keeps every per-market actor
//! trivially movable across threads.

pub mod coordinator;
pub mod engine;
pub mod events;
pub mod journal;
pub mod ledger;
pub mod risk;

pub use coordinator::{CancelReceipt, Coordinator, OrderRequest, SubmitReceipt};
pub use engine::{AmmEngine, BookEngine, CancelReport, ExecutionReport, MarketEngine};
pub use events::EventBus;
pub use journal::{
    Checkpoint, FileJournal, JournalCommand, JournalEntry, JournalStore, MarketCheckpoint,
    MemoryJournal,
};
pub use ledger::{FillFlows, Funding, Ledger, LedgerSnapshot, UserSnapshot};
pub use risk::{check_order, OrderIntent, RiskInputs};
