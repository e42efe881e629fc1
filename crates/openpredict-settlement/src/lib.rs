//! # openpredict-settlement
//!
//! Finalisation of resolved markets for the **OpenPredict** engine:
//!
//! - [`Settler`]: pays winning positions and short complements through
//!   the ledger, idempotently per (market, user), and verifies monetary
//!   conservation after every batch
//! - [`AuditLog`]: hash-chained immutable payout records
//! - [`SettlementGuard`]: bounded double-settlement filter
//! - [`SettlementDispatcher`]: fans resolution events out to the task
//!   queue as one idempotent payout task per holder

pub mod audit;
pub mod dispatcher;
pub mod idempotency;
pub mod settler;

pub use audit::{AuditLog, AuditRecord};
pub use dispatcher::{SettlementDispatcher, SettlementTask, SETTLEMENT_TASK};
pub use idempotency::SettlementGuard;
pub use settler::{SettlementSummary, Settler};
