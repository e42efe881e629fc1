//! # openpredict-book
//!
//! Central limit order book for the **OpenPredict** engine: one book per
//! (market, outcome), price-time priority, continuous matching.
//!
//! This crate is pure — no I/O, no balances, no events. The matcher
//! produces a [`MatchPlan`]; collateral movement and event publication
//! live above, in `openpredict-core`.

pub mod book;
pub mod matcher;
pub mod price_level;

pub use book::OrderBook;
pub use matcher::{commit_plan, plan_match, MatchPlan, PlannedFill};
pub use price_level::PriceLevel;
