//! # openpredict-amm
//!
//! Constant-product automated market maker for the **OpenPredict**
//! engine. Pools are binary — two reserves, one per outcome — and share
//! the market abstraction with the order book through the coordinator's
//! dispatch layer.
//!
//! This crate is pure: reserve math and liquidity-share accounting only.
//! Balance movements for swaps live in `openpredict-core` so that both
//! engines settle through the same ledger.

pub mod math;
pub mod pool;

pub use pool::{LiquidityChange, Pool, Quote};
