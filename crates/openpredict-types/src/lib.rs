//! # openpredict-types
//!
//! Shared types, errors, and configuration for the **OpenPredict**
//! prediction-market engine.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`MarketId`], [`OrderId`], [`UserId`], [`TradeId`], [`TaskId`]
//! - **Money**: [`Ticks`], [`Price`] on the basis-point grid
//! - **Market model**: [`Market`], [`MarketSpec`], [`MarketKind`], [`EngineKind`], [`MarketState`], [`Resolution`]
//! - **Order model**: [`Order`], [`OrderSide`], [`OrderKind`], [`OrderStatus`]
//! - **Trade model**: [`Trade`]
//! - **Position model**: [`Position`]
//! - **Balance model**: [`BalanceEntry`]
//! - **Events**: [`MarketEvent`], [`EventPayload`]
//! - **Configuration**: [`EngineConfig`] and per-subsystem sections
//! - **Errors**: [`OpenpredictError`] with `OP_ERR_` prefix codes

pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod market;
pub mod money;
pub mod order;
pub mod position;
pub mod trade;

// Re-export all primary types at crate root for ergonomic imports:
//   use openpredict_types::{Order, OrderSide, Trade, Market, ...};

pub use balance::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use market::*;
pub use money::*;
pub use order::*;
pub use position::*;
pub use trade::*;

// Constants are accessed via `openpredict_types::constants::FOO`
// (not re-exported to avoid name collisions).
