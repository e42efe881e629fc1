//! Error types for the OpenPredict engine.
//!
//! All errors use the `OP_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors
//! - 2xx: Risk / balance errors
//! - 3xx: Liquidity errors
//! - 4xx: Lifecycle errors
//! - 5xx: Conflict errors
//! - 6xx: Settlement errors
//! - 7xx: Dependency / resilience errors
//! - 8xx: Invariant violations
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{MarketId, MarketState, OrderId, TaskId, Ticks, UserId};

/// Central error enum for all OpenPredict operations.
#[derive(Debug, Error)]
pub enum OpenpredictError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The order failed validation (bad size, missing price, etc.).
    #[error("OP_ERR_100: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// Price is off the legal `[1, 9999]` tick grid.
    #[error("OP_ERR_101: Invalid price tick: {ticks}")]
    InvalidPrice { ticks: u16 },

    /// No market with this ID is registered.
    #[error("OP_ERR_102: Unknown market: {0}")]
    UnknownMarket(MarketId),

    /// No ledger account exists for this user.
    #[error("OP_ERR_103: Unknown user: {0}")]
    UnknownUser(UserId),

    /// The requested order was not found.
    #[error("OP_ERR_104: Order not found: {0}")]
    UnknownOrder(OrderId),

    /// The market spec failed validation (outcome count, bounds, engine).
    #[error("OP_ERR_105: Invalid market spec: {reason}")]
    InvalidMarketSpec { reason: String },

    /// Outcome index out of range for the market.
    #[error("OP_ERR_106: Invalid outcome index {index} (market has {count} outcomes)")]
    InvalidOutcome { index: usize, count: usize },

    // =================================================================
    // Risk / Balance Errors (2xx)
    // =================================================================
    /// Not enough available balance for the required reservation.
    #[error("OP_ERR_200: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Ticks, available: Ticks },

    /// The order would push the position past the market's per-user cap.
    #[error("OP_ERR_201: Position limit exceeded: projected {projected}, cap {cap}")]
    OverLimit { projected: i64, cap: u64 },

    /// The user lacks the accreditation flag this market requires.
    #[error("OP_ERR_202: Market restricted to accredited users")]
    NotAccredited,

    /// Not enough reserved balance to release or consume.
    #[error("OP_ERR_203: Insufficient reserved balance")]
    InsufficientReserved,

    /// A balance operation would produce a negative value.
    #[error("OP_ERR_204: Balance underflow")]
    BalanceUnderflow,

    // =================================================================
    // Liquidity Errors (3xx)
    // =================================================================
    /// Not enough resting liquidity (or pool depth) to fill.
    #[error("OP_ERR_300: Insufficient liquidity")]
    InsufficientLiquidity,

    /// The AMM engine only supports binary markets.
    #[error("OP_ERR_301: AMM unsupported for this market: {reason}")]
    AmmUnsupported { reason: String },

    /// The pool has no liquidity shares for this provider.
    #[error("OP_ERR_302: Unknown liquidity provider: {0}")]
    UnknownProvider(UserId),

    // =================================================================
    // Lifecycle Errors (4xx)
    // =================================================================
    /// Trading was attempted while the market is not active.
    #[error("OP_ERR_400: Market not tradable in state {state}")]
    MarketNotTradable { state: MarketState },

    /// Requested lifecycle transition is not permitted.
    #[error("OP_ERR_401: Invalid transition {from} -> {to}")]
    InvalidTransition { from: MarketState, to: MarketState },

    /// The market has already been resolved.
    #[error("OP_ERR_402: Market already resolved: {0}")]
    AlreadyResolved(MarketId),

    /// Resolution was requested without (or with a malformed) outcome value.
    #[error("OP_ERR_403: Invalid resolution: {reason}")]
    InvalidResolution { reason: String },

    // =================================================================
    // Conflict Errors (5xx)
    // =================================================================
    /// An order with this ID already rests in the book.
    #[error("OP_ERR_500: Order already exists: {0}")]
    DuplicateOrder(OrderId),

    // =================================================================
    // Settlement Errors (6xx)
    // =================================================================
    /// Settlement was attempted on an unresolved market.
    #[error("OP_ERR_600: Market not resolved: {0}")]
    NotResolved(MarketId),

    /// Settlement of a market failed.
    #[error("OP_ERR_601: Settlement failed: {reason}")]
    SettlementFailed { reason: String },

    // =================================================================
    // Dependency / Resilience Errors (7xx)
    // =================================================================
    /// A circuit breaker is open; the call was short-circuited.
    #[error("OP_ERR_700: Circuit '{name}' is open")]
    CircuitOpen { name: String },

    /// A guarded call exceeded its timeout.
    #[error("OP_ERR_701: Call through '{name}' timed out after {ms}ms")]
    CallTimeout { name: String, ms: u64 },

    /// The underlying dependency returned an error.
    #[error("OP_ERR_702: Dependency '{name}' failed: {reason}")]
    DependencyFailed { name: String, reason: String },

    /// The market writer's command queue stayed full past the deadline.
    #[error("OP_ERR_703: Market busy: {0}")]
    MarketBusy(MarketId),

    /// The task queue is at capacity.
    #[error("OP_ERR_704: Task queue full")]
    QueueFull,

    /// No task with this ID is queued (or it already started running).
    #[error("OP_ERR_705: Task not cancellable: {0}")]
    TaskNotCancellable(TaskId),

    /// No handler is registered under this name.
    #[error("OP_ERR_706: No task handler registered for '{name}'")]
    UnknownHandler { name: String },

    /// The caller's deadline elapsed before the operation completed.
    #[error("OP_ERR_707: Deadline exceeded")]
    DeadlineExceeded,

    // =================================================================
    // Invariant Violations (8xx)
    // =================================================================
    /// Monetary conservation would be violated — critical safety alert.
    #[error("OP_ERR_800: Conservation violation: {reason}")]
    ConservationViolation { reason: String },

    /// Some other internal invariant would be violated.
    #[error("OP_ERR_801: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("OP_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("OP_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("OP_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (journal, checkpoint files).
    #[error("OP_ERR_903: I/O error: {0}")]
    Io(String),

    /// The request was cancelled by the caller.
    #[error("OP_ERR_904: Cancelled")]
    Cancelled,
}

impl OpenpredictError {
    /// Whether this error marks a retriable dependency fault rather than a
    /// caller mistake. The task queue uses this to decide between retry
    /// and dead-letter.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::CallTimeout { .. }
                | Self::DependencyFailed { .. }
                | Self::MarketBusy(_)
                | Self::Io(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OpenpredictError>;

impl From<std::io::Error> for OpenpredictError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
