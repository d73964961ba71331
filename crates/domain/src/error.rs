//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

/// Errors raised by the backtesting core.
///
/// Configuration and invalid-input variants are raised before any state
/// is mutated, so a failed call leaves the position ledger and the asset
/// ledger unchanged. Over-requests (removing more liquidity or collecting
/// more fees than available) are not errors; they clamp silently.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// Pool or market configuration is missing or inconsistent.
    #[error("market is not configured: {0}")]
    NotConfigured(&'static str),

    /// A token was supplied that does not belong to the pool pair.
    #[error("token {0} is not part of the pool pair")]
    TokenNotInPool(String),

    /// A price or amount that must be strictly positive was not.
    #[error("invalid {what}: {value}")]
    InvalidInput {
        /// Name of the offending parameter.
        what: &'static str,
        /// The rejected value, rendered for diagnostics.
        value: String,
    },

    /// A tick outside the supported range.
    #[error("tick {0} out of range")]
    TickOutOfRange(i32),

    /// A sqrt price X96 outside the supported range.
    #[error("sqrt price x96 {0} out of range")]
    SqrtPriceOutOfRange(String),

    /// A value does not fit into the target numeric type.
    #[error("numeric overflow in {0}")]
    Overflow(&'static str),

    /// Operation on a position key that is not in the ledger.
    #[error("position [{0}, {1}] not found")]
    PositionNotFound(i32, i32),

    /// Transfer-out of a position that already left the wallet.
    #[error("position [{0}, {1}] has already been transferred out")]
    AlreadyTransferred(i32, i32),

    /// Transfer-in of a position that never left the wallet.
    #[error("position [{0}, {1}] has not been transferred out")]
    NotTransferred(i32, i32),

    /// The asset ledger would go negative.
    #[error("insufficient balance of {token}: have {have}, need {need}")]
    InsufficientBalance {
        /// Token whose balance would go negative.
        token: String,
        /// Current balance.
        have: String,
        /// Requested amount.
        need: String,
    },

    /// Market status pushed with a non-increasing timestamp.
    #[error("market status out of order: {current} does not follow {previous}")]
    StatusOutOfOrder {
        /// Timestamp already recorded.
        previous: String,
        /// Timestamp that was rejected.
        current: String,
    },

    /// No external price available for a token when valuing a balance.
    #[error("no external price supplied for token {0}")]
    MissingExternalPrice(String),

    /// A historical data file could not be read.
    #[error("data file {path}: {source}")]
    DataFile {
        /// Path that failed to open or read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A historical data row could not be parsed.
    #[error("malformed data row: {0}")]
    DataFormat(String),
}
