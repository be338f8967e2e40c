//! Error types for window aggregation.

use chrono::{DateTime, Utc};
use ratchet_store::StoreError;
use ratchet_types::{Symbol, TypesError};
use thiserror::Error;

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Errors raised while aggregating a window.
#[derive(Error, Debug)]
pub enum AggregateError {
    /// Reading source bars or writing the derived bar failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Window or timeframe arguments were inconsistent.
    #[error(transparent)]
    Types(#[from] TypesError),

    /// A source bar could not be aggregated.
    #[error("Malformed source bar for {symbol} at {window_start}: {reason}")]
    Malformed {
        /// The symbol.
        symbol: Symbol,
        /// Start of the offending source bar.
        window_start: DateTime<Utc>,
        /// What was wrong with it.
        reason: String,
    },
}

impl AggregateError {
    /// Returns true if a later retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Types(_) | Self::Malformed { .. } => false,
        }
    }
}
