//! Error types for the core data model.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Timeframe;

/// Result type alias for data model operations.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while constructing core values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Window start is not before its end.
    #[error("Invalid window: {start} >= {end}")]
    InvalidWindow {
        /// The window start.
        start: DateTime<Utc>,
        /// The window end.
        end: DateTime<Utc>,
    },

    /// Timestamp does not sit on a timeframe boundary.
    #[error("Timestamp {ts} is not aligned to {timeframe}")]
    Misaligned {
        /// The offending timestamp.
        ts: DateTime<Utc>,
        /// The timeframe it was checked against.
        timeframe: Timeframe,
    },

    /// Target timeframe is not an integer multiple of the source.
    #[error("Cannot roll {source_tf} bars into {target}")]
    IncompatibleTimeframes {
        /// The source timeframe.
        source_tf: Timeframe,
        /// The target timeframe.
        target: Timeframe,
    },

    /// Symbol is empty or contains whitespace.
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),
}
