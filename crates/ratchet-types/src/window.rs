//! Half-open aggregation windows.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{Timeframe, TypesError};

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl Window {
    /// Creates a window, validating that `start < end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is empty or inverted.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TypesError> {
        if start >= end {
            return Err(TypesError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates the window of `timeframe` starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start` is not on a `timeframe` boundary.
    pub fn aligned(start: DateTime<Utc>, timeframe: Timeframe) -> Result<Self, TypesError> {
        if !timeframe.is_aligned(start) {
            return Err(TypesError::Misaligned { ts: start, timeframe });
        }
        Ok(Self {
            start,
            end: start + timeframe.duration(),
        })
    }

    /// Returns the window length.
    #[must_use]
    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Returns true if `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Start of the final `source`-sized slot inside the window.
    #[must_use]
    pub fn last_slot(&self, source: Timeframe) -> DateTime<Utc> {
        self.end - source.duration()
    }

    /// Returns the window immediately following this one.
    #[must_use]
    pub fn next(&self) -> Self {
        let length = self.length();
        Self {
            start: self.end,
            end: self.end + length,
        }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}
