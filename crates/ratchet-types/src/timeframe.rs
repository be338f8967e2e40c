//! Bar timeframe definitions and boundary arithmetic.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Duration of a bar.
///
/// Variants are declared from finest to coarsest so the derived ordering
/// sorts by duration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Timeframe {
    /// 1-minute bars.
    #[default]
    #[serde(rename = "m1")]
    Minute1,
    /// 5-minute bars.
    #[serde(rename = "m5")]
    Minute5,
    /// 15-minute bars.
    #[serde(rename = "m15")]
    Minute15,
    /// 30-minute bars.
    #[serde(rename = "m30")]
    Minute30,
    /// 1-hour bars.
    #[serde(rename = "h1")]
    Hour1,
    /// 4-hour bars.
    #[serde(rename = "h4")]
    Hour4,
    /// Daily bars.
    #[serde(rename = "d1")]
    Day1,
}

impl Timeframe {
    /// Returns the duration in seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        match self {
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Minute30 => 1800,
            Self::Hour1 => 3600,
            Self::Hour4 => 14400,
            Self::Day1 => 86400,
        }
    }

    /// Returns the duration as a [`TimeDelta`].
    #[must_use]
    pub const fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    /// Returns the timeframe as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "m1",
            Self::Minute5 => "m5",
            Self::Minute15 => "m15",
            Self::Minute30 => "m30",
            Self::Hour1 => "h1",
            Self::Hour4 => "h4",
            Self::Day1 => "d1",
        }
    }

    /// Returns all available timeframes, finest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Minute1,
            Self::Minute5,
            Self::Minute15,
            Self::Minute30,
            Self::Hour1,
            Self::Hour4,
            Self::Day1,
        ]
    }

    /// Number of `source` bars that make up one bar of this timeframe.
    ///
    /// Returns `None` unless `self` is strictly coarser than `source` and an
    /// integer multiple of it.
    #[must_use]
    pub const fn ratio_to(&self, source: Self) -> Option<u32> {
        let target = self.seconds();
        let source = source.seconds();
        if target <= source || target % source != 0 {
            return None;
        }
        Some((target / source) as u32)
    }

    /// Floors a timestamp to the start of the enclosing bar.
    ///
    /// Boundaries are aligned to the Unix epoch, which matches calendar
    /// boundaries for every variant since all of them divide a day.
    #[must_use]
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let offset = ts.timestamp().rem_euclid(secs);
        let subsec = TimeDelta::nanoseconds(i64::from(ts.timestamp_subsec_nanos()));
        ts - TimeDelta::seconds(offset) - subsec
    }

    /// Returns the first boundary at or after `ts`.
    #[must_use]
    pub fn ceil(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.floor(ts);
        if floor == ts {
            floor
        } else {
            floor + self.duration()
        }
    }

    /// Returns the first boundary strictly after `ts`.
    #[must_use]
    pub fn next_boundary_after(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.floor(ts) + self.duration()
    }

    /// Returns true if `ts` sits exactly on a boundary.
    #[must_use]
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.floor(ts) == ts
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "m1" | "1m" | "minute" | "minute1" => Ok(Self::Minute1),
            "m5" | "5m" | "minute5" => Ok(Self::Minute5),
            "m15" | "15m" | "minute15" => Ok(Self::Minute15),
            "m30" | "30m" | "minute30" => Ok(Self::Minute30),
            "h1" | "1h" | "60m" | "hour" | "hour1" => Ok(Self::Hour1),
            "h4" | "4h" | "hour4" => Ok(Self::Hour4),
            "d1" | "1d" | "day" | "day1" | "daily" => Ok(Self::Day1),
            _ => Err(TimeframeParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid timeframe string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeframeParseError(String);

impl std::fmt::Display for TimeframeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid timeframe '{}', expected one of: m1, m5, m15, m30, h1, h4, d1",
            self.0
        )
    }
}

impl std::error::Error for TimeframeParseError {}
