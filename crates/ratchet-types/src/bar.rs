//! Raw and derived OHLCV bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Symbol, Timeframe};

/// Where a bar's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Deposited by the ingestion pipeline from a market data provider.
    #[default]
    Ingested,
    /// Computed by ingestion from a formula over other symbols.
    Synthetic,
    /// Rolled up from finer bars by this engine.
    Aggregated,
}

impl Provenance {
    /// Returns the provenance as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::Synthetic => "synthetic",
            Self::Aggregated => "aggregated",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the bar store a task reads its source bars from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BarSource {
    /// Base-timeframe bars written by ingestion.
    #[default]
    Raw,
    /// Bars previously produced by another rollup task.
    Derived,
}

impl BarSource {
    /// Returns the source as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Derived => "derived",
        }
    }
}

impl std::fmt::Display for BarSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique key of a bar among non-deleted rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarKey {
    /// The bar's symbol.
    pub symbol: Symbol,
    /// The bar's timeframe.
    pub timeframe: Timeframe,
    /// Start of the bar's window.
    pub window_start: DateTime<Utc>,
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Symbol the bar belongs to.
    pub symbol: Symbol,
    /// Bar duration.
    pub timeframe: Timeframe,
    /// Start of the bar's window.
    pub window_start: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
    /// Volume-weighted average price, absent when no volume traded.
    #[serde(default)]
    pub volume_weighted_price: Option<f64>,
    /// Number of trades.
    #[serde(default)]
    pub trade_count: u64,
    /// Where the values came from.
    #[serde(default)]
    pub provenance: Provenance,
}

impl Bar {
    /// Creates an ingested bar with no VWAP and no trade count.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub const fn new(
        symbol: Symbol,
        timeframe: Timeframe,
        window_start: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            window_start,
            open,
            high,
            low,
            close,
            volume,
            volume_weighted_price: None,
            trade_count: 0,
            provenance: Provenance::Ingested,
        }
    }

    /// Returns the bar's unique key.
    #[must_use]
    pub fn key(&self) -> BarKey {
        BarKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            window_start: self.window_start,
        }
    }

    /// Returns the price range (high - low).
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Returns true if all prices are finite and `low <= open, close <= high`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close, self.volume];
        prices.iter().all(|p| p.is_finite())
            && self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
            && self.volume >= 0.0
    }
}

/// Confidence tier of a derived bar, derived from source completeness.
///
/// Ordered from worst to best.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Partial coverage with the final slot missing, so the close is stale.
    #[default]
    Degraded,
    /// Partial coverage with the final slot present.
    Good,
    /// Every expected source bar was present.
    Full,
}

impl QualityTier {
    /// Numeric score persisted alongside the tier.
    #[must_use]
    pub const fn score(&self) -> u8 {
        match self {
            Self::Degraded => 0,
            Self::Good => 1,
            Self::Full => 2,
        }
    }

    /// Returns true for tiers counted as poor quality.
    #[must_use]
    pub const fn is_poor(&self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Returns the tier as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Degraded => "degraded",
            Self::Good => "good",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bar produced by rolling up finer bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedBar {
    /// The rolled-up OHLCV values.
    #[serde(flatten)]
    pub bar: Bar,
    /// Number of source bars that were present.
    pub source_count: u32,
    /// Number of source bars a complete window holds.
    pub expected_count: u32,
    /// Confidence tier.
    pub quality: QualityTier,
    /// Numeric form of [`Self::quality`].
    pub quality_score: u8,
    /// Version of the rollup rules that produced the bar.
    pub derivation_version: u32,
    /// Set when the row was retired during a data migration.
    #[serde(default)]
    pub soft_deleted_at: Option<DateTime<Utc>>,
    /// When the row was first written.
    pub created_at: DateTime<Utc>,
    /// When the row's values last changed.
    pub updated_at: DateTime<Utc>,
}

impl DerivedBar {
    /// Returns the bar's unique key.
    #[must_use]
    pub fn key(&self) -> BarKey {
        self.bar.key()
    }

    /// Returns true if the derived content matches `other`, ignoring row
    /// bookkeeping timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.bar == other.bar
            && self.source_count == other.source_count
            && self.expected_count == other.expected_count
            && self.quality == other.quality
            && self.derivation_version == other.derivation_version
    }

    /// Returns true if the row has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.soft_deleted_at.is_some()
    }
}
