//! Rows of the external active-symbol registry.

use serde::{Deserialize, Serialize};

use crate::{Symbol, Timeframe};

/// One symbol as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// The symbol.
    pub symbol: Symbol,
    /// Symbol is live.
    pub active: bool,
    /// Symbol is enabled for test coverage only.
    #[serde(default)]
    pub test_active: bool,
    /// Timeframe ingestion deposits raw bars at.
    pub base_timeframe: Timeframe,
}

impl RegistryEntry {
    /// Creates an active entry.
    #[must_use]
    pub const fn active(symbol: Symbol, base_timeframe: Timeframe) -> Self {
        Self {
            symbol,
            active: true,
            test_active: false,
            base_timeframe,
        }
    }

    /// Returns true if the symbol should have rollup tasks.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.active || self.test_active
    }
}
