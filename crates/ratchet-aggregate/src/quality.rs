//! Source completeness grading.

use ratchet_types::{QualityTier, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rules for how many source bars a window needs before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Fraction of the expected source bars a window needs, rounded up.
    #[serde(default = "default_min_fraction")]
    pub min_fraction: f64,
    /// Absolute minimums per target timeframe, overriding the fraction.
    #[serde(default)]
    pub min_counts: BTreeMap<Timeframe, u32>,
}

fn default_min_fraction() -> f64 {
    0.6
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_fraction: default_min_fraction(),
            min_counts: BTreeMap::new(),
        }
    }
}

impl QualityPolicy {
    /// Sets an absolute minimum for one target timeframe.
    #[must_use]
    pub fn with_min_count(mut self, target: Timeframe, count: u32) -> Self {
        self.min_counts.insert(target, count);
        self
    }

    /// Minimum source bars a `target` window expecting `expected` bars needs.
    ///
    /// Always between 1 and `expected`.
    #[must_use]
    pub fn minimum_for(&self, target: Timeframe, expected: u32) -> u32 {
        let minimum = self.min_counts.get(&target).copied().unwrap_or_else(|| {
            // Tolerate float noise such as 5 * 0.6 = 2.9999999999999996.
            let raw = (f64::from(expected) * self.min_fraction - 1e-9).ceil();
            if raw.is_finite() && raw > 0.0 {
                raw as u32
            } else {
                1
            }
        });
        minimum.clamp(1, expected.max(1))
    }

    /// Grades a window, or returns `None` if it has too few source bars to
    /// be stored.
    #[must_use]
    pub fn grade(
        &self,
        target: Timeframe,
        source_count: u32,
        expected: u32,
        has_final_slot: bool,
    ) -> Option<QualityTier> {
        if source_count >= expected {
            Some(QualityTier::Full)
        } else if source_count < self.minimum_for(target, expected) {
            None
        } else if has_final_slot {
            Some(QualityTier::Good)
        } else {
            Some(QualityTier::Degraded)
        }
    }
}
