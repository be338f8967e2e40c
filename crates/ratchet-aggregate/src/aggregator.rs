//! Store-backed window aggregation.

use chrono::{DateTime, Utc};
use ratchet_store::{BarStore, UpsertOutcome};
use ratchet_types::DerivedBar;

use crate::{QualityPolicy, Result, Verdict, WindowRequest, rollup};

/// What happened to one window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// No source bars yet: the window may sit beyond the data frontier.
    NoData,
    /// Source bars exist but too few to store a bar.
    Sparse {
        /// Source bars present.
        source_count: u32,
        /// Source bars required.
        minimum: u32,
    },
    /// A derived bar was upserted.
    Stored {
        /// The bar as computed.
        bar: DerivedBar,
        /// Effect of the upsert.
        upsert: UpsertOutcome,
    },
}

impl WindowOutcome {
    /// Number of source bars found in the window.
    #[must_use]
    pub const fn source_count(&self) -> u32 {
        match self {
            Self::NoData => 0,
            Self::Sparse { source_count, .. } => *source_count,
            Self::Stored { bar, .. } => bar.source_count,
        }
    }

    /// Returns true if a new derived row was inserted.
    #[must_use]
    pub const fn created(&self) -> bool {
        matches!(
            self,
            Self::Stored {
                upsert: UpsertOutcome::Inserted,
                ..
            }
        )
    }

    /// Returns true if a stored bar is of poor quality.
    #[must_use]
    pub const fn is_poor_quality(&self) -> bool {
        match self {
            Self::Stored { bar, .. } => bar.quality.is_poor(),
            Self::NoData | Self::Sparse { .. } => false,
        }
    }
}

/// Rolls one window at a time and writes accepted bars back to the store.
#[derive(Debug, Clone, Default)]
pub struct WindowAggregator {
    policy: QualityPolicy,
    derivation_version: u32,
}

impl WindowAggregator {
    /// Creates an aggregator with the given policy and derivation version.
    #[must_use]
    pub const fn new(policy: QualityPolicy, derivation_version: u32) -> Self {
        Self {
            policy,
            derivation_version,
        }
    }

    /// Returns the quality policy.
    #[must_use]
    pub const fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Returns the derivation version stamped on written bars.
    #[must_use]
    pub const fn derivation_version(&self) -> u32 {
        self.derivation_version
    }

    /// Reads the window's source bars, rolls them up and upserts the result.
    ///
    /// Running the same window twice over unchanged source bars writes
    /// nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a source bar is malformed.
    pub async fn aggregate<S>(
        &self,
        store: &S,
        request: &WindowRequest,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome>
    where
        S: BarStore + ?Sized,
    {
        let bars = store
            .source_bars(
                request.source,
                &request.symbol,
                request.source_timeframe,
                request.window,
            )
            .await?;

        let verdict = rollup(
            request,
            &bars,
            &self.policy,
            self.derivation_version,
            now,
        )?;

        match verdict {
            Verdict::NoData => Ok(WindowOutcome::NoData),
            Verdict::Sparse {
                source_count,
                minimum,
            } => {
                tracing::debug!(
                    symbol = %request.symbol,
                    window = %request.window,
                    source_count,
                    minimum,
                    "window below minimum coverage, not stored"
                );
                Ok(WindowOutcome::Sparse {
                    source_count,
                    minimum,
                })
            }
            Verdict::Accepted(bar) => {
                let upsert = store.upsert_derived(bar.clone()).await?;
                Ok(WindowOutcome::Stored { bar, upsert })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use ratchet_store::MemoryStore;
    use ratchet_types::{Bar, BarSource, QualityTier, Symbol, Timeframe, Window};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn symbol() -> Symbol {
        Symbol::new("EURUSD").unwrap()
    }

    fn seed(store: &MemoryStore, minutes: &[i64]) {
        let bars = minutes.iter().map(|m| {
            Bar::new(
                symbol(),
                Timeframe::Minute1,
                t0() + TimeDelta::minutes(*m),
                1.0,
                1.2,
                0.8,
                1.1,
                5.0,
            )
        });
        store.insert_raw_bars(bars).unwrap();
    }

    fn request(window_minute: i64, source: BarSource, tf: Timeframe, target: Timeframe) -> WindowRequest {
        WindowRequest {
            symbol: symbol(),
            source,
            source_timeframe: tf,
            target_timeframe: target,
            window: Window::aligned(t0() + TimeDelta::minutes(window_minute), target).unwrap(),
            expected_count: target.ratio_to(tf).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        seed(&store, &[0, 1, 2, 3, 4]);
        let aggregator = WindowAggregator::new(QualityPolicy::default(), 1);
        let req = request(0, BarSource::Raw, Timeframe::Minute1, Timeframe::Minute5);

        let first = aggregator.aggregate(&store, &req, t0()).await.unwrap();
        assert!(first.created());
        assert_eq!(first.source_count(), 5);

        let later = t0() + TimeDelta::hours(1);
        let second = aggregator.aggregate(&store, &req, later).await.unwrap();
        assert!(matches!(
            second,
            WindowOutcome::Stored {
                upsert: UpsertOutcome::Unchanged,
                ..
            }
        ));

        let stored = store
            .derived_bar(&ratchet_types::BarKey {
                symbol: symbol(),
                timeframe: Timeframe::Minute5,
                window_start: t0(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.updated_at, t0());
    }

    #[tokio::test]
    async fn test_late_source_bar_updates_in_place() {
        let store = MemoryStore::new();
        seed(&store, &[0, 1, 2]);
        let aggregator = WindowAggregator::new(QualityPolicy::default(), 1);
        let req = request(0, BarSource::Raw, Timeframe::Minute1, Timeframe::Minute5);

        let first = aggregator.aggregate(&store, &req, t0()).await.unwrap();
        assert!(first.is_poor_quality());

        seed(&store, &[3, 4]);
        let second = aggregator.aggregate(&store, &req, t0()).await.unwrap();
        let WindowOutcome::Stored { bar, upsert } = second else {
            panic!("expected a stored bar");
        };
        assert_eq!(upsert, UpsertOutcome::Updated);
        assert_eq!(bar.quality, QualityTier::Full);
    }

    #[tokio::test]
    async fn test_no_data_and_sparse_write_nothing() {
        let store = MemoryStore::new();
        seed(&store, &[5, 6]);
        let aggregator = WindowAggregator::default();

        let empty = request(0, BarSource::Raw, Timeframe::Minute1, Timeframe::Minute5);
        assert_eq!(
            aggregator.aggregate(&store, &empty, t0()).await.unwrap(),
            WindowOutcome::NoData
        );

        let sparse = request(5, BarSource::Raw, Timeframe::Minute1, Timeframe::Minute5);
        let outcome = aggregator.aggregate(&store, &sparse, t0()).await.unwrap();
        assert_eq!(outcome.source_count(), 2);
        assert!(!outcome.created());
        assert!(
            store
                .series_starts(BarSource::Derived, &symbol(), Timeframe::Minute5)
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_rolls_derived_bars_upward() {
        let store = MemoryStore::new();
        seed(&store, &(0..60).collect::<Vec<_>>());
        let aggregator = WindowAggregator::new(QualityPolicy::default(), 1);

        for window in (0..60).step_by(5) {
            let req = request(window, BarSource::Raw, Timeframe::Minute1, Timeframe::Minute5);
            aggregator.aggregate(&store, &req, t0()).await.unwrap();
        }

        let hourly = request(0, BarSource::Derived, Timeframe::Minute5, Timeframe::Hour1);
        let outcome = aggregator.aggregate(&store, &hourly, t0()).await.unwrap();
        let WindowOutcome::Stored { bar, .. } = outcome else {
            panic!("expected a stored bar");
        };
        assert_eq!(bar.source_count, 12);
        assert_eq!(bar.quality, QualityTier::Full);
        assert!((bar.bar.volume - 300.0).abs() < 1e-9);
    }
}
