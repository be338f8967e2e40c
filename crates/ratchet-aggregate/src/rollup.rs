//! Pure folding of source bars into one derived bar.

use chrono::{DateTime, Utc};
use ratchet_types::{Bar, BarSource, DerivedBar, Provenance, Symbol, Timeframe, Window};

use crate::{AggregateError, QualityPolicy, Result};

/// One window to roll up.
#[derive(Debug, Clone)]
pub struct WindowRequest {
    /// Symbol being rolled up.
    pub symbol: Symbol,
    /// Store side the source bars live on.
    pub source: BarSource,
    /// Timeframe of the source bars.
    pub source_timeframe: Timeframe,
    /// Timeframe being produced.
    pub target_timeframe: Timeframe,
    /// The window, aligned to the target timeframe.
    pub window: Window,
    /// Source bars a complete window holds.
    pub expected_count: u32,
}

/// Result of folding one window.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// No source bars in the window.
    NoData,
    /// Too few source bars to store a bar.
    Sparse {
        /// Source bars present.
        source_count: u32,
        /// Source bars required.
        minimum: u32,
    },
    /// A bar worth storing.
    Accepted(DerivedBar),
}

impl Verdict {
    /// Number of source bars the verdict was based on.
    #[must_use]
    pub const fn source_count(&self) -> u32 {
        match self {
            Self::NoData => 0,
            Self::Sparse { source_count, .. } => *source_count,
            Self::Accepted(bar) => bar.source_count,
        }
    }
}

/// Streaming OHLCV accumulator over ordered source bars.
#[derive(Debug)]
struct BarBuilder {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    notional: f64,
    trade_count: u64,
    count: u32,
}

impl BarBuilder {
    /// Creates a builder from the first source bar.
    fn new(bar: &Bar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            notional: bar.close * bar.volume,
            trade_count: bar.trade_count,
            count: 1,
        }
    }

    /// Folds in the next source bar.
    fn update(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.notional += bar.close * bar.volume;
        self.trade_count += bar.trade_count;
        self.count += 1;
    }

    /// Volume-weighted mean of closes, absent without volume.
    fn vwap(&self) -> Option<f64> {
        (self.volume > 0.0).then(|| self.notional / self.volume)
    }
}

/// Folds the source bars of one window and grades the result.
///
/// `bars` must be ordered by start. Bars outside the window or of another
/// timeframe are ignored. `now` stamps the row's bookkeeping fields.
///
/// # Errors
///
/// Returns [`AggregateError::Malformed`] if a source bar has non-finite
/// values or inconsistent prices.
pub fn rollup(
    request: &WindowRequest,
    bars: &[Bar],
    policy: &QualityPolicy,
    derivation_version: u32,
    now: DateTime<Utc>,
) -> Result<Verdict> {
    let last_slot = request.window.last_slot(request.source_timeframe);
    let mut builder: Option<BarBuilder> = None;
    let mut has_final_slot = false;

    let in_window = bars.iter().filter(|b| {
        b.timeframe == request.source_timeframe && request.window.contains(b.window_start)
    });
    for bar in in_window {
        if !bar.is_well_formed() {
            return Err(AggregateError::Malformed {
                symbol: request.symbol.clone(),
                window_start: bar.window_start,
                reason: format!(
                    "o={} h={} l={} c={} v={}",
                    bar.open, bar.high, bar.low, bar.close, bar.volume
                ),
            });
        }
        has_final_slot |= bar.window_start == last_slot;
        match builder.as_mut() {
            Some(b) => b.update(bar),
            None => builder = Some(BarBuilder::new(bar)),
        }
    }

    let Some(builder) = builder else {
        return Ok(Verdict::NoData);
    };

    let expected = request.expected_count;
    let Some(quality) = policy.grade(
        request.target_timeframe,
        builder.count,
        expected,
        has_final_slot,
    ) else {
        return Ok(Verdict::Sparse {
            source_count: builder.count,
            minimum: policy.minimum_for(request.target_timeframe, expected),
        });
    };

    let bar = Bar {
        symbol: request.symbol.clone(),
        timeframe: request.target_timeframe,
        window_start: request.window.start,
        open: builder.open,
        high: builder.high,
        low: builder.low,
        close: builder.close,
        volume: builder.volume,
        volume_weighted_price: builder.vwap(),
        trade_count: builder.trade_count,
        provenance: Provenance::Aggregated,
    };

    Ok(Verdict::Accepted(DerivedBar {
        bar,
        source_count: builder.count,
        expected_count: expected,
        quality,
        quality_score: quality.score(),
        derivation_version,
        soft_deleted_at: None,
        created_at: now,
        updated_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeDelta, TimeZone};
    use ratchet_types::QualityTier;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn symbol() -> Symbol {
        Symbol::new("EURUSD").unwrap()
    }

    fn request() -> WindowRequest {
        WindowRequest {
            symbol: symbol(),
            source: BarSource::Raw,
            source_timeframe: Timeframe::Minute1,
            target_timeframe: Timeframe::Minute5,
            window: Window::aligned(t0(), Timeframe::Minute5).unwrap(),
            expected_count: 5,
        }
    }

    fn bar(minute: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        let mut bar = Bar::new(
            symbol(),
            Timeframe::Minute1,
            t0() + TimeDelta::minutes(minute),
            open,
            high,
            low,
            close,
            volume,
        );
        bar.trade_count = 2;
        bar
    }

    fn run(bars: &[Bar]) -> Verdict {
        rollup(&request(), bars, &QualityPolicy::default(), 1, t0()).unwrap()
    }

    #[test]
    fn test_full_window_ohlcv() {
        let bars = vec![
            bar(0, 1.10, 1.12, 1.09, 1.11, 10.0),
            bar(1, 1.11, 1.15, 1.10, 1.14, 20.0),
            bar(2, 1.14, 1.14, 1.05, 1.06, 30.0),
            bar(3, 1.06, 1.08, 1.06, 1.07, 0.0),
            bar(4, 1.07, 1.09, 1.07, 1.08, 40.0),
        ];
        let Verdict::Accepted(derived) = run(&bars) else {
            panic!("expected an accepted bar");
        };

        assert_eq!(derived.bar.window_start, t0());
        assert_eq!(derived.bar.timeframe, Timeframe::Minute5);
        assert_relative_eq!(derived.bar.open, 1.10);
        assert_relative_eq!(derived.bar.high, 1.15);
        assert_relative_eq!(derived.bar.low, 1.05);
        assert_relative_eq!(derived.bar.close, 1.08);
        assert_relative_eq!(derived.bar.volume, 100.0);
        let vwap = (1.11 * 10.0 + 1.14 * 20.0 + 1.06 * 30.0 + 1.08 * 40.0) / 100.0;
        assert_relative_eq!(derived.bar.volume_weighted_price.unwrap(), vwap);
        assert_eq!(derived.bar.trade_count, 10);
        assert_eq!(derived.bar.provenance, Provenance::Aggregated);
        assert_eq!(derived.source_count, 5);
        assert_eq!(derived.quality, QualityTier::Full);
        assert_eq!(derived.quality_score, 2);
    }

    #[test]
    fn test_empty_window_is_no_data() {
        assert_eq!(run(&[]), Verdict::NoData);
        assert_eq!(Verdict::NoData.source_count(), 0);
    }

    #[test]
    fn test_sparse_window_is_not_stored() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0), bar(4, 1.0, 1.0, 1.0, 1.0, 1.0)];
        assert_eq!(
            run(&bars),
            Verdict::Sparse {
                source_count: 2,
                minimum: 3
            }
        );
    }

    #[test]
    fn test_missing_final_slot_is_degraded() {
        let without_last = vec![
            bar(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(1, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(2, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        let with_last = vec![
            bar(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(2, 1.0, 1.0, 1.0, 1.0, 1.0),
            bar(4, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];

        let Verdict::Accepted(degraded) = run(&without_last) else {
            panic!("expected an accepted bar");
        };
        let Verdict::Accepted(good) = run(&with_last) else {
            panic!("expected an accepted bar");
        };
        assert_eq!(degraded.quality, QualityTier::Degraded);
        assert_eq!(good.quality, QualityTier::Good);
        assert!(good.quality > degraded.quality);
    }

    #[test]
    fn test_zero_volume_has_no_vwap() {
        let bars: Vec<_> = (0..5).map(|m| bar(m, 1.0, 1.0, 1.0, 1.0, 0.0)).collect();
        let Verdict::Accepted(derived) = run(&bars) else {
            panic!("expected an accepted bar");
        };
        assert!(derived.bar.volume_weighted_price.is_none());
    }

    #[test]
    fn test_bars_outside_window_are_ignored() {
        let mut bars: Vec<_> = (0..5).map(|m| bar(m, 1.0, 1.0, 1.0, 1.0, 1.0)).collect();
        bars.push(bar(5, 9.0, 9.0, 9.0, 9.0, 1.0));
        let Verdict::Accepted(derived) = run(&bars) else {
            panic!("expected an accepted bar");
        };
        assert_eq!(derived.source_count, 5);
        assert_relative_eq!(derived.bar.high, 1.0);
    }

    #[test]
    fn test_malformed_bar_is_an_error() {
        let bars = vec![bar(0, 1.0, 0.9, 1.1, 1.0, 1.0)];
        let err = rollup(&request(), &bars, &QualityPolicy::default(), 1, t0()).unwrap_err();
        assert!(matches!(err, AggregateError::Malformed { .. }));
        assert!(!err.is_transient());
    }
}
