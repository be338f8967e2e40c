//! Benchmark fixtures for ratchet.
//!
//! Builds deterministic one-minute bar series and stores seeded with them so
//! rollup and catch-up costs can be measured without external data.

use chrono::{DateTime, TimeDelta, Utc};
use ratchet_lib::{
    AggregationTask, Bar, BarSource, MemoryStore, RegistryEntry, Symbol, TaskKey, Timeframe,
    TypesError,
};

/// Shape of a generated bar series.
#[derive(Debug, Clone, Copy)]
pub struct SeriesConfig {
    /// First bar start.
    pub start: DateTime<Utc>,
    /// Number of one-minute slots covered.
    pub minutes: i64,
    /// Drop every n-th slot to simulate missing source bars.
    pub gap_every: Option<i64>,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            start: bench_epoch(),
            minutes: 1_440,
            gap_every: None,
        }
    }
}

impl SeriesConfig {
    /// End of the last generated slot.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + TimeDelta::minutes(self.minutes)
    }
}

/// Fixed start of every generated series, a Tuesday midnight.
pub fn bench_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_153_600, 0).unwrap_or_default()
}

/// Generates a one-minute series following a slow deterministic wave.
pub fn minute_bars(symbol: &Symbol, config: SeriesConfig) -> Vec<Bar> {
    (0..config.minutes)
        .filter(|i| config.gap_every.is_none_or(|n| n == 0 || (i + 1) % n != 0))
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let phase = i as f64 / 90.0;
            let open = 1.1 + 0.01 * phase.sin();
            let close = 1.1 + 0.01 * (phase + 0.01).sin();
            Bar::new(
                symbol.clone(),
                Timeframe::Minute1,
                config.start + TimeDelta::minutes(i),
                open,
                open.max(close) + 0.0002,
                open.min(close) - 0.0002,
                close,
                10.0 + phase.cos().abs() * 5.0,
            )
        })
        .collect()
}

/// Symbols named `SYM000`, `SYM001`, ...
///
/// # Errors
///
/// Never fails for the generated names.
pub fn symbols(count: usize) -> Result<Vec<Symbol>, TypesError> {
    (0..count).map(|i| Symbol::new(format!("SYM{i:03}"))).collect()
}

/// A store holding `series` for every symbol, each registered as active.
///
/// # Errors
///
/// Returns an error if the generated bars are rejected.
pub async fn seeded_store(
    symbols: &[Symbol],
    series: SeriesConfig,
) -> Result<MemoryStore, Box<dyn std::error::Error + Send + Sync>> {
    use ratchet_lib::RegistryStore;

    let store = MemoryStore::new();
    for symbol in symbols {
        store
            .put_registry_entry(RegistryEntry::active(symbol.clone(), Timeframe::Minute1))
            .await?;
        store.insert_raw_bars(minute_bars(symbol, series))?;
    }
    Ok(store)
}

/// An m1 to m5 task whose cursor sits at the start of `series`.
///
/// # Errors
///
/// Never fails for the m1 to m5 pair.
pub fn m5_task(symbol: &Symbol, series: SeriesConfig) -> Result<AggregationTask, TypesError> {
    let key = TaskKey::new(symbol.clone(), Timeframe::Minute5);
    let mut task =
        AggregationTask::new(key, Timeframe::Minute1, BarSource::Raw, series.start, series.start)?
            .mandatory();
    task.cursor = Some(series.start);
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_bars_are_well_formed() {
        let symbol = Symbol::new("EURUSD").unwrap();
        let bars = minute_bars(&symbol, SeriesConfig::default());
        assert_eq!(bars.len(), 1_440);
        assert!(bars.iter().all(Bar::is_well_formed));
    }

    #[test]
    fn test_gaps_drop_every_nth_slot() {
        let symbol = Symbol::new("EURUSD").unwrap();
        let config = SeriesConfig {
            minutes: 10,
            gap_every: Some(5),
            ..SeriesConfig::default()
        };
        let bars = minute_bars(&symbol, config);
        assert_eq!(bars.len(), 8);
        assert!(bars.iter().all(|b| b.window_start != config.start + TimeDelta::minutes(4)));
    }
}
