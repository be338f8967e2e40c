//! Storage traits consumed by the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratchet_types::{
    AggregationTask, Bar, BarKey, BarSource, DerivedBar, QualityTier, RegistryEntry, Symbol,
    TaskKey, Timeframe, Window, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ReconcilePlanner, ReconcileReport, Result};

/// Effect of a derived bar upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    /// No live row existed for the key.
    Inserted,
    /// A live row existed with different content and was overwritten.
    Updated,
    /// A live row existed with identical content; nothing was written.
    Unchanged,
}

/// Per symbol and timeframe counts of live derived bars by tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCounters {
    /// The symbol.
    pub symbol: Symbol,
    /// The derived timeframe.
    pub timeframe: Timeframe,
    /// Bars with every source bar present.
    pub full: u64,
    /// Partial bars with the final slot present.
    pub good: u64,
    /// Partial bars missing the final slot.
    pub degraded: u64,
    /// Earliest bar start.
    pub first: Option<DateTime<Utc>>,
    /// Latest bar start.
    pub last: Option<DateTime<Utc>>,
}

impl QualityCounters {
    /// Creates empty counters.
    #[must_use]
    pub const fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            full: 0,
            good: 0,
            degraded: 0,
            first: None,
            last: None,
        }
    }

    /// Counts one bar.
    pub fn record(&mut self, bar: &DerivedBar) {
        match bar.quality {
            QualityTier::Full => self.full += 1,
            QualityTier::Good => self.good += 1,
            QualityTier::Degraded => self.degraded += 1,
        }
        let start = bar.bar.window_start;
        self.first = Some(self.first.map_or(start, |f| f.min(start)));
        self.last = Some(self.last.map_or(start, |l| l.max(start)));
    }

    /// Total bars counted.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.full + self.good + self.degraded
    }
}

/// Raw and derived bar tables.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Returns live bars of `timeframe` for `symbol` that start inside
    /// `window`, ordered by start.
    async fn source_bars(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
    ) -> Result<Vec<Bar>>;

    /// Start of the most recent live bar, if any.
    async fn latest_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Start of the first live bar at or after `from`, if any.
    async fn next_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Returns the live derived bar stored under `key`.
    async fn derived_bar(&self, key: &BarKey) -> Result<Option<DerivedBar>>;

    /// Inserts or overwrites the live derived bar with the same key.
    ///
    /// The stored row keeps its original `created_at`; an identical row is
    /// left untouched.
    async fn upsert_derived(&self, bar: DerivedBar) -> Result<UpsertOutcome>;

    /// Retires live derived bars starting inside `window`. Returns how many
    /// rows were retired.
    async fn soft_delete_derived(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Counts live derived bars by tier, optionally for one symbol.
    async fn quality_summary(&self, symbol: Option<&Symbol>) -> Result<Vec<QualityCounters>>;
}

/// Task table with optimistic concurrency.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Returns every task, ordered by key.
    async fn list_tasks(&self) -> Result<Vec<AggregationTask>>;

    /// Returns one task.
    async fn get_task(&self, key: &TaskKey) -> Result<Option<AggregationTask>>;

    /// Inserts a new task with version 1.
    async fn insert_task(&self, task: AggregationTask) -> Result<AggregationTask>;

    /// Replaces a task if its stored version still equals
    /// `expected_version`. Returns the stored row with its new version.
    ///
    /// Rejects writes that would move the cursor backwards.
    async fn compare_and_swap(
        &self,
        task: AggregationTask,
        expected_version: u64,
    ) -> Result<AggregationTask>;

    /// Moves the cursor of a task leased by `holder` forward.
    ///
    /// Fails with `LeaseLost` if the lease has passed to another worker and
    /// with `CursorRegression` if `cursor` is behind the stored one.
    async fn checkpoint_cursor(
        &self,
        key: &TaskKey,
        holder: WorkerId,
        cursor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;
}

/// Registry, pause flags and the atomic task reconciliation.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Returns every registry row.
    async fn registry(&self) -> Result<Vec<RegistryEntry>>;

    /// Inserts or replaces a registry row. Registry writes belong to the
    /// ingestion side; the engine only reads.
    async fn put_registry_entry(&self, entry: RegistryEntry) -> Result<()>;

    /// Returns the symbols currently paused by operators.
    async fn paused_symbols(&self) -> Result<BTreeSet<Symbol>>;

    /// Sets or clears the pause flag. Returns true if the flag changed.
    async fn set_paused(&self, symbol: &Symbol, paused: bool) -> Result<bool>;

    /// Reads the registry and task table, asks `planner` for writes and
    /// applies them, all under one lock. Either every write is applied or
    /// none is.
    async fn reconcile(
        &self,
        planner: &dyn ReconcilePlanner,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport>;
}

/// Everything the engine needs from a backend.
pub trait Repository: BarStore + TaskStore + RegistryStore {}

impl<T: BarStore + TaskStore + RegistryStore + ?Sized> Repository for T {}
