//! In-memory store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ratchet_types::{
    AggregationTask, Bar, BarKey, BarSource, DerivedBar, Provenance, RegistryEntry, Symbol,
    TaskKey, Timeframe, Window, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    BarStore, QualityCounters, ReconcilePlanner, ReconcileReport, RegistrySnapshot,
    RegistryStore, Result, StoreError, TaskMutation, TaskStore, UpsertOutcome,
};

type SeriesKey = (Symbol, Timeframe);

/// The tables behind every backend.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    raw: BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, Bar>>,
    derived: BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, DerivedBar>>,
    retired: Vec<DerivedBar>,
    tasks: BTreeMap<TaskKey, AggregationTask>,
    registry: BTreeMap<Symbol, RegistryEntry>,
    paused: BTreeSet<Symbol>,
}

/// Serialized form of [`Tables`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    raw: Vec<Bar>,
    #[serde(default)]
    derived: Vec<DerivedBar>,
    #[serde(default)]
    tasks: Vec<AggregationTask>,
    #[serde(default)]
    registry: Vec<RegistryEntry>,
    #[serde(default)]
    paused: Vec<Symbol>,
}

impl From<&Tables> for Snapshot {
    fn from(tables: &Tables) -> Self {
        Self {
            raw: tables
                .raw
                .values()
                .flat_map(|series| series.values().cloned())
                .collect(),
            derived: tables
                .derived
                .values()
                .flat_map(|series| series.values().cloned())
                .chain(tables.retired.iter().cloned())
                .collect(),
            tasks: tables.tasks.values().cloned().collect(),
            registry: tables.registry.values().cloned().collect(),
            paused: tables.paused.iter().cloned().collect(),
        }
    }
}

impl From<Snapshot> for Tables {
    fn from(snapshot: Snapshot) -> Self {
        let mut tables = Self::default();
        for bar in snapshot.raw {
            tables
                .raw
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default()
                .insert(bar.window_start, bar);
        }
        for bar in snapshot.derived {
            if bar.is_deleted() {
                tables.retired.push(bar);
            } else {
                tables
                    .derived
                    .entry((bar.bar.symbol.clone(), bar.bar.timeframe))
                    .or_default()
                    .insert(bar.bar.window_start, bar);
            }
        }
        tables.tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| (t.key.clone(), t))
            .collect();
        tables.registry = snapshot
            .registry
            .into_iter()
            .map(|e| (e.symbol.clone(), e))
            .collect();
        tables.paused = snapshot.paused.into_iter().collect();
        tables
    }
}

impl Tables {
    fn base_timeframe(&self, symbol: &Symbol) -> Option<Timeframe> {
        self.registry.get(symbol).map(|e| e.base_timeframe)
    }

    fn insert_raw(&mut self, bars: Vec<Bar>) -> Result<usize> {
        for bar in &bars {
            if self
                .base_timeframe(&bar.symbol)
                .is_some_and(|base| base != bar.timeframe)
            {
                return Err(StoreError::ArchitectureGate {
                    symbol: bar.symbol.clone(),
                    timeframe: bar.timeframe,
                    table: "raw",
                });
            }
        }

        let mut inserted = 0;
        for bar in bars {
            let series = self
                .raw
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default();
            if !series.contains_key(&bar.window_start) {
                series.insert(bar.window_start, bar);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn source_bars(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
    ) -> Vec<Bar> {
        let key = (symbol.clone(), timeframe);
        let range = window.start..window.end;
        match source {
            BarSource::Raw => self
                .raw
                .get(&key)
                .map(|s| s.range(range).map(|(_, b)| b.clone()).collect())
                .unwrap_or_default(),
            BarSource::Derived => self
                .derived
                .get(&key)
                .map(|s| s.range(range).map(|(_, d)| d.bar.clone()).collect())
                .unwrap_or_default(),
        }
    }

    fn starts(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Option<Vec<DateTime<Utc>>> {
        let key = (symbol.clone(), timeframe);
        match source {
            BarSource::Raw => self.raw.get(&key).map(|s| s.keys().copied().collect()),
            BarSource::Derived => self.derived.get(&key).map(|s| s.keys().copied().collect()),
        }
    }

    fn latest_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Option<DateTime<Utc>> {
        let key = (symbol.clone(), timeframe);
        match source {
            BarSource::Raw => self.raw.get(&key)?.last_key_value().map(|(k, _)| *k),
            BarSource::Derived => self.derived.get(&key)?.last_key_value().map(|(k, _)| *k),
        }
    }

    fn next_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let key = (symbol.clone(), timeframe);
        match source {
            BarSource::Raw => self.raw.get(&key)?.range(from..).next().map(|(k, _)| *k),
            BarSource::Derived => self.derived.get(&key)?.range(from..).next().map(|(k, _)| *k),
        }
    }

    fn derived_bar(&self, key: &BarKey) -> Option<DerivedBar> {
        self.derived
            .get(&(key.symbol.clone(), key.timeframe))?
            .get(&key.window_start)
            .cloned()
    }

    fn upsert_derived(&mut self, mut bar: DerivedBar) -> Result<UpsertOutcome> {
        let symbol = bar.bar.symbol.clone();
        let timeframe = bar.bar.timeframe;
        if self
            .base_timeframe(&symbol)
            .is_some_and(|base| base == timeframe)
        {
            return Err(StoreError::ArchitectureGate {
                symbol,
                timeframe,
                table: "derived",
            });
        }

        bar.bar.provenance = Provenance::Aggregated;
        bar.soft_deleted_at = None;
        let start = bar.bar.window_start;
        let series = self.derived.entry((symbol, timeframe)).or_default();
        match series.get_mut(&start) {
            Some(existing) if existing.same_content(&bar) => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                bar.created_at = existing.created_at;
                *existing = bar;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                series.insert(start, bar);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn soft_delete_derived(
        &mut self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(series) = self.derived.get_mut(&(symbol.clone(), timeframe)) else {
            return 0;
        };
        let starts: Vec<_> = series
            .range(window.start..window.end)
            .map(|(k, _)| *k)
            .collect();
        for start in &starts {
            if let Some(mut bar) = series.remove(start) {
                bar.soft_deleted_at = Some(now);
                self.retired.push(bar);
            }
        }
        starts.len()
    }

    fn quality_summary(&self, symbol: Option<&Symbol>) -> Vec<QualityCounters> {
        self.derived
            .iter()
            .filter(|((s, _), _)| symbol.is_none_or(|wanted| wanted == s))
            .map(|((s, tf), series)| {
                let mut counters = QualityCounters::new(s.clone(), *tf);
                for bar in series.values() {
                    counters.record(bar);
                }
                counters
            })
            .collect()
    }

    fn insert_task(&mut self, mut task: AggregationTask) -> Result<AggregationTask> {
        if self.tasks.contains_key(&task.key) {
            return Err(StoreError::TaskExists(task.key));
        }
        task.version = 1;
        self.tasks.insert(task.key.clone(), task.clone());
        Ok(task)
    }

    fn compare_and_swap(
        &mut self,
        mut task: AggregationTask,
        expected_version: u64,
    ) -> Result<AggregationTask> {
        let existing = self
            .tasks
            .get(&task.key)
            .ok_or_else(|| StoreError::TaskNotFound(task.key.clone()))?;
        if existing.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: task.key,
                expected: expected_version,
                actual: existing.version,
            });
        }
        ensure_forward(existing, task.cursor)?;
        task.version = expected_version + 1;
        self.tasks.insert(task.key.clone(), task.clone());
        Ok(task)
    }

    fn checkpoint_cursor(
        &mut self,
        key: &TaskKey,
        holder: WorkerId,
        cursor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = self
            .tasks
            .get_mut(key)
            .ok_or_else(|| StoreError::TaskNotFound(key.clone()))?;
        if !task.is_leased_by(holder) {
            return Err(StoreError::LeaseLost {
                key: key.clone(),
                holder,
            });
        }
        ensure_forward(task, Some(cursor))?;
        task.cursor = Some(cursor);
        task.updated_at = now;
        task.version += 1;
        Ok(())
    }

    fn earliest_raw(&self) -> BTreeMap<Symbol, DateTime<Utc>> {
        self.registry
            .values()
            .filter_map(|entry| {
                let series = self.raw.get(&(entry.symbol.clone(), entry.base_timeframe))?;
                let (first, _) = series.first_key_value()?;
                Some((entry.symbol.clone(), *first))
            })
            .collect()
    }

    fn reconcile(
        &mut self,
        planner: &dyn ReconcilePlanner,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let entries: Vec<RegistryEntry> = self.registry.values().cloned().collect();
        let earliest_raw = self.earliest_raw();
        let tasks: Vec<AggregationTask> = self.tasks.values().cloned().collect();
        let snapshot = RegistrySnapshot {
            now,
            entries: &entries,
            earliest_raw: &earliest_raw,
        };

        let mutations = planner.plan(&snapshot, &tasks);
        let mut report = ReconcileReport {
            live_symbols: snapshot.live_symbols(),
            ..ReconcileReport::default()
        };

        // Stage on a copy so a rejected mutation leaves the table untouched.
        let mut staged = self.tasks.clone();
        for mutation in mutations {
            let key = mutation.task().key.clone();
            match mutation {
                TaskMutation::Create(mut task) => {
                    if staged.contains_key(&key) {
                        return Err(StoreError::TaskExists(key));
                    }
                    task.version = 1;
                    task.created_at = now;
                    task.updated_at = now;
                    staged.insert(key.clone(), task);
                    report.created.push(key);
                }
                TaskMutation::Enable(task)
                | TaskMutation::Refresh(task)
                | TaskMutation::Disable(task) => {
                    let existing = staged
                        .get(&key)
                        .ok_or_else(|| StoreError::TaskNotFound(key.clone()))?;
                    ensure_forward(existing, task.cursor)?;
                    let version = existing.version + 1;
                    let enabled_before = existing.enabled;
                    let mut task = task;
                    task.version = version;
                    task.updated_at = now;
                    let enabled_after = task.enabled;
                    staged.insert(key.clone(), task);
                    match (enabled_before, enabled_after) {
                        (false, true) => report.enabled.push(key),
                        (true, false) => report.disabled.push(key),
                        _ => report.refreshed.push(key),
                    }
                }
            }
        }

        self.tasks = staged;
        Ok(report)
    }
}

/// Rejects a write that would move `existing`'s cursor backwards.
fn ensure_forward(existing: &AggregationTask, proposed: Option<DateTime<Utc>>) -> Result<()> {
    match existing.cursor {
        Some(current) if proposed.is_none_or(|p| p < current) => {
            Err(StoreError::CursorRegression {
                key: existing.key.clone(),
                current,
                proposed,
            })
        }
        _ => Ok(()),
    }
}

/// Store backend that keeps every table in memory behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            tables: RwLock::new(Tables::from(snapshot)),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot::from(&*self.tables.read())
    }

    /// Returns an independent copy of every table.
    pub(crate) fn fork(&self) -> Self {
        Self {
            tables: RwLock::new(self.tables.read().clone()),
        }
    }

    /// Stores raw bars as the ingestion pipeline would. Bars already present
    /// are left untouched. Returns how many bars were new.
    ///
    /// # Errors
    ///
    /// Returns an error if a bar's timeframe differs from its symbol's
    /// registered base timeframe. No bar is written in that case.
    pub fn insert_raw_bars(&self, bars: impl IntoIterator<Item = Bar>) -> Result<usize> {
        self.tables.write().insert_raw(bars.into_iter().collect())
    }

    /// Returns the start of every live bar of a series, oldest first.
    #[must_use]
    pub fn series_starts(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Vec<DateTime<Utc>> {
        self.tables
            .read()
            .starts(source, symbol, timeframe)
            .unwrap_or_default()
    }

    /// Returns the number of soft-deleted derived rows.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.tables.read().retired.len()
    }
}

#[async_trait]
impl BarStore for MemoryStore {
    async fn source_bars(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
    ) -> Result<Vec<Bar>> {
        Ok(self
            .tables
            .read()
            .source_bars(source, symbol, timeframe, window))
    }

    async fn latest_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.tables.read().latest_start(source, symbol, timeframe))
    }

    async fn next_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .tables
            .read()
            .next_start(source, symbol, timeframe, from))
    }

    async fn derived_bar(&self, key: &BarKey) -> Result<Option<DerivedBar>> {
        Ok(self.tables.read().derived_bar(key))
    }

    async fn upsert_derived(&self, bar: DerivedBar) -> Result<UpsertOutcome> {
        self.tables.write().upsert_derived(bar)
    }

    async fn soft_delete_derived(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self
            .tables
            .write()
            .soft_delete_derived(symbol, timeframe, window, now))
    }

    async fn quality_summary(&self, symbol: Option<&Symbol>) -> Result<Vec<QualityCounters>> {
        Ok(self.tables.read().quality_summary(symbol))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_tasks(&self) -> Result<Vec<AggregationTask>> {
        Ok(self.tables.read().tasks.values().cloned().collect())
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Option<AggregationTask>> {
        Ok(self.tables.read().tasks.get(key).cloned())
    }

    async fn insert_task(&self, task: AggregationTask) -> Result<AggregationTask> {
        self.tables.write().insert_task(task)
    }

    async fn compare_and_swap(
        &self,
        task: AggregationTask,
        expected_version: u64,
    ) -> Result<AggregationTask> {
        self.tables.write().compare_and_swap(task, expected_version)
    }

    async fn checkpoint_cursor(
        &self,
        key: &TaskKey,
        holder: WorkerId,
        cursor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.tables
            .write()
            .checkpoint_cursor(key, holder, cursor, now)
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn registry(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self.tables.read().registry.values().cloned().collect())
    }

    async fn put_registry_entry(&self, entry: RegistryEntry) -> Result<()> {
        self.tables
            .write()
            .registry
            .insert(entry.symbol.clone(), entry);
        Ok(())
    }

    async fn paused_symbols(&self) -> Result<BTreeSet<Symbol>> {
        Ok(self.tables.read().paused.clone())
    }

    async fn set_paused(&self, symbol: &Symbol, paused: bool) -> Result<bool> {
        let mut tables = self.tables.write();
        Ok(if paused {
            tables.paused.insert(symbol.clone())
        } else {
            tables.paused.remove(symbol)
        })
    }

    async fn reconcile(
        &self,
        planner: &dyn ReconcilePlanner,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        self.tables.write().reconcile(planner, now)
    }
}
