//! Bounded window-by-window catch-up of one task.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use ratchet_aggregate::{WindowAggregator, WindowOutcome, WindowRequest};
use ratchet_store::{BarStore, TaskStore, UpsertOutcome};
use ratchet_types::{AggregationTask, TaskKey, Window, WorkerId};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Why a catch-up run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The per-run window budget ran out. More work is likely waiting.
    MaxWindows,
    /// Enough consecutive empty windows to conclude the data ends here.
    Frontier,
    /// The next window has not been closed long enough to trust.
    ConfirmationBoundary,
}

impl ExitReason {
    /// Returns the reason as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxWindows => "max_windows",
            Self::Frontier => "frontier",
            Self::ConfirmationBoundary => "confirmation_boundary",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tunables for frontier detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchupPolicy {
    /// Consecutive empty windows that mark the frontier.
    pub gap_tolerance: u32,
    /// Jump over empty stretches that have source data after them.
    pub skip_historical_gaps: bool,
    /// How long source data must have resumed after a gap before the gap is
    /// jumped over. Younger gaps stop on the frontier so a late backfill can
    /// still fill them.
    pub backfill_horizon: TimeDelta,
}

impl Default for CatchupPolicy {
    fn default() -> Self {
        Self {
            gap_tolerance: 3,
            skip_historical_gaps: true,
            backfill_horizon: TimeDelta::hours(1),
        }
    }
}

/// Inputs of one run.
#[derive(Debug, Clone, Copy)]
pub struct CatchupRequest {
    /// Windows that may be aggregated before stopping. Values below the gap
    /// tolerance are raised to it.
    pub max_windows: u32,
    /// Clock reading the confirmation delay is measured against.
    pub now: DateTime<Utc>,
    /// Process windows that are still inside their confirmation delay.
    pub ignore_confirmation_delay: bool,
}

/// Tally of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupReport {
    /// Cursor when the run started.
    pub cursor_before: DateTime<Utc>,
    /// Cursor when the run stopped.
    pub cursor_after: DateTime<Utc>,
    /// Windows that had at least one source bar.
    pub windows_processed: u32,
    /// Windows with no source bars.
    pub windows_empty: u32,
    /// Windows with source bars below the coverage minimum.
    pub windows_sparse: u32,
    /// Empty windows jumped over inside a historical gap.
    pub windows_skipped: u32,
    /// Windows before the task's lower bound, jumped over without
    /// aggregation.
    pub windows_below_lower_bound: u32,
    /// Derived bars inserted.
    pub bars_created: u32,
    /// Derived bars overwritten with new values.
    pub bars_updated: u32,
    /// Derived bars recomputed with identical values.
    pub bars_unchanged: u32,
    /// Degraded bars written.
    pub poor_quality: u32,
    /// Why the run stopped.
    pub exit: ExitReason,
}

impl CatchupReport {
    const fn start(cursor: DateTime<Utc>) -> Self {
        Self {
            cursor_before: cursor,
            cursor_after: cursor,
            windows_processed: 0,
            windows_empty: 0,
            windows_sparse: 0,
            windows_skipped: 0,
            windows_below_lower_bound: 0,
            bars_created: 0,
            bars_updated: 0,
            bars_unchanged: 0,
            poor_quality: 0,
            exit: ExitReason::MaxWindows,
        }
    }

    fn tally(&mut self, outcome: &WindowOutcome) {
        match outcome {
            WindowOutcome::NoData => self.windows_empty += 1,
            WindowOutcome::Sparse { .. } => {
                self.windows_processed += 1;
                self.windows_sparse += 1;
            }
            WindowOutcome::Stored { bar, upsert } => {
                self.windows_processed += 1;
                match upsert {
                    UpsertOutcome::Inserted => self.bars_created += 1,
                    UpsertOutcome::Updated => self.bars_updated += 1,
                    UpsertOutcome::Unchanged => self.bars_unchanged += 1,
                }
                if bar.quality.is_poor() {
                    self.poor_quality += 1;
                }
            }
        }
    }
}

/// Sink for cursor positions a run has confirmed.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// Persists `cursor`.
    async fn commit(&self, cursor: DateTime<Utc>) -> Result<()>;
}

/// Checkpoint that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

#[async_trait]
impl Checkpoint for NoCheckpoint {
    async fn commit(&self, _cursor: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// Checkpoint that writes through to the task row, as long as the lease is
/// still held.
#[derive(Debug)]
pub struct LeaseCheckpoint<'a, S: ?Sized> {
    store: &'a S,
    key: &'a TaskKey,
    holder: WorkerId,
    now: DateTime<Utc>,
}

impl<'a, S: ?Sized> LeaseCheckpoint<'a, S> {
    /// Creates a checkpoint for `key` held by `holder`.
    #[must_use]
    pub const fn new(store: &'a S, key: &'a TaskKey, holder: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            store,
            key,
            holder,
            now,
        }
    }
}

#[async_trait]
impl<S: TaskStore + ?Sized> Checkpoint for LeaseCheckpoint<'_, S> {
    async fn commit(&self, cursor: DateTime<Utc>) -> Result<()> {
        self.store
            .checkpoint_cursor(self.key, self.holder, cursor, self.now)
            .await?;
        Ok(())
    }
}

/// Drives a task's cursor forward one window at a time.
#[derive(Debug)]
pub struct CatchupController<'a, S: ?Sized> {
    store: &'a S,
    aggregator: &'a WindowAggregator,
    policy: CatchupPolicy,
}

impl<'a, S> CatchupController<'a, S>
where
    S: BarStore + ?Sized,
{
    /// Creates a controller over `store`.
    #[must_use]
    pub const fn new(store: &'a S, aggregator: &'a WindowAggregator, policy: CatchupPolicy) -> Self {
        Self {
            store,
            aggregator,
            policy,
        }
    }

    /// Processes windows from the task's cursor until the budget, the
    /// frontier or the confirmation boundary is reached.
    ///
    /// The cursor advances past every examined window that had source bars,
    /// whether or not a bar was stored. Empty windows only move it once the
    /// streak is broken by data or a historical gap is jumped. Whatever stops
    /// the run, a pending streak leaves the cursor at its first empty window.
    /// The budget is raised to the gap tolerance so a run starting on an
    /// empty window can always reach the frontier. Confirmed positions are
    /// passed to `checkpoint` as they are reached.
    ///
    /// # Errors
    ///
    /// Fails if the cursor is unset, the task is misconfigured, aggregation
    /// or the checkpoint fails, or the cursor would move backwards.
    pub async fn run(
        &self,
        task: &AggregationTask,
        request: CatchupRequest,
        checkpoint: &dyn Checkpoint,
    ) -> Result<CatchupReport> {
        let key = &task.key;
        let start = task
            .cursor
            .ok_or_else(|| EngineError::CursorNotBootstrapped(key.clone()))?;
        let expected_count = task
            .expected_count()
            .map_err(|e| EngineError::config(key, e))?;
        let target = task.target();
        if !target.is_aligned(start) {
            return Err(EngineError::config(
                key,
                format!("cursor {start} is not aligned to {target}"),
            ));
        }
        let interval = task.interval();
        let delay = task.confirmation_delay();
        let lower_bound = target.ceil(task.lower_bound);
        let budget = request.max_windows.max(self.policy.gap_tolerance);

        let mut report = CatchupReport::start(start);
        let mut cursor = start;
        let mut examined = 0u32;
        let mut streak = 0u32;
        let mut streak_start: Option<DateTime<Utc>> = None;

        let exit = loop {
            if cursor < lower_bound {
                report.windows_below_lower_bound += windows_between(cursor, lower_bound, interval);
                cursor = lower_bound;
                checkpoint.commit(cursor).await?;
                continue;
            }
            if examined >= budget {
                break ExitReason::MaxWindows;
            }

            let window = Window::aligned(cursor, target).map_err(|e| EngineError::config(key, e))?;
            if !request.ignore_confirmation_delay && window.end + delay > request.now {
                break ExitReason::ConfirmationBoundary;
            }

            examined += 1;
            let window_request = WindowRequest {
                symbol: key.symbol.clone(),
                source: task.source,
                source_timeframe: task.source_timeframe,
                target_timeframe: target,
                window,
                expected_count,
            };
            let outcome = self
                .aggregator
                .aggregate(self.store, &window_request, request.now)
                .await?;
            report.tally(&outcome);
            cursor = window.end;

            tracing::debug!(
                task = %key,
                window = %window,
                source_count = outcome.source_count(),
                "window processed"
            );

            if matches!(outcome, WindowOutcome::NoData) {
                streak += 1;
                streak_start.get_or_insert(window.start);
                if streak < self.policy.gap_tolerance {
                    continue;
                }
                if let Some(resume) = self.historical_gap_end(task, cursor, request.now).await? {
                    tracing::info!(
                        task = %key,
                        gap_start = ?streak_start,
                        resume = %resume,
                        "skipping historical gap"
                    );
                    report.windows_skipped += windows_between(cursor, resume, interval);
                    cursor = resume;
                    streak = 0;
                    streak_start = None;
                    checkpoint.commit(cursor).await?;
                    continue;
                }
                break ExitReason::Frontier;
            }

            streak = 0;
            streak_start = None;
            checkpoint.commit(cursor).await?;
        };

        if let Some(gap_start) = streak_start {
            cursor = gap_start;
        }

        if cursor < start {
            return Err(EngineError::MonotonicityViolation {
                key: key.clone(),
                before: start,
                after: cursor,
            });
        }

        report.cursor_after = cursor;
        report.exit = exit;
        tracing::info!(
            task = %key,
            from = %start,
            to = %cursor,
            processed = report.windows_processed,
            created = report.bars_created,
            poor_quality = report.poor_quality,
            exit = %exit,
            "catch-up finished"
        );
        Ok(report)
    }

    /// Start of the window holding the next source bar at or after `from`,
    /// if gap skipping is enabled and that bar is older than the backfill
    /// horizon.
    async fn historical_gap_end(
        &self,
        task: &AggregationTask,
        from: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !self.policy.skip_historical_gaps {
            return Ok(None);
        }
        let next = self
            .store
            .next_start(task.source, task.symbol(), task.source_timeframe, from)
            .await?;
        Ok(next
            .filter(|&ts| ts + self.policy.backfill_horizon <= now)
            .map(|ts| task.target().floor(ts)))
    }
}

fn windows_between(from: DateTime<Utc>, to: DateTime<Utc>, interval: TimeDelta) -> u32 {
    let span = (to - from).num_seconds();
    let step = interval.num_seconds().max(1);
    u32::try_from(span / step).unwrap_or(u32::MAX)
}
