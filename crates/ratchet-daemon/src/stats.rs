//! Cumulative scheduler statistics.
//!
//! Counters are shared between the scheduler loop and readers and are
//! checkpointed to disk at most once per save interval.

use chrono::{DateTime, Utc};
use ratchet_engine::TickReport;
use ratchet_store::ReconcileReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::{DaemonError, Result, StateDir};

/// Totals since the scheduler started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// When the scheduler started.
    pub started_at: Option<DateTime<Utc>>,
    /// Ticks run.
    pub ticks: u64,
    /// Registry syncs run.
    pub syncs: u64,
    /// Task runs that completed.
    pub tasks_completed: u64,
    /// Task runs that failed.
    pub tasks_failed: u64,
    /// Tasks skipped.
    pub tasks_skipped: u64,
    /// Derived bars inserted.
    pub bars_created: u64,
    /// Degraded bars written.
    pub poor_quality: u64,
    /// Tasks created by registry syncs.
    pub tasks_created: u64,
    /// Tasks disabled by registry syncs.
    pub tasks_disabled: u64,
    /// When the last tick finished.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// When the last sync finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Most recent scheduler-level error.
    pub last_error: Option<String>,
}

impl SchedulerStats {
    /// Adds a tick's outcome.
    pub fn record_tick(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.tasks_completed += report.completed() as u64;
        self.tasks_failed += report.failed() as u64;
        self.tasks_skipped += report.skipped() as u64;
        self.bars_created += report.bars_created();
        self.poor_quality += report.poor_quality();
        self.last_tick_at = Some(report.finished_at);
    }

    /// Adds a sync's outcome.
    pub fn record_sync(&mut self, report: &ReconcileReport, at: DateTime<Utc>) {
        self.syncs += 1;
        self.tasks_created += report.created.len() as u64;
        self.tasks_disabled += report.disabled.len() as u64;
        self.last_sync_at = Some(at);
    }
}

/// Thread-safe statistics with periodic checkpointing to `stats.json`.
#[derive(Debug)]
pub struct StatsTracker {
    state: StateDir,
    stats: Arc<RwLock<SchedulerStats>>,
    save_interval: Duration,
    last_save: std::sync::Mutex<Instant>,
}

impl StatsTracker {
    /// Default interval between checkpoints.
    pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(10);

    /// Creates a tracker starting from `stats`.
    #[must_use]
    pub fn new(state: StateDir, stats: SchedulerStats) -> Self {
        Self::with_save_interval(state, stats, Self::DEFAULT_SAVE_INTERVAL)
    }

    /// Creates a tracker with a custom checkpoint interval.
    #[must_use]
    pub fn with_save_interval(
        state: StateDir,
        stats: SchedulerStats,
        save_interval: Duration,
    ) -> Self {
        Self {
            state,
            stats: Arc::new(RwLock::new(stats)),
            save_interval,
            last_save: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Reads the last checkpoint, or empty stats if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint exists but cannot be read or
    /// parsed.
    pub fn load(state: &StateDir) -> Result<SchedulerStats> {
        let path = state.stats_path();
        if !path.exists() {
            return Ok(SchedulerStats::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| DaemonError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| DaemonError::ParseJson { path, source: e })
    }

    /// Records a tick and checkpoints if the interval has passed.
    pub async fn record_tick(&self, report: &TickReport) {
        self.stats.write().await.record_tick(report);
        self.maybe_save_checkpoint().await;
    }

    /// Records a sync and checkpoints if the interval has passed.
    pub async fn record_sync(&self, report: &ReconcileReport, at: DateTime<Utc>) {
        self.stats.write().await.record_sync(report, at);
        self.maybe_save_checkpoint().await;
    }

    /// Records a scheduler-level error. Always checkpoints.
    pub async fn record_error(&self, error: &str) {
        self.stats.write().await.last_error = Some(error.to_string());
        if let Err(e) = self.save_checkpoint().await {
            tracing::warn!(error = %e, "failed to save stats");
        }
    }

    /// Marks the start of a scheduler run.
    pub async fn mark_started(&self, at: DateTime<Utc>) {
        self.stats.write().await.started_at = Some(at);
    }

    /// Writes the stats to disk now.
    ///
    /// # Errors
    ///
    /// Returns an error if the stats cannot be serialized or written.
    pub async fn save_checkpoint(&self) -> Result<()> {
        let stats = self.stats.read().await;
        let path = self.state.stats_path();
        let json = serde_json::to_string_pretty(&*stats)?;
        fs::write(&path, json).map_err(|e| DaemonError::WriteFile { path, source: e })?;

        if let Ok(mut last_save) = self.last_save.lock() {
            *last_save = Instant::now();
        }

        Ok(())
    }

    async fn maybe_save_checkpoint(&self) {
        let should_save = self
            .last_save
            .lock()
            .map_or(true, |last_save| last_save.elapsed() >= self.save_interval);

        if should_save {
            if let Err(e) = self.save_checkpoint().await {
                tracing::warn!(error = %e, "failed to save stats");
            }
        }
    }

    /// Returns a copy of the current stats.
    pub async fn snapshot(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }
}

impl Clone for StatsTracker {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            stats: Arc::clone(&self.stats),
            save_interval: self.save_interval,
            last_save: std::sync::Mutex::new(
                self.last_save.lock().map_or(Instant::now(), |g| *g),
            ),
        }
    }
}
