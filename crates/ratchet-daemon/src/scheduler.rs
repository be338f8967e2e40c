//! Periodic driver of the worker and the registry synchronizer.

use ratchet_engine::{Clock, RegistrySynchronizer, SystemClock, TickReport, Worker};
use ratchet_store::{ReconcileReport, Repository};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::{RatchetConfig, Result, StateDir, StatsTracker};

/// Runs a tick every interval and a registry sync every few ticks.
#[derive(Debug)]
pub struct Scheduler<S: ?Sized> {
    worker: Worker<S>,
    synchronizer: RegistrySynchronizer,
    clock: Arc<dyn Clock>,
    state: StateDir,
    stats: StatsTracker,
    tick_interval: Duration,
    sync_every: u64,
    keep_runs: usize,
}

impl<S> Scheduler<S>
where
    S: Repository + ?Sized,
{
    /// Builds a scheduler over `store` from `config`.
    pub fn new(store: Arc<S>, config: &RatchetConfig, state: StateDir, stats: StatsTracker) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let worker = Worker::new(store)
            .with_clock(Arc::clone(&clock))
            .with_aggregator(config.aggregator())
            .with_lifecycle(config.lifecycle_policy())
            .with_catchup(config.catchup_policy())
            .with_config(config.worker_config());

        Self {
            worker,
            synchronizer: RegistrySynchronizer::new(config.rollup_plan()),
            clock,
            state,
            stats,
            tick_interval: config.scheduler.tick_interval(),
            sync_every: config.scheduler.sync_every_ticks.max(1),
            keep_runs: config.scheduler.keep_run_reports,
        }
    }

    /// Replaces the clock of the scheduler and its worker.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.worker = self.worker.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Returns the worker.
    pub const fn worker(&self) -> &Worker<S> {
        &self.worker
    }

    /// Returns the statistics tracker.
    pub const fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    /// Reconciles the task table with the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the reconcile.
    pub async fn sync(&self) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let report = self.synchronizer.sync(&**self.worker.store(), now).await?;
        self.stats.record_sync(&report, now).await;
        Ok(report)
    }

    /// Runs tick number `tick`: a sync first if it is due, then the worker.
    /// The report is appended to the run log.
    ///
    /// A failed sync is logged and does not stop the tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot read the task table.
    pub async fn tick_once(&self, tick: u64) -> Result<TickReport> {
        if tick % self.sync_every == 0 {
            if let Err(e) = self.sync().await {
                tracing::error!(error = %e, "registry sync failed");
                self.stats.record_error(&e.to_string()).await;
            }
        }

        let report = self.worker.tick().await?;

        if let Err(e) = self.state.save_tick_report(&report) {
            tracing::warn!(error = %e, "failed to save tick report");
        }
        match self.state.prune_tick_reports(self.keep_runs) {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, "pruned run log"),
            Err(e) => tracing::warn!(error = %e, "failed to prune run log"),
        }
        self.stats.record_tick(&report).await;
        Ok(report)
    }

    /// Ticks until `shutdown` resolves. A tick in progress is finished
    /// first. Returns the number of ticks run.
    ///
    /// # Errors
    ///
    /// Returns an error if the final stats checkpoint cannot be written.
    pub async fn run<F>(&self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        self.stats.mark_started(self.clock.now()).await;
        tracing::info!(
            worker = %self.worker.id(),
            interval_secs = self.tick_interval.as_secs(),
            "scheduler started"
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    match self.tick_once(ticks).await {
                        Ok(report) if report.failed() > 0 => tracing::warn!(
                            tick = ticks,
                            failed = report.failed(),
                            "tick finished with failures"
                        ),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(tick = ticks, error = %e, "tick failed");
                            self.stats.record_error(&e.to_string()).await;
                        }
                    }
                    ticks += 1;
                }
            }
        }

        self.stats.save_checkpoint().await?;
        tracing::info!(ticks, "scheduler stopped");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use ratchet_engine::ManualClock;
    use ratchet_store::{MemoryStore, RegistryStore, TaskStore};
    use ratchet_types::{Bar, RegistryEntry, Symbol, Timeframe};
    use tempfile::TempDir;

    use crate::SchedulerStats;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let symbol = Symbol::new("EURUSD").unwrap();
        store
            .put_registry_entry(RegistryEntry::active(symbol.clone(), Timeframe::Minute1))
            .await
            .unwrap();
        store
            .insert_raw_bars((0..30).map(|minute| {
                Bar::new(
                    symbol.clone(),
                    Timeframe::Minute1,
                    t0() + TimeDelta::minutes(minute),
                    1.0,
                    1.1,
                    0.9,
                    1.0,
                    5.0,
                )
            }))
            .unwrap();
        store
    }

    /// Moves one second forward on every reading so each tick report gets
    /// its own file.
    #[derive(Debug)]
    struct SteppingClock(std::sync::Mutex<DateTime<Utc>>);

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut now = self.0.lock().unwrap();
            *now += TimeDelta::seconds(1);
            *now
        }
    }

    fn scheduler(
        store: Arc<MemoryStore>,
        dir: &TempDir,
        clock: Arc<dyn Clock>,
    ) -> (Scheduler<MemoryStore>, StateDir) {
        let state = StateDir::new(dir.path().to_path_buf()).unwrap();
        let stats = StatsTracker::new(state.clone(), SchedulerStats::default());
        let scheduler = Scheduler::new(store, &RatchetConfig::default(), state.clone(), stats)
            .with_clock(clock);
        (scheduler, state)
    }

    #[tokio::test]
    async fn test_first_tick_syncs_and_runs() {
        let dir = TempDir::new().unwrap();
        let store = store().await;
        let clock = Arc::new(ManualClock::new(t0() + TimeDelta::hours(1)));
        let (scheduler, state) = scheduler(Arc::clone(&store), &dir, clock);

        let report = scheduler.tick_once(0).await.unwrap();
        assert_eq!(store.list_tasks().await.unwrap().len(), 2);
        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.failed(), 0);

        let stats = scheduler.stats().snapshot().await;
        assert_eq!(stats.syncs, 1);
        assert_eq!(stats.tasks_created, 2);
        assert_eq!(stats.ticks, 1);
        assert_eq!(state.list_tick_reports(10).unwrap().len(), 1);

        // Not a sync tick.
        scheduler.tick_once(1).await.unwrap();
        assert_eq!(scheduler.stats().snapshot().await.syncs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let store = store().await;
        let clock = Arc::new(SteppingClock(std::sync::Mutex::new(t0() + TimeDelta::hours(1))));
        let (scheduler, state) = scheduler(store, &dir, clock);

        let ticks = scheduler
            .run(tokio::time::sleep(Duration::from_secs(150)))
            .await
            .unwrap();
        assert_eq!(ticks, 3);
        assert_eq!(state.list_tick_reports(10).unwrap().len(), 3);

        let saved = StatsTracker::load(&state).unwrap();
        assert_eq!(saved.ticks, 3);
        assert!(saved.started_at.is_some());
    }
}
