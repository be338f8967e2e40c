//! One bounded pass over due tasks.

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use ratchet_aggregate::{QualityPolicy, WindowAggregator};
use ratchet_store::{Repository, StoreError};
use ratchet_types::{AggregationTask, TaskKey, TaskStatus, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    CatchupController, CatchupPolicy, CatchupReport, CatchupRequest, Clock, EngineError,
    FailureClass, LeaseCheckpoint, LifecycleError, LifecyclePolicy, Result, SystemClock,
    bootstrap_cursor, select_due,
};

/// Attempts at writing a finished task before giving up on a contended row.
const FINISH_ATTEMPTS: usize = 3;

/// Limits of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Tasks selected per tick.
    pub max_tasks: usize,
    /// Windows each task may aggregate per run.
    pub max_windows_per_task: u32,
    /// Wall-clock budget; checked before each task is started.
    pub deadline: Option<Duration>,
    /// Tasks processed at the same time.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_tasks: 50,
            max_windows_per_task: 288,
            deadline: Some(Duration::from_secs(50)),
            concurrency: 1,
        }
    }
}

/// Per-call overrides for a single task run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore retry delays and the confirmation delay.
    pub force: bool,
    /// Window budget instead of the configured one.
    pub max_windows: Option<u32>,
}

/// Why a task was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The symbol is paused.
    Paused,
    /// The task is switched off.
    Disabled,
    /// The task is waiting out a retry delay.
    NotDue,
    /// Another worker holds or changed the task.
    Contended,
    /// The tick ran out of time before reaching the task.
    BudgetExhausted,
}

impl SkipReason {
    /// Returns the reason as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::NotDue => "not_due",
            Self::Contended => "contended",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Result of handling one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The run finished and was recorded.
    Completed(CatchupReport),
    /// Nothing was done.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// The run failed and the failure was recorded.
    Failed {
        /// How the failure was accounted.
        class: FailureClass,
        /// The error message.
        error: String,
        /// Status the task was left in.
        status: TaskStatus,
    },
}

impl TaskOutcome {
    const fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Returns the catch-up report of a completed run.
    #[must_use]
    pub const fn report(&self) -> Option<&CatchupReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// Returns true if the run failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One task handled during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// The task.
    pub key: TaskKey,
    /// Whether the task is mandatory.
    pub mandatory: bool,
    /// When handling started.
    pub started_at: DateTime<Utc>,
    /// When handling finished.
    pub finished_at: DateTime<Utc>,
    /// What happened.
    pub outcome: TaskOutcome,
}

/// Everything a tick did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Worker that ran the tick.
    pub worker: WorkerId,
    /// When the tick started.
    pub started_at: DateTime<Utc>,
    /// When the tick finished.
    pub finished_at: DateTime<Utc>,
    /// Handled tasks in selection order.
    pub runs: Vec<TaskRun>,
}

impl TickReport {
    /// Number of completed runs.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Completed(_)))
            .count()
    }

    /// Number of failed runs.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_failure()).count()
    }

    /// Number of skipped tasks.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.runs.len() - self.completed() - self.failed()
    }

    /// Windows examined across all completed runs.
    #[must_use]
    pub fn windows_processed(&self) -> u64 {
        self.reports()
            .map(|r| u64::from(r.windows_processed + r.windows_empty))
            .sum()
    }

    /// Derived bars inserted across all completed runs.
    #[must_use]
    pub fn bars_created(&self) -> u64 {
        self.reports().map(|r| u64::from(r.bars_created)).sum()
    }

    /// Degraded bars written across all completed runs.
    #[must_use]
    pub fn poor_quality(&self) -> u64 {
        self.reports().map(|r| u64::from(r.poor_quality)).sum()
    }

    fn reports(&self) -> impl Iterator<Item = &CatchupReport> {
        self.runs.iter().filter_map(|r| r.outcome.report())
    }
}

/// Claims due tasks and drives them forward.
#[derive(Debug)]
pub struct Worker<S: ?Sized> {
    store: Arc<S>,
    id: WorkerId,
    clock: Arc<dyn Clock>,
    aggregator: WindowAggregator,
    lifecycle: LifecyclePolicy,
    catchup: CatchupPolicy,
    config: WorkerConfig,
}

impl<S> Worker<S>
where
    S: Repository + ?Sized,
{
    /// Creates a worker with a fresh id, the system clock and default
    /// policies.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            id: WorkerId::new(),
            clock: Arc::new(SystemClock),
            aggregator: WindowAggregator::new(QualityPolicy::default(), 1),
            lifecycle: LifecyclePolicy::default(),
            catchup: CatchupPolicy::default(),
            config: WorkerConfig::default(),
        }
    }

    /// Sets the worker id.
    #[must_use]
    pub const fn with_id(mut self, id: WorkerId) -> Self {
        self.id = id;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the window aggregator.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: WindowAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Sets the lifecycle policy.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: LifecyclePolicy) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the catch-up policy.
    #[must_use]
    pub const fn with_catchup(mut self, catchup: CatchupPolicy) -> Self {
        self.catchup = catchup;
        self
    }

    /// Sets the tick limits.
    #[must_use]
    pub const fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the worker id.
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns the store.
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the lifecycle policy.
    pub const fn lifecycle(&self) -> &LifecyclePolicy {
        &self.lifecycle
    }

    /// Selects due tasks and runs them until the task count or the deadline
    /// is reached.
    ///
    /// Failures of individual tasks are recorded on the tasks and in the
    /// report; they never abort the tick.
    ///
    /// # Errors
    ///
    /// Returns an error only if the task table or pause flags cannot be
    /// read.
    pub async fn tick(&self) -> Result<TickReport> {
        let started_at = self.clock.now();
        let deadline = self.config.deadline.map(|d| Instant::now() + d);

        let tasks = self.store.list_tasks().await?;
        let paused = self.store.paused_symbols().await?;
        let due: Vec<AggregationTask> = select_due(
            &tasks,
            &paused,
            &self.lifecycle,
            started_at,
            self.config.max_tasks,
        )
        .into_iter()
        .cloned()
        .collect();

        tracing::debug!(
            worker = %self.id,
            total = tasks.len(),
            due = due.len(),
            "tick started"
        );

        let runs: Vec<TaskRun> = stream::iter(due)
            .map(|task| self.process(task, RunOptions::default(), deadline))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = TickReport {
            worker: self.id,
            started_at,
            finished_at: self.clock.now(),
            runs,
        };
        tracing::info!(
            worker = %self.id,
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            bars_created = report.bars_created(),
            "tick finished"
        );
        Ok(report)
    }

    /// Runs one task now, whether or not the selector would pick it.
    ///
    /// With `force` the retry delay and the confirmation delay are ignored.
    /// A live lease held by another worker is still respected.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or cannot be read.
    pub async fn run_task(&self, key: &TaskKey, options: RunOptions) -> Result<TaskRun> {
        let task = self
            .store
            .get_task(key)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(key.clone()))?;
        Ok(self.process(task, options, None).await)
    }

    /// Returns a failed or disabled task to rotation.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist, is running under a live
    /// lease, or changed concurrently.
    pub async fn reset_task(&self, key: &TaskKey) -> Result<AggregationTask> {
        let task = self
            .store
            .get_task(key)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(key.clone()))?;
        let version = task.version;
        let mut next = task;
        self.lifecycle.reset(&mut next, self.clock.now())?;
        let stored = self.store.compare_and_swap(next, version).await?;
        tracing::info!(task = %key, "task reset");
        Ok(stored)
    }

    async fn process(
        &self,
        task: AggregationTask,
        options: RunOptions,
        deadline: Option<Instant>,
    ) -> TaskRun {
        let started_at = self.clock.now();
        let key = task.key.clone();
        let mandatory = task.mandatory;

        let outcome = if deadline.is_some_and(|d| Instant::now() >= d) {
            TaskOutcome::skipped(SkipReason::BudgetExhausted)
        } else {
            self.execute(task, options).await
        };

        TaskRun {
            key,
            mandatory,
            started_at,
            finished_at: self.clock.now(),
            outcome,
        }
    }

    async fn execute(&self, task: AggregationTask, options: RunOptions) -> TaskOutcome {
        let key = task.key.clone();

        match self.store.paused_symbols().await {
            Ok(paused) if paused.contains(task.symbol()) => {
                tracing::debug!(task = %key, "symbol paused");
                return TaskOutcome::skipped(SkipReason::Paused);
            }
            Ok(_) => {}
            Err(e) => return unrecorded(&task, &EngineError::from(e)),
        }

        let claimed = match self.claim(task, options.force).await {
            Ok(claimed) => claimed,
            Err(reason) => return TaskOutcome::skipped(reason),
        };

        let result = self.run_claimed(claimed, options).await;
        self.finish(&key, result).await
    }

    async fn claim(
        &self,
        task: AggregationTask,
        force: bool,
    ) -> std::result::Result<AggregationTask, SkipReason> {
        let version = task.version;
        let mut next = task;
        if let Err(e) = self
            .lifecycle
            .claim(&mut next, self.id, self.clock.now(), force)
        {
            tracing::debug!(task = %next.key, reason = %e, "claim refused");
            return Err(match e {
                LifecycleError::Disabled(_) => SkipReason::Disabled,
                LifecycleError::NotYetEligible { .. } => SkipReason::NotDue,
                _ => SkipReason::Contended,
            });
        }

        let key = next.key.clone();
        match self.store.compare_and_swap(next, version).await {
            Ok(claimed) => Ok(claimed),
            Err(e) => {
                tracing::debug!(task = %key, error = %e, "lost claim race");
                Err(SkipReason::Contended)
            }
        }
    }

    async fn run_claimed(
        &self,
        mut task: AggregationTask,
        options: RunOptions,
    ) -> Result<CatchupReport> {
        let now = self.clock.now();
        let store = &*self.store;

        if task.cursor.is_none() {
            let cursor = bootstrap_cursor(store, &task, now).await?;
            store
                .checkpoint_cursor(&task.key, self.id, cursor, now)
                .await?;
            task.cursor = Some(cursor);
        }

        let controller = CatchupController::new(store, &self.aggregator, self.catchup);
        let checkpoint = LeaseCheckpoint::new(store, &task.key, self.id, now);
        let request = CatchupRequest {
            max_windows: options
                .max_windows
                .unwrap_or(self.config.max_windows_per_task),
            now,
            ignore_confirmation_delay: options.force,
        };
        controller.run(&task, request, &checkpoint).await
    }

    /// Records the run on the task. Checkpoints bump the row version, so the
    /// row is re-read first; only the lease holder writes.
    async fn finish(&self, key: &TaskKey, result: Result<CatchupReport>) -> TaskOutcome {
        for _ in 0..FINISH_ATTEMPTS {
            let now = self.clock.now();
            let current = match self.store.get_task(key).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::error!(task = %key, "task vanished while running");
                    return TaskOutcome::skipped(SkipReason::Contended);
                }
                Err(e) => {
                    tracing::error!(task = %key, error = %e, "cannot read task to record run");
                    return TaskOutcome::Failed {
                        class: EngineError::from(e).class(),
                        error: format!("recording run: {key}"),
                        status: TaskStatus::Running,
                    };
                }
            };
            if !current.is_leased_by(self.id) {
                tracing::warn!(
                    task = %key,
                    holder = ?current.lease_holder,
                    "lease lost, discarding run"
                );
                return TaskOutcome::skipped(SkipReason::Contended);
            }

            let version = current.version;
            let mut next = current;
            let outcome = match self.transition(&mut next, &result, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(task = %key, reason = %e, "cannot record run");
                    return TaskOutcome::skipped(SkipReason::Contended);
                }
            };
            let mandatory = next.mandatory;

            match self.store.compare_and_swap(next, version).await {
                Ok(_) => {
                    log_outcome(key, mandatory, &outcome);
                    return outcome;
                }
                Err(StoreError::VersionConflict { .. }) => {}
                Err(e) => {
                    tracing::error!(task = %key, error = %e, "cannot record run");
                    return TaskOutcome::Failed {
                        class: EngineError::from(e).class(),
                        error: format!("recording run: {key}"),
                        status: TaskStatus::Running,
                    };
                }
            }
        }

        tracing::warn!(task = %key, "task kept changing while recording run");
        TaskOutcome::skipped(SkipReason::Contended)
    }

    fn transition(
        &self,
        task: &mut AggregationTask,
        result: &Result<CatchupReport>,
        now: DateTime<Utc>,
    ) -> std::result::Result<TaskOutcome, LifecycleError> {
        match result {
            Ok(report) => {
                self.lifecycle.finish_success(task, self.id, report, now)?;
                Ok(TaskOutcome::Completed(report.clone()))
            }
            Err(e) => {
                let class = e.class();
                let error = e.to_string();
                let status = self
                    .lifecycle
                    .finish_failure(task, self.id, class, &error, now)?;
                Ok(TaskOutcome::Failed {
                    class,
                    error,
                    status,
                })
            }
        }
    }
}

/// Outcome for a failure hit before the task could be claimed.
fn unrecorded(task: &AggregationTask, error: &EngineError) -> TaskOutcome {
    tracing::warn!(task = %task.key, error = %error, "task not started");
    TaskOutcome::Failed {
        class: error.class(),
        error: error.to_string(),
        status: task.status,
    }
}

fn log_outcome(key: &TaskKey, mandatory: bool, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Completed(report) => tracing::debug!(
            task = %key,
            cursor = %report.cursor_after,
            exit = %report.exit,
            "task completed"
        ),
        TaskOutcome::Failed {
            class: FailureClass::Transient | FailureClass::Contended,
            error,
            status,
        } => tracing::warn!(task = %key, mandatory, %status, reason = %error, "task failed"),
        TaskOutcome::Failed {
            class,
            error,
            status,
        } => tracing::error!(
            task = %key,
            mandatory,
            %class,
            %status,
            reason = %error,
            "task failed"
        ),
        TaskOutcome::Skipped { .. } => {}
    }
}
