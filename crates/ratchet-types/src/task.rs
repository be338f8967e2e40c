//! Aggregation task records.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{BarSource, Symbol, Timeframe, TypesError, WorkerId};

/// Identity of a task: one rollup target per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    /// The symbol being rolled up.
    pub symbol: Symbol,
    /// The timeframe being produced.
    pub target: Timeframe,
}

impl TaskKey {
    /// Creates a task key.
    #[must_use]
    pub const fn new(symbol: Symbol, target: Timeframe) -> Self {
        Self { symbol, target }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.target)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    #[default]
    Idle,
    /// Claimed by a worker holding a lease.
    Running,
    /// Mandatory task that exceeded its failure limit; still retried.
    HardFailed,
    /// Optional task switched off after repeated failures.
    Disabled,
}

impl TaskStatus {
    /// Returns true if the status signals a failure that needs attention.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::HardFailed | Self::Disabled)
    }

    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::HardFailed => "hard_failed",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rollup task and its persisted runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationTask {
    /// Symbol and target timeframe.
    pub key: TaskKey,
    /// Timeframe of the bars rolled up.
    pub source_timeframe: Timeframe,
    /// Store side the source bars are read from.
    pub source: BarSource,
    /// Seconds to wait after a window closes before trusting it.
    pub confirmation_delay_secs: i64,
    /// Earliest window start this task may process.
    pub lower_bound: DateTime<Utc>,
    /// Mandatory tasks are never disabled automatically.
    pub mandatory: bool,
    /// Disabled tasks are never selected.
    pub enabled: bool,
    /// Higher values are selected first among equals.
    #[serde(default)]
    pub priority: i32,

    /// Start of the next unprocessed window; unset until bootstrapped.
    pub cursor: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// When the current lease was taken.
    pub lease_started_at: Option<DateTime<Utc>>,
    /// Worker holding the current lease.
    pub lease_holder: Option<WorkerId>,
    /// Consecutive hard failures.
    pub hard_fail_streak: u32,
    /// Finished runs, successful or not.
    pub total_runs: u64,
    /// Derived bars inserted over the task's lifetime.
    pub total_created: u64,
    /// Degraded bars written over the task's lifetime.
    pub total_poor_quality: u64,
    /// Not selectable before this instant.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// When the task was last claimed.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the task last finished successfully.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl AggregationTask {
    /// Creates an idle, enabled, not yet bootstrapped task.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is not an integer multiple of `source`.
    pub fn new(
        key: TaskKey,
        source_timeframe: Timeframe,
        source: BarSource,
        lower_bound: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, TypesError> {
        if key.target.ratio_to(source_timeframe).is_none() {
            return Err(TypesError::IncompatibleTimeframes {
                source_tf: source_timeframe,
                target: key.target,
            });
        }
        let lower_bound = key.target.floor(lower_bound);
        Ok(Self {
            key,
            source_timeframe,
            source,
            confirmation_delay_secs: 0,
            lower_bound,
            mandatory: false,
            enabled: true,
            priority: 0,
            cursor: None,
            status: TaskStatus::Idle,
            lease_started_at: None,
            lease_holder: None,
            hard_fail_streak: 0,
            total_runs: 0,
            total_created: 0,
            total_poor_quality: 0,
            next_eligible_at: None,
            last_attempt_at: None,
            last_success_at: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets the confirmation delay.
    #[must_use]
    pub const fn with_confirmation_delay(mut self, secs: i64) -> Self {
        self.confirmation_delay_secs = secs;
        self
    }

    /// Marks the task as mandatory.
    #[must_use]
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Sets the selection priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the target timeframe.
    #[must_use]
    pub const fn target(&self) -> Timeframe {
        self.key.target
    }

    /// Returns the symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.key.symbol
    }

    /// Window length, which is the target timeframe's duration.
    #[must_use]
    pub const fn interval(&self) -> TimeDelta {
        self.key.target.duration()
    }

    /// Source bars per complete window.
    ///
    /// # Errors
    ///
    /// Returns an error if the task's timeframes are incompatible, which can
    /// only happen for rows edited outside [`Self::new`].
    pub fn expected_count(&self) -> Result<u32, TypesError> {
        self.key
            .target
            .ratio_to(self.source_timeframe)
            .ok_or(TypesError::IncompatibleTimeframes {
                source_tf: self.source_timeframe,
                target: self.key.target,
            })
    }

    /// Confirmation delay as a [`TimeDelta`].
    #[must_use]
    pub const fn confirmation_delay(&self) -> TimeDelta {
        TimeDelta::seconds(self.confirmation_delay_secs)
    }

    /// Returns true if `worker` holds the task's lease.
    #[must_use]
    pub fn is_leased_by(&self, worker: WorkerId) -> bool {
        self.status == TaskStatus::Running && self.lease_holder == Some(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> TaskKey {
        TaskKey::new(Symbol::new("EURUSD").unwrap(), Timeframe::Minute5)
    }

    #[test]
    fn test_new_task_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let lower = Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap();
        let task = AggregationTask::new(key(), Timeframe::Minute1, BarSource::Raw, lower, now)
            .unwrap()
            .mandatory()
            .with_confirmation_delay(60);

        assert_eq!(task.status, TaskStatus::Idle);
        assert!(task.enabled);
        assert!(task.mandatory);
        assert!(task.cursor.is_none());
        assert_eq!(task.expected_count().unwrap(), 5);
        assert_eq!(task.interval(), TimeDelta::minutes(5));
        assert_eq!(task.confirmation_delay(), TimeDelta::seconds(60));
        // Lower bound is floored onto the target grid.
        assert_eq!(
            task.lower_bound,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_incompatible_timeframes_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let err = AggregationTask::new(key(), Timeframe::Minute5, BarSource::Raw, now, now)
            .unwrap_err();
        assert!(matches!(err, TypesError::IncompatibleTimeframes { .. }));
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::HardFailed.to_string(), "hard_failed");
        assert!(TaskStatus::Disabled.is_failed());
        assert!(!TaskStatus::Running.is_failed());
    }

    #[test]
    fn test_task_key_display() {
        assert_eq!(key().to_string(), "EURUSD/m5");
    }
}
