//! Task state machine: claims, soft leases and failure accounting.
//!
//! Transitions are pure functions over an [`AggregationTask`]; callers persist
//! the result with a compare-and-swap on the row's version.

use chrono::{DateTime, TimeDelta, Utc};
use ratchet_types::{AggregationTask, TaskStatus, WorkerId};

use crate::{CatchupReport, ExitReason, FailureClass, LifecycleError};

/// Timing and failure limits for task transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Age after which a running task's lease is considered abandoned.
    pub lease_timeout: TimeDelta,
    /// Consecutive hard failures before a task leaves rotation.
    pub max_hard_failures: u32,
    /// Delay before retrying after a transient failure.
    pub transient_retry: TimeDelta,
    /// Delay before retrying after a hard failure below the limit.
    pub hard_retry: TimeDelta,
    /// Delay between retries of a mandatory task in the alarm state.
    pub alarm_retry: TimeDelta,
    /// Delay before looking past the frontier again.
    pub frontier_backoff: TimeDelta,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            lease_timeout: TimeDelta::seconds(150),
            max_hard_failures: 3,
            transient_retry: TimeDelta::seconds(30),
            hard_retry: TimeDelta::minutes(5),
            alarm_retry: TimeDelta::minutes(15),
            frontier_backoff: TimeDelta::minutes(1),
        }
    }
}

impl LifecyclePolicy {
    /// Returns true if `task` is running under a lease older than the timeout.
    #[must_use]
    pub fn lease_expired(&self, task: &AggregationTask, now: DateTime<Utc>) -> bool {
        task.status == TaskStatus::Running
            && task
                .lease_started_at
                .is_none_or(|since| since + self.lease_timeout <= now)
    }

    /// Returns true if `task` may be claimed at `now`.
    #[must_use]
    pub fn is_due(&self, task: &AggregationTask, now: DateTime<Utc>) -> bool {
        if !task.enabled {
            return false;
        }
        match task.status {
            TaskStatus::Idle | TaskStatus::HardFailed => {
                task.next_eligible_at.is_none_or(|at| at <= now)
            }
            TaskStatus::Running => self.lease_expired(task, now),
            TaskStatus::Disabled => false,
        }
    }

    /// Takes the lease on `task` for `worker`.
    ///
    /// `force` skips the retry delay but never an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is disabled, still inside its retry
    /// delay, or leased by a live worker.
    pub fn claim(
        &self,
        task: &mut AggregationTask,
        worker: WorkerId,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<(), LifecycleError> {
        if !task.enabled || task.status == TaskStatus::Disabled {
            return Err(LifecycleError::Disabled(task.key.clone()));
        }
        match task.status {
            TaskStatus::Running if !self.lease_expired(task, now) => {
                return Err(LifecycleError::LeaseHeld {
                    key: task.key.clone(),
                    holder: task.lease_holder,
                    since: task.lease_started_at,
                });
            }
            TaskStatus::Running => {
                tracing::warn!(
                    task = %task.key,
                    previous_holder = ?task.lease_holder,
                    since = ?task.lease_started_at,
                    "reclaiming abandoned lease"
                );
            }
            _ => {
                if let Some(at) = task.next_eligible_at.filter(|at| *at > now && !force) {
                    return Err(LifecycleError::NotYetEligible {
                        key: task.key.clone(),
                        at,
                    });
                }
            }
        }

        task.status = TaskStatus::Running;
        task.lease_started_at = Some(now);
        task.lease_holder = Some(worker);
        task.last_attempt_at = Some(now);
        task.updated_at = now;
        Ok(())
    }

    /// Records a successful run and releases the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if `worker` does not hold the lease.
    pub fn finish_success(
        &self,
        task: &mut AggregationTask,
        worker: WorkerId,
        report: &CatchupReport,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        ensure_holder(task, worker)?;

        task.cursor = Some(report.cursor_after);
        task.total_runs += 1;
        task.total_created += u64::from(report.bars_created);
        task.total_poor_quality += u64::from(report.poor_quality);
        task.hard_fail_streak = 0;
        task.last_error = None;
        task.last_success_at = Some(now);
        task.next_eligible_at = Some(match report.exit {
            ExitReason::MaxWindows => now,
            ExitReason::ConfirmationBoundary => {
                report.cursor_after + task.interval() + task.confirmation_delay()
            }
            ExitReason::Frontier => now + self.frontier_backoff,
        });
        release(task, TaskStatus::Idle, now);
        Ok(())
    }

    /// Records a failed run, releases the lease and returns the new status.
    ///
    /// Transient failures only delay the task. Hard failures extend the
    /// streak; fatal ones max it out. A streak at the limit sends mandatory
    /// tasks to [`TaskStatus::HardFailed`] and disables optional ones.
    ///
    /// # Errors
    ///
    /// Returns an error if `worker` does not hold the lease.
    pub fn finish_failure(
        &self,
        task: &mut AggregationTask,
        worker: WorkerId,
        class: FailureClass,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, LifecycleError> {
        ensure_holder(task, worker)?;

        task.total_runs += 1;
        task.last_error = Some(message.to_string());

        let limit = self.max_hard_failures.max(1);
        let status = match class {
            FailureClass::Transient | FailureClass::Contended => {
                task.next_eligible_at = Some(now + self.transient_retry);
                TaskStatus::Idle
            }
            FailureClass::Hard | FailureClass::Fatal => {
                task.hard_fail_streak += 1;
                if class == FailureClass::Fatal {
                    task.hard_fail_streak = task.hard_fail_streak.max(limit);
                }
                if task.hard_fail_streak < limit {
                    task.next_eligible_at = Some(now + self.hard_retry);
                    TaskStatus::Idle
                } else if task.mandatory {
                    task.next_eligible_at = Some(now + self.alarm_retry);
                    TaskStatus::HardFailed
                } else {
                    task.enabled = false;
                    task.next_eligible_at = None;
                    TaskStatus::Disabled
                }
            }
        };

        release(task, status, now);
        Ok(status)
    }

    /// Returns a failed or disabled task to rotation. Operator action.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is running.
    pub fn reset(&self, task: &mut AggregationTask, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if task.status == TaskStatus::Running && !self.lease_expired(task, now) {
            return Err(LifecycleError::InvalidStatus {
                key: task.key.clone(),
                status: task.status,
            });
        }
        task.enabled = true;
        task.hard_fail_streak = 0;
        task.next_eligible_at = None;
        task.last_error = None;
        release(task, TaskStatus::Idle, now);
        Ok(())
    }
}

fn ensure_holder(task: &AggregationTask, worker: WorkerId) -> Result<(), LifecycleError> {
    if task.is_leased_by(worker) {
        Ok(())
    } else {
        Err(LifecycleError::NotLeaseHolder {
            key: task.key.clone(),
            worker,
        })
    }
}

fn release(task: &mut AggregationTask, status: TaskStatus, now: DateTime<Utc>) {
    task.status = status;
    task.lease_started_at = None;
    task.lease_holder = None;
    task.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ratchet_types::{BarSource, Symbol, TaskKey, Timeframe};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    fn task(mandatory: bool) -> AggregationTask {
        let task = AggregationTask::new(
            TaskKey::new(Symbol::new("EURUSD").unwrap(), Timeframe::Minute5),
            Timeframe::Minute1,
            BarSource::Raw,
            now(),
            now(),
        )
        .unwrap();
        if mandatory { task.mandatory() } else { task }
    }

    fn report(exit: ExitReason) -> CatchupReport {
        CatchupReport {
            cursor_before: now() - TimeDelta::minutes(30),
            cursor_after: now() - TimeDelta::minutes(10),
            windows_processed: 4,
            windows_empty: 0,
            windows_sparse: 0,
            windows_skipped: 0,
            windows_below_lower_bound: 0,
            bars_created: 3,
            bars_updated: 1,
            bars_unchanged: 0,
            poor_quality: 1,
            exit,
        }
    }

    #[test]
    fn test_claim_takes_lease() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(true);

        policy.claim(&mut task, worker, now(), false).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.is_leased_by(worker));
        assert_eq!(task.lease_started_at, Some(now()));

        let err = policy
            .claim(&mut task, WorkerId::new(), now() + TimeDelta::seconds(60), false)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::LeaseHeld { .. }));
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let policy = LifecyclePolicy::default();
        let (first, second) = (WorkerId::new(), WorkerId::new());
        let mut task = task(true);
        policy.claim(&mut task, first, now(), false).unwrap();

        let later = now() + TimeDelta::seconds(150);
        assert!(policy.is_due(&task, later));
        policy.claim(&mut task, second, later, false).unwrap();
        assert!(task.is_leased_by(second));
        assert!(!task.is_leased_by(first));
    }

    #[test]
    fn test_retry_delay_respected_unless_forced() {
        let policy = LifecyclePolicy::default();
        let mut task = task(false);
        task.next_eligible_at = Some(now() + TimeDelta::minutes(1));

        assert!(!policy.is_due(&task, now()));
        let err = policy
            .claim(&mut task, WorkerId::new(), now(), false)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotYetEligible { .. }));
        policy.claim(&mut task, WorkerId::new(), now(), true).unwrap();
    }

    #[test]
    fn test_success_resets_streak_and_schedules_next_run() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(true).with_confirmation_delay(60);
        task.hard_fail_streak = 2;
        task.last_error = Some("boom".into());
        policy.claim(&mut task, worker, now(), false).unwrap();

        policy
            .finish_success(&mut task, worker, &report(ExitReason::ConfirmationBoundary), now())
            .unwrap();
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.cursor, Some(now() - TimeDelta::minutes(10)));
        assert_eq!(task.hard_fail_streak, 0);
        assert_eq!(task.total_created, 3);
        assert_eq!(task.total_poor_quality, 1);
        assert!(task.last_error.is_none());
        assert!(task.lease_holder.is_none());
        // Next window [-10, -5) is trusted one minute after it closes.
        assert_eq!(
            task.next_eligible_at,
            Some(now() - TimeDelta::minutes(4))
        );

        policy.claim(&mut task, worker, now(), false).unwrap();
        policy
            .finish_success(&mut task, worker, &report(ExitReason::MaxWindows), now())
            .unwrap();
        assert_eq!(task.next_eligible_at, Some(now()));
    }

    #[test]
    fn test_transient_failure_does_not_count() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(false);

        for _ in 0..5 {
            policy.claim(&mut task, worker, now(), true).unwrap();
            let status = policy
                .finish_failure(&mut task, worker, FailureClass::Transient, "timeout", now())
                .unwrap();
            assert_eq!(status, TaskStatus::Idle);
        }
        assert_eq!(task.hard_fail_streak, 0);
        assert_eq!(task.total_runs, 5);
        assert_eq!(task.next_eligible_at, Some(now() + TimeDelta::seconds(30)));
    }

    #[test]
    fn test_hard_failures_disable_optional_task() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(false);

        let mut statuses = Vec::new();
        for _ in 0..3 {
            policy.claim(&mut task, worker, now(), true).unwrap();
            statuses.push(
                policy
                    .finish_failure(&mut task, worker, FailureClass::Hard, "bad bar", now())
                    .unwrap(),
            );
        }
        assert_eq!(
            statuses,
            vec![TaskStatus::Idle, TaskStatus::Idle, TaskStatus::Disabled]
        );
        assert!(!task.enabled);
        assert!(!policy.is_due(&task, now() + TimeDelta::days(1)));
    }

    #[test]
    fn test_hard_failures_flag_mandatory_task_but_keep_retrying() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(true);

        for _ in 0..3 {
            policy.claim(&mut task, worker, now(), true).unwrap();
            policy
                .finish_failure(&mut task, worker, FailureClass::Hard, "bad bar", now())
                .unwrap();
        }
        assert_eq!(task.status, TaskStatus::HardFailed);
        assert!(task.enabled);
        assert!(!policy.is_due(&task, now()));
        assert!(policy.is_due(&task, now() + TimeDelta::minutes(15)));

        // A later success clears the alarm.
        let later = now() + TimeDelta::minutes(15);
        policy.claim(&mut task, worker, later, false).unwrap();
        policy
            .finish_success(&mut task, worker, &report(ExitReason::Frontier), later)
            .unwrap();
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.hard_fail_streak, 0);
    }

    #[test]
    fn test_fatal_failure_trips_immediately() {
        let policy = LifecyclePolicy::default();
        let worker = WorkerId::new();
        let mut task = task(false);
        policy.claim(&mut task, worker, now(), false).unwrap();
        let status = policy
            .finish_failure(&mut task, worker, FailureClass::Fatal, "no cursor", now())
            .unwrap();
        assert_eq!(status, TaskStatus::Disabled);
    }

    #[test]
    fn test_only_lease_holder_finishes() {
        let policy = LifecyclePolicy::default();
        let mut task = task(true);
        policy.claim(&mut task, WorkerId::new(), now(), false).unwrap();
        let err = policy
            .finish_success(&mut task, WorkerId::new(), &report(ExitReason::Frontier), now())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotLeaseHolder { .. }));
    }

    #[test]
    fn test_reset_returns_task_to_rotation() {
        let policy = LifecyclePolicy::default();
        let mut task = task(false);
        task.status = TaskStatus::Disabled;
        task.enabled = false;
        task.hard_fail_streak = 3;

        policy.reset(&mut task, now()).unwrap();
        assert_eq!(task.status, TaskStatus::Idle);
        assert!(task.enabled);
        assert!(policy.is_due(&task, now()));
    }
}
