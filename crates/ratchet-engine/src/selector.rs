//! Due-task selection for one tick.

use chrono::{DateTime, Utc};
use ratchet_types::{AggregationTask, Symbol, TaskKey, Timeframe};
use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::LifecyclePolicy;

/// Returns up to `limit` tasks that may be claimed at `now`, best first.
///
/// Tasks of paused symbols are left out. Ordering: mandatory before
/// optional, finer targets before coarser ones so higher rollups see fresh
/// inputs, higher priority first, then the task that succeeded longest ago.
#[must_use]
pub fn select_due<'a>(
    tasks: &'a [AggregationTask],
    paused: &BTreeSet<Symbol>,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<&'a AggregationTask> {
    let mut due: Vec<&AggregationTask> = tasks
        .iter()
        .filter(|task| !paused.contains(task.symbol()))
        .filter(|task| policy.is_due(task, now))
        .collect();

    due.sort_by(|a, b| rank(a).cmp(&rank(b)));
    due.truncate(limit);
    due
}

fn rank(
    task: &AggregationTask,
) -> (Reverse<bool>, Timeframe, Reverse<i32>, Option<DateTime<Utc>>, &TaskKey) {
    (
        Reverse(task.mandatory),
        task.target(),
        Reverse(task.priority),
        task.last_success_at,
        &task.key,
    )
}
