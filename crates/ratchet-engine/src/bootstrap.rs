//! First-run cursor placement.

use chrono::{DateTime, Utc};
use ratchet_store::BarStore;
use ratchet_types::{AggregationTask, Timeframe};

use crate::{EngineError, Result};

/// Computes where a fresh task's cursor starts.
///
/// Without source data the cursor waits at the next boundary after `now`.
/// Otherwise it points at the last complete window before the newest source
/// bar, so the first run re-validates it. Either way it never starts more
/// than one window before `lower_bound`.
#[must_use]
pub fn initial_cursor(
    target: Timeframe,
    latest_source: Option<DateTime<Utc>>,
    lower_bound: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let cursor = latest_source.map_or_else(
        || target.next_boundary_after(now),
        |latest| target.floor(latest) - target.duration(),
    );
    let earliest = target.floor(lower_bound) - target.duration();
    cursor.max(earliest)
}

/// Reads the newest source bar and computes the task's initial cursor.
///
/// # Errors
///
/// Returns a configuration error if the task's timeframes are incompatible,
/// or a store error if the read fails.
pub async fn bootstrap_cursor<S>(
    store: &S,
    task: &AggregationTask,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>>
where
    S: BarStore + ?Sized,
{
    task.expected_count()
        .map_err(|e| EngineError::config(&task.key, e))?;

    let latest = store
        .latest_start(task.source, task.symbol(), task.source_timeframe)
        .await?;
    let cursor = initial_cursor(task.target(), latest, task.lower_bound, now);

    tracing::info!(
        task = %task.key,
        latest_source = ?latest,
        cursor = %cursor,
        "bootstrapped cursor"
    );
    Ok(cursor)
}
