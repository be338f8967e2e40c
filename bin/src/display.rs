//! Display utilities and table formatting for the ratchet CLI.

use chrono::{DateTime, Utc};
use ratchet_lib::{
    AggregationTask, QualityCounters, ReconcileReport, TaskOutcome, TaskRun, TickReport,
};

/// Formats an optional timestamp, or `-` when unset.
pub(crate) fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

/// Print a task table.
pub(crate) fn print_tasks(tasks: &[AggregationTask]) {
    println!(
        "{:<16} {:<6} {:<6} {:<12} {:<4} {:<17} {:>8} {:>6} {:<17}",
        "SYMBOL", "TARGET", "KIND", "STATUS", "ON", "CURSOR", "CREATED", "FAILS", "NEXT"
    );
    println!("{}", "-".repeat(100));

    for task in tasks {
        println!(
            "{:<16} {:<6} {:<6} {:<12} {:<4} {:<17} {:>8} {:>6} {:<17}",
            task.symbol(),
            task.target(),
            if task.mandatory { "chain" } else { "extra" },
            task.status,
            if task.enabled { "yes" } else { "no" },
            fmt_time(task.cursor),
            task.total_created,
            task.hard_fail_streak,
            fmt_time(task.next_eligible_at),
        );
        if let Some(ref err) = task.last_error {
            println!("     Error: {err}");
        }
    }

    println!("\nTotal: {} tasks", tasks.len());
}

/// Print derived bar counts by quality tier.
pub(crate) fn print_quality(counters: &[QualityCounters]) {
    println!(
        "{:<16} {:<6} {:>8} {:>8} {:>8} {:>7} {:<17} {:<17}",
        "SYMBOL", "TF", "FULL", "GOOD", "DEGRADED", "FULL%", "FIRST", "LAST"
    );
    println!("{}", "-".repeat(94));

    for c in counters {
        #[allow(clippy::cast_precision_loss)]
        let full_pct = if c.total() > 0 {
            c.full as f64 / c.total() as f64 * 100.0
        } else {
            0.0
        };
        println!(
            "{:<16} {:<6} {:>8} {:>8} {:>8} {:>6.1}% {:<17} {:<17}",
            c.symbol,
            c.timeframe,
            c.full,
            c.good,
            c.degraded,
            full_pct,
            fmt_time(c.first),
            fmt_time(c.last),
        );
    }
}

/// One-line description of a task outcome.
pub(crate) fn outcome_line(run: &TaskRun) -> String {
    match &run.outcome {
        TaskOutcome::Completed(report) => format!(
            "{} -> {} ({} windows, {} created, {} updated, {})",
            report.cursor_before.format("%Y-%m-%d %H:%M"),
            report.cursor_after.format("%Y-%m-%d %H:%M"),
            report.windows_processed + report.windows_empty,
            report.bars_created,
            report.bars_updated,
            report.exit.as_str(),
        ),
        TaskOutcome::Skipped { reason } => format!("skipped: {}", reason.as_str()),
        TaskOutcome::Failed {
            class,
            error,
            status,
        } => format!("{class} failure, now {status}: {error}"),
    }
}

/// Print a tick report.
pub(crate) fn print_tick_report(report: &TickReport) {
    println!(
        "Tick {} by {}: {} completed, {} failed, {} skipped, {} bars created",
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.worker,
        report.completed(),
        report.failed(),
        report.skipped(),
        report.bars_created(),
    );
    for run in &report.runs {
        println!("  {:<24} {}", run.key.to_string(), outcome_line(run));
    }
}

/// Print what a reconcile pass wrote.
pub(crate) fn print_reconcile(report: &ReconcileReport) {
    if report.is_noop() {
        println!(
            "Task table already in sync ({} live symbols).",
            report.live_symbols.len()
        );
        return;
    }

    println!("Synced {} live symbols:", report.live_symbols.len());
    for (label, keys) in [
        ("created", &report.created),
        ("enabled", &report.enabled),
        ("refreshed", &report.refreshed),
        ("disabled", &report.disabled),
    ] {
        if keys.is_empty() {
            continue;
        }
        let names: Vec<_> = keys.iter().map(ToString::to_string).collect();
        println!("  {label:<10} {}", names.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fmt_time() {
        assert_eq!(fmt_time(None), "-");
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        assert_eq!(fmt_time(Some(ts)), "2024-03-01 09:05");
    }
}
