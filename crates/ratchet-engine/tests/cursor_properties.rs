//! Property tests for the catch-up loop.
//!
//! Whatever the shape of the source data, the budget or the clock:
//! 1. The cursor never moves backwards
//! 2. The cursor always lands on a window boundary
//! 3. Rerunning over unchanged data creates nothing
//! 4. Splitting a catch-up across budget-limited runs stops on the same
//!    frontier as one long run

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use ratchet_aggregate::{QualityPolicy, WindowAggregator};
use ratchet_engine::{
    CatchupController, CatchupPolicy, CatchupReport, CatchupRequest, ExitReason, NoCheckpoint,
};
use ratchet_store::MemoryStore;
use ratchet_types::{AggregationTask, Bar, BarSource, Symbol, TaskKey, Timeframe};
use std::collections::BTreeSet;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

fn store_with(minutes: &BTreeSet<i64>) -> MemoryStore {
    let store = MemoryStore::new();
    let symbol = Symbol::new("EURUSD").unwrap();
    store
        .insert_raw_bars(minutes.iter().map(|&minute| {
            Bar::new(
                symbol.clone(),
                Timeframe::Minute1,
                t0() + TimeDelta::minutes(minute),
                1.0,
                1.5,
                0.5,
                1.2,
                10.0,
            )
        }))
        .unwrap();
    store
}

fn task(cursor_window: i64) -> AggregationTask {
    let mut task = AggregationTask::new(
        TaskKey::new(Symbol::new("EURUSD").unwrap(), Timeframe::Minute5),
        Timeframe::Minute1,
        BarSource::Raw,
        t0() + TimeDelta::minutes(30),
        t0(),
    )
    .unwrap()
    .with_confirmation_delay(60);
    task.cursor = Some(t0() + TimeDelta::minutes(cursor_window * 5));
    task
}

fn run(
    store: &MemoryStore,
    task: &AggregationTask,
    request: CatchupRequest,
    policy: CatchupPolicy,
) -> CatchupReport {
    let aggregator = WindowAggregator::new(QualityPolicy::default(), 1);
    let controller = CatchupController::new(store, &aggregator, policy);
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(controller.run(task, request, &NoCheckpoint))
        .unwrap()
}

fn arb_minutes() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(0..240i64, 0..160)
}

fn arb_policy() -> impl Strategy<Value = CatchupPolicy> {
    (1..6u32, any::<bool>(), 0..90i64).prop_map(
        |(gap_tolerance, skip_historical_gaps, horizon_minutes)| CatchupPolicy {
            gap_tolerance,
            skip_historical_gaps,
            backfill_horizon: TimeDelta::minutes(horizon_minutes),
        },
    )
}

proptest! {
    #[test]
    fn cursor_never_moves_backwards(
        minutes in arb_minutes(),
        cursor_window in -4..48i64,
        max_windows in 0..40u32,
        now_minutes in 0..300i64,
        force in any::<bool>(),
        policy in arb_policy(),
    ) {
        let store = store_with(&minutes);
        let task = task(cursor_window);
        let request = CatchupRequest {
            max_windows,
            now: t0() + TimeDelta::minutes(now_minutes),
            ignore_confirmation_delay: force,
        };
        let report = run(&store, &task, request, policy);

        prop_assert!(report.cursor_after >= report.cursor_before);
        prop_assert!(Timeframe::Minute5.is_aligned(report.cursor_after));
        prop_assert!(
            report.windows_processed + report.windows_empty
                <= max_windows.max(policy.gap_tolerance)
        );
    }

    #[test]
    fn rerun_over_unchanged_data_creates_nothing(
        minutes in arb_minutes(),
        policy in arb_policy(),
    ) {
        let store = store_with(&minutes);
        let task = task(0);
        let request = CatchupRequest {
            max_windows: 100,
            now: t0() + TimeDelta::days(1),
            ignore_confirmation_delay: false,
        };
        let first = run(&store, &task, request, policy);
        let second = run(&store, &task, request, policy);

        prop_assert_eq!(second.bars_created, 0);
        prop_assert_eq!(second.bars_updated, 0);
        prop_assert_eq!(second.bars_unchanged, first.bars_created);
        prop_assert_eq!(second.cursor_after, first.cursor_after);
    }

    #[test]
    fn budget_cuts_do_not_move_the_frontier(
        minutes in arb_minutes(),
        max_windows in 1..12u32,
        gap_tolerance in 1..6u32,
    ) {
        let store = store_with(&minutes);
        let policy = CatchupPolicy {
            gap_tolerance,
            skip_historical_gaps: false,
            ..CatchupPolicy::default()
        };
        let request = |max_windows| CatchupRequest {
            max_windows,
            now: t0() + TimeDelta::days(1),
            ignore_confirmation_delay: false,
        };
        let whole = run(&store, &task(0), request(1000), policy);

        let mut task = task(0);
        let mut last = None;
        for _ in 0..200 {
            let report = run(&store, &task, request(max_windows), policy);
            task.cursor = Some(report.cursor_after);
            let done = report.exit != ExitReason::MaxWindows;
            last = Some(report);
            if done {
                break;
            }
        }
        let last = last.unwrap();
        prop_assert_eq!(last.exit, whole.exit);
        prop_assert_eq!(last.cursor_after, whole.cursor_after);
    }
}
