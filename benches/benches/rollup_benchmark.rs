//! Rollup and catch-up benchmarks over generated minute bars.
//!
//! Run with: `cargo bench --package ratchet-bench`

use chrono::TimeDelta;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ratchet_bench::{SeriesConfig, m5_task, minute_bars, seeded_store, symbols};
use ratchet_lib::{
    BarSource, CatchupController, CatchupPolicy, CatchupRequest, NoCheckpoint, QualityPolicy,
    RegistrySynchronizer, Symbol, Timeframe, Window, WindowAggregator, WindowRequest, Worker,
    WorkerConfig, rollup,
};
use futures::executor::block_on;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Pure folding of one window, complete and with every fifth bar missing.
fn rollup_benchmark(c: &mut Criterion) {
    let symbol = Symbol::new("EURUSD").unwrap();
    let policy = QualityPolicy::default();
    let mut group = c.benchmark_group("rollup");

    for (name, target, gap_every) in [
        ("m5-full", Timeframe::Minute5, None),
        ("h1-full", Timeframe::Hour1, None),
        ("h1-gappy", Timeframe::Hour1, Some(5)),
    ] {
        let series = SeriesConfig {
            minutes: target.duration().num_minutes(),
            gap_every,
            ..SeriesConfig::default()
        };
        let bars = minute_bars(&symbol, series);
        let request = WindowRequest {
            symbol: symbol.clone(),
            source: BarSource::Raw,
            source_timeframe: Timeframe::Minute1,
            target_timeframe: target,
            window: Window::aligned(series.start, target).unwrap(),
            expected_count: target.ratio_to(Timeframe::Minute1).unwrap(),
        };

        group.throughput(Throughput::Elements(bars.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &bars, |b, bars| {
            b.iter(|| rollup(&request, bars, &policy, 1, series.start).unwrap());
        });
    }

    group.finish();
}

// Setup closures run inside the bench runtime, so fixtures are built on a
// plain executor. Memory store futures never wait on I/O.

/// One catch-up run over a day of minute bars into m5 windows.
fn catchup_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let aggregator = WindowAggregator::new(QualityPolicy::default(), 1);
    let symbol = Symbol::new("EURUSD").unwrap();
    let mut group = c.benchmark_group("catchup");
    group.sample_size(20);

    for (name, gap_every) in [("dense", None), ("gappy", Some(4))] {
        let series = SeriesConfig {
            gap_every,
            ..SeriesConfig::default()
        };
        let task = m5_task(&symbol, series).unwrap();
        let request = CatchupRequest {
            max_windows: 288,
            now: series.end() + TimeDelta::hours(1),
            ignore_confirmation_delay: false,
        };

        group.throughput(Throughput::Elements(288));
        let (task_ref, aggregator_ref) = (&task, &aggregator);
        group.bench_function(BenchmarkId::new("first-pass", name), |b| {
            b.to_async(&runtime).iter_batched(
                || block_on(seeded_store(&[symbol.clone()], series)).unwrap(),
                move |store| async move {
                    let controller =
                        CatchupController::new(&store, aggregator_ref, CatchupPolicy::default());
                    controller.run(task_ref, request, &NoCheckpoint).await.unwrap()
                },
                BatchSize::LargeInput,
            );
        });

        // Second pass over unchanged data writes nothing.
        let store = block_on(seeded_store(&[symbol.clone()], series)).unwrap();
        let controller = CatchupController::new(&store, &aggregator, CatchupPolicy::default());
        runtime
            .block_on(controller.run(&task, request, &NoCheckpoint))
            .unwrap();
        let controller = &controller;
        group.bench_function(BenchmarkId::new("recheck", name), |b| {
            b.to_async(&runtime).iter(move || async move {
                controller.run(task_ref, request, &NoCheckpoint).await.unwrap()
            });
        });
    }

    group.finish();
}

/// A full worker tick across many symbols.
fn tick_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("tick");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for count in [10, 50] {
        let series = SeriesConfig {
            minutes: 180,
            ..SeriesConfig::default()
        };
        let symbols = symbols(count).unwrap();
        let now = series.end() + TimeDelta::minutes(30);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &symbols, |b, symbols| {
            b.to_async(&runtime).iter_batched(
                || {
                    block_on(async {
                        let store = Arc::new(seeded_store(symbols, series).await.unwrap());
                        RegistrySynchronizer::default()
                            .sync(&*store, now)
                            .await
                            .unwrap();
                        store
                    })
                },
                move |store| async move {
                    let worker = Worker::new(store)
                        .with_clock(Arc::new(ratchet_lib::ManualClock::new(now)))
                        .with_config(WorkerConfig {
                            max_tasks: count * 2,
                            ..WorkerConfig::default()
                        });
                    worker.tick().await.unwrap()
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, rollup_benchmark, catchup_benchmark, tick_benchmark);
criterion_main!(benches);
