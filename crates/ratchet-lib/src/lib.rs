//! Incremental OHLCV rollup engine.
//!
//! This is a facade crate that re-exports the ratchet workspace crates.
//! Bar types, storage and window aggregation are always available; the
//! catch-up engine and the scheduler sit behind the `engine` and `daemon`
//! features.

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Core types
pub use ratchet_types::*;

// Storage
pub use ratchet_store::{
    BarStore, FileStore, MemoryStore, QualityCounters, ReconcilePlanner, ReconcileReport,
    RegistrySnapshot, RegistryStore, Repository, StoreError, TaskMutation, TaskStore,
    UpsertOutcome,
};

// Window aggregation
pub use ratchet_aggregate::{
    AggregateError, QualityPolicy, Verdict, WindowAggregator, WindowOutcome, WindowRequest,
    rollup,
};

// Catch-up engine
#[cfg(feature = "engine")]
pub use ratchet_engine::{
    CatchupController, CatchupPolicy, CatchupReport, CatchupRequest, Checkpoint, Clock,
    EngineError, ExitReason, FailureClass, LeaseCheckpoint, LifecycleError, LifecyclePolicy,
    ManualClock, NoCheckpoint, RegistrySynchronizer, RollupPlan, RollupStep, RunOptions,
    SkipReason, SystemClock, TaskOutcome, TaskRun, TickReport, Worker, WorkerConfig,
    bootstrap_cursor, initial_cursor, select_due,
};

// Scheduler
#[cfg(feature = "daemon")]
pub use ratchet_daemon::{
    CONFIG_ENV, CONFIG_FILE, CatchupConfig, DaemonError, LifecycleConfig, LoggingConfig,
    RatchetConfig, Scheduler, SchedulerConfig, SchedulerStats, StateDir, StatsTracker,
    StoreConfig,
};

/// Prelude module for convenient imports.
///
/// ```
/// use ratchet_lib::prelude::*;
/// ```
pub mod prelude {
    pub use ratchet_types::{
        AggregationTask, Bar, BarKey, BarSource, DerivedBar, QualityTier, RegistryEntry, Symbol,
        TaskKey, TaskStatus, Timeframe, Window, WorkerId,
    };

    pub use ratchet_store::{BarStore, FileStore, MemoryStore, RegistryStore, TaskStore};

    pub use ratchet_aggregate::{QualityPolicy, WindowAggregator};

    #[cfg(feature = "engine")]
    pub use ratchet_engine::{
        CatchupPolicy, ExitReason, LifecyclePolicy, RegistrySynchronizer, RollupPlan, RunOptions,
        TickReport, Worker, WorkerConfig,
    };

    #[cfg(feature = "daemon")]
    pub use ratchet_daemon::{RatchetConfig, Scheduler, StateDir};
}
