//! Incremental catch-up engine for the ratchet bar rollup engine.
//!
//! This crate moves rollup tasks forward one bounded run at a time:
//!
//! - [`bootstrap_cursor`] - Places the cursor of a fresh task
//! - [`CatchupController`] - Walks windows until budget, frontier or delay stops it
//! - [`LifecyclePolicy`] - Claims, soft leases and failure accounting
//! - [`select_due`] - Picks and orders the claimable tasks
//! - [`RegistrySynchronizer`] - Keeps the task table in line with the registry
//! - [`Worker`] - Runs one tick over due tasks

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bootstrap;
mod catchup;
mod clock;
mod error;
mod lifecycle;
mod selector;
mod sync;
mod worker;

pub use bootstrap::{bootstrap_cursor, initial_cursor};
pub use catchup::{
    CatchupController, CatchupPolicy, CatchupReport, CatchupRequest, Checkpoint, ExitReason,
    LeaseCheckpoint, NoCheckpoint,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, FailureClass, LifecycleError, Result};
pub use lifecycle::LifecyclePolicy;
pub use selector::select_due;
pub use sync::{RegistrySynchronizer, RollupPlan, RollupStep};
pub use worker::{
    RunOptions, SkipReason, TaskOutcome, TaskRun, TickReport, Worker, WorkerConfig,
};
