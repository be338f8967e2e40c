//! Scheduler and operator state for the ratchet bar rollup engine.
//!
//! - [`RatchetConfig`] - TOML configuration with defaults for every key
//! - [`StateDir`] - State directory holding the store snapshot and run log
//! - [`StatsTracker`] - Cumulative scheduler statistics with periodic saves
//! - [`Scheduler`] - Interval loop running ticks and registry syncs

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod scheduler;
mod state;
mod stats;

pub use config::{
    CONFIG_ENV, CONFIG_FILE, CatchupConfig, LifecycleConfig, LoggingConfig, RatchetConfig,
    SchedulerConfig, StoreConfig,
};
pub use error::{DaemonError, Result};
pub use scheduler::Scheduler;
pub use state::StateDir;
pub use stats::{SchedulerStats, StatsTracker};
