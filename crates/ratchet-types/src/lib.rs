//! Core types for the ratchet bar rollup engine.
//!
//! This crate provides the data model shared by the store, aggregator and
//! engine:
//!
//! - [`Timeframe`] - Bar duration with epoch-aligned boundary arithmetic
//! - [`Window`] - Half-open `[start, end)` aggregation window
//! - [`Bar`] / [`DerivedBar`] - Raw and rolled-up OHLCV bars
//! - [`AggregationTask`] - A rollup task with cursor, lease and counters
//! - [`RegistryEntry`] - A row of the external active-symbol registry

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bar;
mod error;
mod registry;
mod symbol;
mod task;
mod timeframe;
mod window;

pub use bar::{Bar, BarKey, BarSource, DerivedBar, Provenance, QualityTier};
pub use error::{Result, TypesError};
pub use registry::RegistryEntry;
pub use symbol::{Symbol, WorkerId};
pub use task::{AggregationTask, TaskKey, TaskStatus};
pub use timeframe::{Timeframe, TimeframeParseError};
pub use window::Window;
