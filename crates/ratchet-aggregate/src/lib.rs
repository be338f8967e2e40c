//! Window rollup and quality scoring for the ratchet bar rollup engine.
//!
//! This crate turns the source bars of one window into one derived bar:
//!
//! - [`rollup`] - Pure fold of source bars into OHLCV values and a verdict
//! - [`QualityPolicy`] - Coverage thresholds and tier grading
//! - [`WindowAggregator`] - Reads, rolls up and upserts one window

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod aggregator;
mod error;
mod quality;
mod rollup;

pub use aggregator::{WindowAggregator, WindowOutcome};
pub use error::{AggregateError, Result};
pub use quality::QualityPolicy;
pub use rollup::{Verdict, WindowRequest, rollup};
