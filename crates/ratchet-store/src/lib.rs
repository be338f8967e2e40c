//! Storage for the ratchet bar rollup engine.
//!
//! This crate defines the tables the engine reads and writes and provides two
//! backends for them:
//!
//! - [`BarStore`] - Raw and derived bar tables
//! - [`TaskStore`] - Task table with optimistic versioning
//! - [`RegistryStore`] - Registry, pause flags and atomic reconciliation
//! - [`MemoryStore`] - Every table in memory behind one lock
//! - [`FileStore`] - The same tables persisted as a JSON snapshot

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/ratchet/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod file;
mod memory;
mod reconcile;
mod repository;

pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use reconcile::{ReconcilePlanner, ReconcileReport, RegistrySnapshot, TaskMutation};
pub use repository::{
    BarStore, QualityCounters, RegistryStore, Repository, TaskStore, UpsertOutcome,
};
