//! Error types for storage operations.

use chrono::{DateTime, Utc};
use ratchet_types::{Symbol, TaskKey, Timeframe, WorkerId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached. Retrying later may succeed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer in time. Retrying later may succeed.
    #[error("Store timed out: {0}")]
    Timeout(String),

    /// Task row changed since it was read.
    #[error("Version conflict on task {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The contended task.
        key: TaskKey,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Task row does not exist.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskKey),

    /// Task row already exists.
    #[error("Task already exists: {0}")]
    TaskExists(TaskKey),

    /// Writer no longer holds the task's lease.
    #[error("Worker {holder} does not hold the lease on task {key}")]
    LeaseLost {
        /// The task.
        key: TaskKey,
        /// The worker that attempted the write.
        holder: WorkerId,
    },

    /// Write would move a cursor backwards.
    #[error("Cursor regression on task {key}: {current} -> {proposed:?}")]
    CursorRegression {
        /// The task.
        key: TaskKey,
        /// Cursor currently stored.
        current: DateTime<Utc>,
        /// Cursor the writer attempted to store.
        proposed: Option<DateTime<Utc>>,
    },

    /// Raw rows must be base timeframe, derived rows must not be.
    #[error("{symbol} {timeframe} bars cannot be written to the {table} table")]
    ArchitectureGate {
        /// The bar's symbol.
        symbol: Symbol,
        /// The bar's timeframe.
        timeframe: Timeframe,
        /// Table the write targeted.
        table: &'static str,
    },

    /// Failed to create a directory.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        /// The path that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to read a file.
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        /// The path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to take the cross-process lock on the store.
    #[error("Failed to lock '{path}': {source}")]
    Lock {
        /// The lock file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a snapshot file.
    #[error("Failed to parse store file '{path}': {source}")]
    ParseJson {
        /// The path that could not be parsed.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Failed to serialize the store.
    #[error("Failed to serialize store: {0}")]
    SerializeJson(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures worth a short retry rather than counting
    /// against the task.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Returns true when another writer got to the row first.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::LeaseLost { .. })
    }
}
