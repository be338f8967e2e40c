//! Error types and failure classification for the engine.

use chrono::{DateTime, Utc};
use ratchet_aggregate::AggregateError;
use ratchet_store::StoreError;
use ratchet_types::{TaskKey, TaskStatus, WorkerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// How a failure is recorded against the task that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Misconfiguration or broken precondition. Never retried silently.
    Fatal,
    /// Infrastructure hiccup. Short retry, no failure streak.
    Transient,
    /// Logic or data error. Counts toward the failure streak.
    Hard,
    /// Another worker owns the task. Nothing is recorded.
    Contended,
}

impl FailureClass {
    /// Returns the class as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Transient => "transient",
            Self::Hard => "hard",
            Self::Contended => "contended",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a lifecycle transition is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Task is switched off.
    #[error("Task {0} is disabled")]
    Disabled(TaskKey),

    /// Task is waiting out a retry delay.
    #[error("Task {key} is not eligible before {at}")]
    NotYetEligible {
        /// The task.
        key: TaskKey,
        /// When it becomes eligible.
        at: DateTime<Utc>,
    },

    /// Another worker holds a lease that has not expired.
    #[error("Task {key} is leased by {holder:?} since {since:?}")]
    LeaseHeld {
        /// The task.
        key: TaskKey,
        /// Current lease holder.
        holder: Option<WorkerId>,
        /// When the lease was taken.
        since: Option<DateTime<Utc>>,
    },

    /// Caller does not hold the task's lease.
    #[error("Worker {worker} does not hold the lease on task {key}")]
    NotLeaseHolder {
        /// The task.
        key: TaskKey,
        /// The caller.
        worker: WorkerId,
    },

    /// Transition does not apply to the task's status.
    #[error("Task {key} cannot leave status {status}")]
    InvalidStatus {
        /// The task.
        key: TaskKey,
        /// Its current status.
        status: TaskStatus,
    },
}

/// Errors raised while running a task.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Task configuration cannot be executed.
    #[error("Configuration error on task {key}: {reason}")]
    Config {
        /// The task.
        key: TaskKey,
        /// What is wrong.
        reason: String,
    },

    /// Catch-up was asked to run before the cursor was bootstrapped.
    #[error("Task {0} has no cursor")]
    CursorNotBootstrapped(TaskKey),

    /// A run tried to move the cursor backwards.
    #[error("Cursor of task {key} moved backwards: {before} -> {after}")]
    MonotonicityViolation {
        /// The task.
        key: TaskKey,
        /// Cursor at the start of the run.
        before: DateTime<Utc>,
        /// Cursor the run computed.
        after: DateTime<Utc>,
    },

    /// Lifecycle transition refused.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Window aggregation failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Store access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(key: &TaskKey, reason: impl std::fmt::Display) -> Self {
        Self::Config {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }

    /// Classifies the error for failure accounting.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Config { .. } | Self::CursorNotBootstrapped(_) => FailureClass::Fatal,
            Self::MonotonicityViolation { .. } => FailureClass::Hard,
            Self::Lifecycle(_) => FailureClass::Contended,
            Self::Aggregate(e) => match e {
                AggregateError::Store(s) => store_class(s),
                AggregateError::Types(_) => FailureClass::Fatal,
                AggregateError::Malformed { .. } => FailureClass::Hard,
            },
            Self::Store(e) => store_class(e),
        }
    }
}

const fn store_class(err: &StoreError) -> FailureClass {
    if err.is_transient() {
        FailureClass::Transient
    } else if err.is_contention() {
        FailureClass::Contended
    } else {
        FailureClass::Hard
    }
}
