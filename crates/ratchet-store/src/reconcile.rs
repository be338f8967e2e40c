//! Types exchanged during registry reconciliation.

use chrono::{DateTime, Utc};
use ratchet_types::{AggregationTask, RegistryEntry, Symbol, TaskKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Registry state read inside the reconcile lock.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySnapshot<'a> {
    /// Clock reading used for created rows.
    pub now: DateTime<Utc>,
    /// Every registry row, live or not.
    pub entries: &'a [RegistryEntry],
    /// Earliest raw bar start per symbol at its base timeframe.
    pub earliest_raw: &'a BTreeMap<Symbol, DateTime<Utc>>,
}

impl RegistrySnapshot<'_> {
    /// Returns the registry rows whose symbols should have tasks.
    pub fn live(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.is_live())
    }

    /// Returns the set of live symbols.
    #[must_use]
    pub fn live_symbols(&self) -> BTreeSet<Symbol> {
        self.live().map(|e| e.symbol.clone()).collect()
    }
}

/// A task write requested by a planner.
///
/// Every variant carries the full replacement row; the store assigns
/// `version` and `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    /// Insert a task that does not exist yet.
    Create(AggregationTask),
    /// Turn an existing task back on.
    Enable(AggregationTask),
    /// Update configuration of an enabled task.
    Refresh(AggregationTask),
    /// Turn off a task whose symbol left the registry.
    Disable(AggregationTask),
}

impl TaskMutation {
    /// Returns the row the mutation writes.
    #[must_use]
    pub const fn task(&self) -> &AggregationTask {
        match self {
            Self::Create(t) | Self::Enable(t) | Self::Refresh(t) | Self::Disable(t) => t,
        }
    }
}

/// Decides which task writes bring the task table in line with a registry
/// snapshot.
///
/// Planners run while the store holds its write lock, so they must be pure
/// and fast.
pub trait ReconcilePlanner: Send + Sync {
    /// Returns the writes to apply to `tasks`.
    fn plan(&self, snapshot: &RegistrySnapshot<'_>, tasks: &[AggregationTask])
    -> Vec<TaskMutation>;
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Live symbols in the snapshot the pass was based on.
    pub live_symbols: BTreeSet<Symbol>,
    /// Tasks inserted.
    pub created: Vec<TaskKey>,
    /// Tasks re-enabled.
    pub enabled: Vec<TaskKey>,
    /// Tasks whose configuration was refreshed.
    pub refreshed: Vec<TaskKey>,
    /// Tasks disabled.
    pub disabled: Vec<TaskKey>,
}

impl ReconcileReport {
    /// Returns true if the pass wrote nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.enabled.is_empty()
            && self.refreshed.is_empty()
            && self.disabled.is_empty()
    }
}
