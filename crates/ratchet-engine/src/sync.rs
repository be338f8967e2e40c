//! Reconciliation of the task table against the symbol registry.

use chrono::{DateTime, Utc};
use ratchet_store::{
    ReconcilePlanner, ReconcileReport, RegistrySnapshot, RegistryStore, TaskMutation,
};
use ratchet_types::{
    AggregationTask, BarSource, RegistryEntry, Symbol, TaskKey, TaskStatus, Timeframe, TypesError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::Result;

/// One link of the rollup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupStep {
    /// Timeframe read.
    pub source: Timeframe,
    /// Timeframe produced.
    pub target: Timeframe,
    /// Seconds a target window must be closed before it is aggregated.
    #[serde(default)]
    pub confirmation_delay_secs: i64,
    /// Selection priority of the generated tasks.
    #[serde(default)]
    pub priority: i32,
}

impl RollupStep {
    /// Creates a step with no delay and default priority.
    #[must_use]
    pub const fn new(source: Timeframe, target: Timeframe) -> Self {
        Self {
            source,
            target,
            confirmation_delay_secs: 0,
            priority: 0,
        }
    }

    /// Sets the confirmation delay.
    #[must_use]
    pub const fn with_delay(mut self, secs: i64) -> Self {
        self.confirmation_delay_secs = secs;
        self
    }
}

/// The rollup chain every live symbol gets mandatory tasks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupPlan {
    steps: Vec<RollupStep>,
}

impl Default for RollupPlan {
    fn default() -> Self {
        Self::standard()
    }
}

impl RollupPlan {
    /// Creates a plan from explicit steps.
    #[must_use]
    pub const fn new(steps: Vec<RollupStep>) -> Self {
        Self { steps }
    }

    /// One-minute bars to five-minute bars to hourly bars.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            RollupStep::new(Timeframe::Minute1, Timeframe::Minute5).with_delay(60),
            RollupStep::new(Timeframe::Minute5, Timeframe::Hour1).with_delay(300),
        ])
    }

    /// Returns the configured steps.
    #[must_use]
    pub fn steps(&self) -> &[RollupStep] {
        &self.steps
    }

    /// Checks that every step produces a whole multiple of its source.
    ///
    /// # Errors
    ///
    /// Returns the first incompatible step.
    pub fn validate(&self) -> std::result::Result<(), TypesError> {
        for step in &self.steps {
            if step.target.ratio_to(step.source).is_none() {
                return Err(TypesError::IncompatibleTimeframes {
                    source_tf: step.source,
                    target: step.target,
                });
            }
        }
        Ok(())
    }

    /// Follows the chain from `base`: the step reading `base`, then the step
    /// reading its target, and so on.
    #[must_use]
    pub fn chain_from(&self, base: Timeframe) -> Vec<RollupStep> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = base;
        while let Some(step) = self.steps.iter().find(|s| s.source == current) {
            if !seen.insert(step.target) || step.target <= step.source {
                break;
            }
            chain.push(*step);
            current = step.target;
        }
        chain
    }
}

/// Keeps one mandatory task per live symbol and chain step, and disables
/// tasks of symbols that left the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySynchronizer {
    plan: RollupPlan,
}

impl RegistrySynchronizer {
    /// Creates a synchronizer for `plan`.
    #[must_use]
    pub const fn new(plan: RollupPlan) -> Self {
        Self { plan }
    }

    /// Returns the rollup plan.
    #[must_use]
    pub const fn plan(&self) -> &RollupPlan {
        &self.plan
    }

    /// Runs one atomic reconcile pass against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the pass; nothing is written in
    /// that case.
    pub async fn sync<S>(&self, store: &S, now: DateTime<Utc>) -> Result<ReconcileReport>
    where
        S: RegistryStore + ?Sized,
    {
        let report = store.reconcile(self, now).await?;
        if report.is_noop() {
            tracing::debug!(live = report.live_symbols.len(), "registry in sync");
        } else {
            tracing::info!(
                live = report.live_symbols.len(),
                created = report.created.len(),
                enabled = report.enabled.len(),
                refreshed = report.refreshed.len(),
                disabled = report.disabled.len(),
                "registry synchronized"
            );
        }
        Ok(report)
    }

    fn desired(
        &self,
        entry: &RegistryEntry,
        step: &RollupStep,
        lower_bound: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> std::result::Result<AggregationTask, TypesError> {
        let source = if step.source == entry.base_timeframe {
            BarSource::Raw
        } else {
            BarSource::Derived
        };
        Ok(AggregationTask::new(
            TaskKey::new(entry.symbol.clone(), step.target),
            step.source,
            source,
            lower_bound,
            now,
        )?
        .with_confirmation_delay(step.confirmation_delay_secs)
        .with_priority(step.priority)
        .mandatory())
    }
}

/// Copies the configuration of `desired` onto `existing`, leaving runtime
/// state alone apart from reviving a disabled row.
fn refresh(existing: &AggregationTask, desired: &AggregationTask) -> AggregationTask {
    let mut task = existing.clone();
    task.source_timeframe = desired.source_timeframe;
    task.source = desired.source;
    task.confirmation_delay_secs = desired.confirmation_delay_secs;
    task.priority = desired.priority;
    task.mandatory = true;
    task.enabled = true;
    if task.status == TaskStatus::Disabled {
        task.status = TaskStatus::Idle;
        task.hard_fail_streak = 0;
        task.next_eligible_at = None;
    }
    if task.cursor.is_none() {
        task.lower_bound = desired.lower_bound;
    }
    task
}

impl ReconcilePlanner for RegistrySynchronizer {
    fn plan(
        &self,
        snapshot: &RegistrySnapshot<'_>,
        tasks: &[AggregationTask],
    ) -> Vec<TaskMutation> {
        let existing: BTreeMap<&TaskKey, &AggregationTask> =
            tasks.iter().map(|t| (&t.key, t)).collect();
        let live: BTreeSet<&Symbol> = snapshot.live().map(|e| &e.symbol).collect();
        let mut mutations = Vec::new();

        for entry in snapshot.live() {
            let lower_bound = snapshot
                .earliest_raw
                .get(&entry.symbol)
                .copied()
                .unwrap_or(snapshot.now);

            for step in self.plan.chain_from(entry.base_timeframe) {
                let desired = match self.desired(entry, &step, lower_bound, snapshot.now) {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(symbol = %entry.symbol, error = %e, "invalid rollup step");
                        continue;
                    }
                };
                match existing.get(&desired.key) {
                    None => mutations.push(TaskMutation::Create(desired)),
                    Some(current) => {
                        let updated = refresh(current, &desired);
                        if updated == **current {
                            continue;
                        }
                        if current.enabled {
                            mutations.push(TaskMutation::Refresh(updated));
                        } else {
                            mutations.push(TaskMutation::Enable(updated));
                        }
                    }
                }
            }
        }

        for task in tasks {
            if task.enabled && !live.contains(task.symbol()) {
                let mut disabled = task.clone();
                disabled.enabled = false;
                mutations.push(TaskMutation::Disable(disabled));
            }
        }

        mutations
    }
}
