//! TOML configuration.

use chrono::TimeDelta;
use ratchet_aggregate::{QualityPolicy, WindowAggregator};
use ratchet_engine::{CatchupPolicy, LifecyclePolicy, RollupPlan, RollupStep, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{DaemonError, Result, StateDir};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RATCHET_CONFIG";

/// Name of the config file inside the state directory.
pub const CONFIG_FILE: &str = "ratchet.toml";

/// Complete daemon configuration. Every section is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// Where the store lives.
    pub store: StoreConfig,
    /// Tick cadence and budgets.
    pub scheduler: SchedulerConfig,
    /// Lease and retry timings.
    pub lifecycle: LifecycleConfig,
    /// Frontier detection.
    pub catchup: CatchupConfig,
    /// Coverage thresholds.
    pub quality: QualityPolicy,
    /// Log output.
    pub logging: LoggingConfig,
    /// Rollup chain applied to every live symbol.
    pub rollups: Vec<RollupStep>,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            catchup: CatchupConfig::default(),
            quality: QualityPolicy::default(),
            logging: LoggingConfig::default(),
            rollups: RollupPlan::standard().steps().to_vec(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file. Defaults to `store.json` in the state directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Tasks selected per tick.
    pub max_tasks_per_tick: usize,
    /// Windows each task may aggregate per run.
    pub max_windows_per_task: u32,
    /// Wall-clock budget of one tick in seconds.
    pub tick_budget_secs: u64,
    /// Registry sync runs every this many ticks.
    pub sync_every_ticks: u64,
    /// Tasks processed at the same time.
    pub concurrency: usize,
    /// Tick reports kept in the run log.
    pub keep_run_reports: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_tasks_per_tick: 50,
            max_windows_per_task: 288,
            tick_budget_secs: 50,
            sync_every_ticks: 10,
            concurrency: 1,
            keep_run_reports: 200,
        }
    }
}

impl SchedulerConfig {
    /// Time between ticks.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// `[lifecycle]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds after which a running task's lease is abandoned.
    pub lease_timeout_secs: i64,
    /// Consecutive hard failures before a task leaves rotation.
    pub max_hard_failures: u32,
    /// Retry delay after a transient failure.
    pub transient_retry_secs: i64,
    /// Retry delay after a hard failure.
    pub hard_retry_secs: i64,
    /// Retry delay of mandatory tasks in the alarm state.
    pub alarm_retry_secs: i64,
    /// Delay before looking past the frontier again.
    pub frontier_backoff_secs: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: 150,
            max_hard_failures: 3,
            transient_retry_secs: 30,
            hard_retry_secs: 300,
            alarm_retry_secs: 900,
            frontier_backoff_secs: 60,
        }
    }
}

/// `[catchup]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchupConfig {
    /// Consecutive empty windows that mark the frontier.
    pub gap_tolerance: u32,
    /// Jump over empty stretches that have data after them.
    pub skip_historical_gaps: bool,
    /// Seconds data must have resumed before a gap is jumped over.
    pub backfill_horizon_secs: i64,
    /// Version stamped on derived bars.
    pub derivation_version: u32,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            gap_tolerance: 3,
            skip_historical_gaps: true,
            backfill_horizon_secs: 3600,
            derivation_version: 1,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RATCHET_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RatchetConfig {
    /// Resolves the config file: `explicit`, else `RATCHET_CONFIG`, else
    /// `ratchet.toml` in the state directory.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>, state: &StateDir) -> PathBuf {
        explicit.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| state.base_path().join(CONFIG_FILE))
        })
    }

    /// Loads and validates the config at `path`. A missing file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| DaemonError::ParseConfig {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the config as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(DaemonError::InvalidConfig(msg.to_string()));

        if let Err(e) = self.rollup_plan().validate() {
            return Err(DaemonError::InvalidConfig(format!("rollups: {e}")));
        }
        if self.catchup.gap_tolerance == 0 {
            return invalid("catchup.gap_tolerance must be at least 1");
        }
        if self.catchup.backfill_horizon_secs < 0 {
            return invalid("catchup.backfill_horizon_secs must not be negative");
        }
        let fraction = self.quality.min_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return invalid("quality.min_fraction must be in (0, 1]");
        }
        if self.scheduler.tick_interval_secs == 0 {
            return invalid("scheduler.tick_interval_secs must be positive");
        }
        if self.scheduler.max_windows_per_task == 0 || self.scheduler.max_tasks_per_tick == 0 {
            return invalid("scheduler budgets must be positive");
        }
        if self.scheduler.max_windows_per_task < self.catchup.gap_tolerance {
            return invalid(
                "scheduler.max_windows_per_task must be at least catchup.gap_tolerance",
            );
        }
        if self.scheduler.concurrency == 0 || self.scheduler.sync_every_ticks == 0 {
            return invalid("scheduler.concurrency and sync_every_ticks must be positive");
        }
        if self.lifecycle.lease_timeout_secs <= 0 || self.lifecycle.max_hard_failures == 0 {
            return invalid("lifecycle.lease_timeout_secs and max_hard_failures must be positive");
        }
        Ok(())
    }

    /// Store file, relative to `state` unless configured.
    #[must_use]
    pub fn store_path(&self, state: &StateDir) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| state.default_store_path())
    }

    /// The rollup chain.
    #[must_use]
    pub fn rollup_plan(&self) -> RollupPlan {
        RollupPlan::new(self.rollups.clone())
    }

    /// The lifecycle timings.
    #[must_use]
    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        let l = &self.lifecycle;
        LifecyclePolicy {
            lease_timeout: TimeDelta::seconds(l.lease_timeout_secs),
            max_hard_failures: l.max_hard_failures,
            transient_retry: TimeDelta::seconds(l.transient_retry_secs),
            hard_retry: TimeDelta::seconds(l.hard_retry_secs),
            alarm_retry: TimeDelta::seconds(l.alarm_retry_secs),
            frontier_backoff: TimeDelta::seconds(l.frontier_backoff_secs),
        }
    }

    /// The frontier settings.
    #[must_use]
    pub fn catchup_policy(&self) -> CatchupPolicy {
        CatchupPolicy {
            gap_tolerance: self.catchup.gap_tolerance,
            skip_historical_gaps: self.catchup.skip_historical_gaps,
            backfill_horizon: TimeDelta::seconds(self.catchup.backfill_horizon_secs),
        }
    }

    /// The aggregator for the configured thresholds.
    #[must_use]
    pub fn aggregator(&self) -> WindowAggregator {
        WindowAggregator::new(self.quality.clone(), self.catchup.derivation_version)
    }

    /// The per-tick limits.
    #[must_use]
    pub const fn worker_config(&self) -> WorkerConfig {
        let s = &self.scheduler;
        WorkerConfig {
            max_tasks: s.max_tasks_per_tick,
            max_windows_per_task: s.max_windows_per_task,
            deadline: Some(Duration::from_secs(s.tick_budget_secs)),
            concurrency: s.concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::Timeframe;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RatchetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.lifecycle_policy(), LifecyclePolicy::default());
        assert_eq!(config.catchup_policy(), CatchupPolicy::default());
        assert_eq!(config.rollup_plan(), RollupPlan::standard());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ratchet.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
max_windows_per_task = 12

[quality]
min_fraction = 0.8

[quality.min_counts]
h1 = 10

[[rollups]]
source = "m1"
target = "m15"
confirmation_delay_secs = 120
"#,
        )
        .unwrap();

        let config = RatchetConfig::load(&path).unwrap();
        assert_eq!(config.scheduler.max_windows_per_task, 12);
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.quality.minimum_for(Timeframe::Hour1, 12), 10);
        assert_eq!(config.quality.minimum_for(Timeframe::Minute5, 5), 4);
        assert_eq!(config.rollups.len(), 1);
        assert_eq!(config.rollups[0].target, Timeframe::Minute15);
        assert_eq!(config.rollups[0].confirmation_delay_secs, 120);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = RatchetConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RatchetConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = RatchetConfig::default();
        config.rollups = vec![RollupStep::new(Timeframe::Minute5, Timeframe::Minute15)];
        assert!(config.validate().is_ok());

        config.rollups = vec![RollupStep::new(Timeframe::Hour1, Timeframe::Minute5)];
        assert!(config.validate().is_err());

        let mut config = RatchetConfig::default();
        config.catchup.gap_tolerance = 0;
        assert!(config.validate().is_err());

        let mut config = RatchetConfig::default();
        config.quality.min_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = RatchetConfig::default();
        config.catchup.backfill_horizon_secs = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_budget_must_cover_gap_tolerance() {
        let mut config = RatchetConfig::default();
        config.scheduler.max_windows_per_task = 2;
        assert!(config.validate().is_err());

        config.catchup.gap_tolerance = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ratchet.toml");
        let config = RatchetConfig::default();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(RatchetConfig::load(&path).unwrap(), config);
    }
}
