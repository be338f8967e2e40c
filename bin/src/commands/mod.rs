//! CLI command implementations.

use anyhow::{Context as _, Result};
use ratchet_lib::{
    FileStore, RatchetConfig, Scheduler, StateDir, StatsTracker, Symbol, TaskKey, Timeframe,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) mod config;
pub(crate) mod registry;
pub(crate) mod run;
pub(crate) mod status;
pub(crate) mod task;

/// State shared by every command: the state directory, the effective
/// configuration and the opened store.
pub(crate) struct Context {
    pub(crate) state: StateDir,
    pub(crate) config_path: PathBuf,
    pub(crate) config: RatchetConfig,
    pub(crate) store: Arc<FileStore>,
}

impl Context {
    /// Resolves the state directory and configuration and opens the store.
    pub(crate) fn open(config_path: Option<&Path>) -> Result<Self> {
        let state = StateDir::with_default_path().context("Failed to initialize state directory")?;
        let config_path = RatchetConfig::resolve_path(config_path, &state);
        let config = RatchetConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let store_path = config.store_path(&state);
        let store = FileStore::open(&store_path)
            .with_context(|| format!("Failed to open store at {}", store_path.display()))?;

        Ok(Self {
            state,
            config_path,
            config,
            store: Arc::new(store),
        })
    }

    /// Builds a scheduler over the store with the persisted statistics.
    pub(crate) fn scheduler(&self) -> Result<Scheduler<FileStore>> {
        let stats = StatsTracker::load(&self.state).context("Failed to load scheduler stats")?;
        Ok(Scheduler::new(
            Arc::clone(&self.store),
            &self.config,
            self.state.clone(),
            StatsTracker::new(self.state.clone(), stats),
        ))
    }
}

/// Parse a symbol argument.
pub(crate) fn parse_symbol(s: &str) -> Result<Symbol> {
    Symbol::new(s).with_context(|| format!("Invalid symbol: {s}"))
}

/// Parse a task key from its symbol and target timeframe.
pub(crate) fn parse_key(symbol: &str, target: Timeframe) -> Result<TaskKey> {
    Ok(TaskKey::new(parse_symbol(symbol)?, target))
}
