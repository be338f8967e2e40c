//! Tracing subscriber setup.

use anyhow::{Result, anyhow};
use ratchet_lib::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive that overrides flags and
/// config.
const LOG_ENV: &str = "RATCHET_LOG";

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub(crate) fn init(verbose: u8, quiet: bool, config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive)
            .map_err(|e| anyhow!("Invalid {LOG_ENV} directive '{directive}': {e}"))?,
        Err(_) => EnvFilter::try_new(level(verbose, quiet, &config.level))
            .map_err(|e| anyhow!("Invalid log level '{}': {e}", config.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install log subscriber: {e}"))
}

/// Picks the level from the flags, falling back to the configured one.
fn level(verbose: u8, quiet: bool, configured: &str) -> String {
    if quiet {
        return "error".into();
    }
    match verbose {
        0 => configured.to_string(),
        1 => "debug".into(),
        _ => "trace".into(),
    }
}
