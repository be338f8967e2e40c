//! ratchet CLI - Incremental OHLCV rollup engine.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use ratchet_lib::Timeframe;
use std::path::PathBuf;

mod commands;
mod display;
mod logging;

use commands::Context;

#[derive(Parser)]
#[command(name = "ratchet")]
#[command(about = "Incremental OHLCV rollup engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file. Defaults to $RATCHET_CONFIG, then ratchet.toml in the state directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only, no progress output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Sync the task table and run a single tick
    Tick,

    /// Reconcile the task table with the registry
    Sync,

    /// Show task state
    Status {
        /// Only tasks for this symbol
        symbol: Option<String>,

        /// Only hard-failed and disabled tasks
        #[arg(long)]
        failed: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run one task now, ignoring its schedule and confirmation delay
    Force {
        /// Symbol of the task
        symbol: String,

        /// Target timeframe of the task (e.g., m5, h1)
        target: Timeframe,

        /// Window budget for this run
        #[arg(long)]
        max_windows: Option<u32>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Clear the failure state of a task and re-enable it
    Reset {
        /// Symbol of the task
        symbol: String,

        /// Target timeframe of the task (e.g., m5, h1)
        target: Timeframe,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Stop starting new work for a symbol
    Pause {
        /// Symbol to pause
        symbol: String,
    },

    /// Allow new work for a paused symbol
    Resume {
        /// Symbol to resume
        symbol: String,
    },

    /// Show derived bar counts by quality tier
    Quality {
        /// Only this symbol
        symbol: Option<String>,
    },

    /// Manage the active-symbol registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Load raw bars from a newline-delimited JSON file
    ImportRaw {
        /// NDJSON file with one bar per line
        path: PathBuf,
    },

    /// Show recent tick reports
    Runs {
        /// Number of reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Manage operator-defined tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Show or initialize the configuration
    Config {
        /// Write the effective configuration to the config path
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

/// Actions on the registry.
#[derive(Subcommand)]
enum RegistryAction {
    /// Add or update a registry row
    Set {
        /// Symbol identifier (e.g., EURUSD)
        symbol: String,

        /// Timeframe raw bars are deposited at
        #[arg(short, long, default_value = "m1")]
        base: Timeframe,

        /// Mark the symbol inactive
        #[arg(long, conflicts_with = "test")]
        inactive: bool,

        /// Mark the symbol active for test coverage only
        #[arg(long)]
        test: bool,
    },

    /// List registry rows
    List,
}

/// Actions on operator-defined tasks.
#[derive(Subcommand)]
enum TaskAction {
    /// Add an optional rollup task outside the standard chain
    Add {
        /// Symbol identifier
        symbol: String,

        /// Timeframe of the source bars
        source: Timeframe,

        /// Timeframe to produce
        target: Timeframe,

        /// Read source bars from the derived table instead of the raw one
        #[arg(long)]
        derived: bool,

        /// Earliest window to process (RFC 3339). Defaults to now.
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Seconds to wait after a window closes
        #[arg(long, default_value = "0")]
        delay: i64,

        /// Selection priority
        #[arg(long, default_value = "0")]
        priority: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Show help if no command provided
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let ctx = Context::open(cli.config.as_deref())?;
    logging::init(cli.verbose, cli.quiet, &ctx.config.logging)?;

    match command {
        Commands::Run { ticks } => commands::run::run(&ctx, ticks).await,
        Commands::Tick => commands::run::tick(&ctx, cli.quiet).await,
        Commands::Sync => commands::run::sync(&ctx).await,
        Commands::Status {
            symbol,
            failed,
            json,
        } => commands::status::status(&ctx, symbol.as_deref(), failed, json).await,
        Commands::Force {
            symbol,
            target,
            max_windows,
            yes,
        } => commands::task::force(&ctx, &symbol, target, max_windows, yes).await,
        Commands::Reset {
            symbol,
            target,
            yes,
        } => commands::task::reset(&ctx, &symbol, target, yes).await,
        Commands::Pause { symbol } => commands::task::set_paused(&ctx, &symbol, true).await,
        Commands::Resume { symbol } => commands::task::set_paused(&ctx, &symbol, false).await,
        Commands::Quality { symbol } => commands::status::quality(&ctx, symbol.as_deref()).await,
        Commands::Registry { action } => match action {
            RegistryAction::Set {
                symbol,
                base,
                inactive,
                test,
            } => commands::registry::set(&ctx, &symbol, base, !inactive && !test, test).await,
            RegistryAction::List => commands::registry::list(&ctx).await,
        },
        Commands::ImportRaw { path } => commands::registry::import_raw(&ctx, &path).await,
        Commands::Runs { limit, json } => commands::status::runs(&ctx, limit, json),
        Commands::Task { action } => match action {
            TaskAction::Add {
                symbol,
                source,
                target,
                derived,
                from,
                delay,
                priority,
            } => {
                commands::task::add(
                    &ctx,
                    &symbol,
                    source,
                    target,
                    derived,
                    from,
                    delay,
                    priority,
                )
                .await
            }
        },
        Commands::Config { init, force } => commands::config::config(&ctx, init, force),
    }
}
