//! Operator actions on individual tasks and symbols.

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use inquire::Confirm;
use ratchet_lib::{AggregationTask, BarSource, RegistryStore, RunOptions, TaskStore, Timeframe};

use super::{Context, parse_key, parse_symbol};
use crate::display::{fmt_time, outcome_line};

/// Ask for confirmation unless `yes` was passed.
fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Confirm::new(prompt)
        .with_default(false)
        .prompt()
        .context("Confirmation cancelled")
}

/// Run one task now, ignoring its schedule and confirmation delay.
pub(crate) async fn force(
    ctx: &Context,
    symbol: &str,
    target: Timeframe,
    max_windows: Option<u32>,
    yes: bool,
) -> Result<()> {
    let key = parse_key(symbol, target)?;
    let prompt = format!("Run {key} now, including windows inside the confirmation delay?");
    if !confirm(&prompt, yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let scheduler = ctx.scheduler()?;
    let run = scheduler
        .worker()
        .run_task(
            &key,
            RunOptions {
                force: true,
                max_windows,
            },
        )
        .await
        .with_context(|| format!("Failed to run {key}"))?;

    println!("{key}: {}", outcome_line(&run));
    if run.outcome.is_failure() {
        bail!("Forced run of {key} failed");
    }
    Ok(())
}

/// Clear the failure state of a task.
pub(crate) async fn reset(ctx: &Context, symbol: &str, target: Timeframe, yes: bool) -> Result<()> {
    let key = parse_key(symbol, target)?;
    let task = ctx
        .store
        .get_task(&key)
        .await?
        .with_context(|| format!("Task not found: {key}"))?;

    println!(
        "{key}: status {}, {} consecutive failures, cursor {}",
        task.status,
        task.hard_fail_streak,
        fmt_time(task.cursor)
    );
    if let Some(ref err) = task.last_error {
        println!("Last error: {err}");
    }
    if !confirm(&format!("Reset {key}?"), yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let scheduler = ctx.scheduler()?;
    let task = scheduler
        .worker()
        .reset_task(&key)
        .await
        .with_context(|| format!("Failed to reset {key}"))?;
    println!("{key} reset to {}.", task.status);
    Ok(())
}

/// Set or clear the pause flag of a symbol.
pub(crate) async fn set_paused(ctx: &Context, symbol: &str, paused: bool) -> Result<()> {
    let symbol = parse_symbol(symbol)?;
    let changed = ctx.store.set_paused(&symbol, paused).await?;
    let state = if paused { "paused" } else { "resumed" };

    if changed {
        println!("{symbol} {state}.");
    } else {
        println!("{symbol} was already {state}.");
    }
    Ok(())
}

/// Add an optional task outside the standard rollup chain.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn add(
    ctx: &Context,
    symbol: &str,
    source: Timeframe,
    target: Timeframe,
    derived: bool,
    from: Option<DateTime<Utc>>,
    delay: i64,
    priority: i32,
) -> Result<()> {
    if delay < 0 {
        bail!("Confirmation delay must not be negative");
    }

    let key = parse_key(symbol, target)?;
    let now = Utc::now();
    let table = if derived {
        BarSource::Derived
    } else {
        BarSource::Raw
    };
    let task = AggregationTask::new(key.clone(), source, table, from.unwrap_or(now), now)
        .with_context(|| format!("Cannot roll {source} up to {target}"))?
        .with_confirmation_delay(delay)
        .with_priority(priority);

    let task = ctx
        .store
        .insert_task(task)
        .await
        .with_context(|| format!("Failed to add {key}"))?;
    println!(
        "Added {key} from {source} {table} bars, starting {}.",
        fmt_time(Some(task.lower_bound))
    );
    Ok(())
}
