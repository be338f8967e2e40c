//! Read-only queries over task state, bar quality and the run log.

use anyhow::{Context as _, Result};
use ratchet_lib::{BarStore, RegistryStore, TaskStore};

use super::{Context, parse_symbol};
use crate::display::{print_quality, print_tasks, print_tick_report};

/// Show task state, optionally for one symbol or only failed tasks.
pub(crate) async fn status(
    ctx: &Context,
    symbol: Option<&str>,
    failed_only: bool,
    json: bool,
) -> Result<()> {
    let symbol = symbol.map(parse_symbol).transpose()?;
    let paused = ctx.store.paused_symbols().await?;

    let mut tasks: Vec<_> = ctx
        .store
        .list_tasks()
        .await
        .context("Failed to list tasks")?
        .into_iter()
        .filter(|t| symbol.as_ref().is_none_or(|s| t.symbol() == s))
        .filter(|t| !failed_only || t.status.is_failed())
        .collect();
    tasks.sort_by(|a, b| a.key.cmp(&b.key));

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        if !failed_only {
            println!("Add symbols with `ratchet registry set` and run `ratchet sync`.");
        }
        return Ok(());
    }

    print_tasks(&tasks);

    let alarms: Vec<_> = tasks
        .iter()
        .filter(|t| t.mandatory && t.status.is_failed())
        .collect();
    if !alarms.is_empty() {
        println!("\nMandatory tasks needing attention:");
        for task in alarms {
            println!("  {} ({})", task.key, task.status);
        }
    }

    if !paused.is_empty() {
        let names: Vec<_> = paused.iter().map(ToString::to_string).collect();
        println!("\nPaused: {}", names.join(", "));
    }
    Ok(())
}

/// Show derived bar counts by quality tier.
pub(crate) async fn quality(ctx: &Context, symbol: Option<&str>) -> Result<()> {
    let symbol = symbol.map(parse_symbol).transpose()?;
    let counters = ctx
        .store
        .quality_summary(symbol.as_ref())
        .await
        .context("Failed to read quality counters")?;

    if counters.is_empty() {
        println!("No derived bars yet.");
        return Ok(());
    }

    print_quality(&counters);
    Ok(())
}

/// Show the most recent tick reports, newest first.
pub(crate) fn runs(ctx: &Context, limit: usize, json: bool) -> Result<()> {
    let reports = ctx
        .state
        .list_tick_reports(limit)
        .context("Failed to read run log")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for report in &reports {
        print_tick_report(report);
    }

    let stats = ratchet_lib::StatsTracker::load(&ctx.state)?;
    println!(
        "\nLifetime: {} ticks, {} syncs, {} bars created, {} degraded, {} failures",
        stats.ticks, stats.syncs, stats.bars_created, stats.poor_quality, stats.tasks_failed
    );
    if let Some(ref err) = stats.last_error {
        println!("Last error: {err}");
    }
    Ok(())
}
