//! Scheduler, tick and sync commands.

use anyhow::{Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::Context;
use crate::display::{print_reconcile, print_tick_report};

/// Run the scheduler until Ctrl+C, or for a fixed number of ticks.
pub(crate) async fn run(ctx: &Context, ticks: Option<u64>) -> Result<()> {
    let scheduler = ctx.scheduler()?;

    if let Some(limit) = ticks {
        for tick in 0..limit {
            let report = scheduler
                .tick_once(tick)
                .await
                .with_context(|| format!("Tick {tick} failed"))?;
            print_tick_report(&report);
            if tick + 1 < limit {
                tokio::time::sleep(ctx.config.scheduler.tick_interval()).await;
            }
        }
        scheduler.stats().save_checkpoint().await?;
        return Ok(());
    }

    println!(
        "Scheduler running every {}s (Ctrl+C to stop)",
        ctx.config.scheduler.tick_interval_secs
    );
    let ran = scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await?;
    println!("Stopped after {ran} ticks.");
    Ok(())
}

/// Sync the task table and run one tick.
pub(crate) async fn tick(ctx: &Context, quiet: bool) -> Result<()> {
    let scheduler = ctx.scheduler()?;

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };
    spinner.set_message("Running tick...");

    let result = scheduler.tick_once(0).await;
    spinner.finish_and_clear();

    let report = result.context("Tick failed")?;
    scheduler.stats().save_checkpoint().await?;
    print_tick_report(&report);
    Ok(())
}

/// Reconcile the task table with the registry.
pub(crate) async fn sync(ctx: &Context) -> Result<()> {
    let scheduler = ctx.scheduler()?;
    let report = scheduler.sync().await.context("Registry sync failed")?;
    scheduler.stats().save_checkpoint().await?;
    print_reconcile(&report);
    Ok(())
}
