//! Registry maintenance and raw bar import.

use anyhow::{Context as _, Result};
use ratchet_lib::{Bar, RegistryEntry, RegistryStore, Timeframe};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{Context, parse_symbol};

/// Add or update a registry row.
pub(crate) async fn set(
    ctx: &Context,
    symbol: &str,
    base: Timeframe,
    active: bool,
    test_active: bool,
) -> Result<()> {
    let entry = RegistryEntry {
        symbol: parse_symbol(symbol)?,
        active,
        test_active,
        base_timeframe: base,
    };
    let live = entry.is_live();
    let symbol = entry.symbol.clone();

    ctx.store
        .put_registry_entry(entry)
        .await
        .context("Failed to write registry")?;

    if live {
        println!("{symbol} registered at {base}. Run `ratchet sync` to create its tasks.");
    } else {
        println!("{symbol} marked inactive. Its tasks are disabled on the next sync.");
    }
    Ok(())
}

/// List registry rows.
pub(crate) async fn list(ctx: &Context) -> Result<()> {
    let mut entries = ctx.store.registry().await.context("Failed to read registry")?;
    if entries.is_empty() {
        println!("Registry is empty.");
        return Ok(());
    }
    entries.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    println!("{:<16} {:<6} {:<8}", "SYMBOL", "BASE", "STATE");
    println!("{}", "-".repeat(32));
    for entry in &entries {
        let state = match (entry.active, entry.test_active) {
            (true, _) => "active",
            (false, true) => "test",
            (false, false) => "inactive",
        };
        println!(
            "{:<16} {:<6} {:<8}",
            entry.symbol, entry.base_timeframe, state
        );
    }

    println!("\nTotal: {} symbols", entries.len());
    Ok(())
}

/// Parse newline-delimited JSON bars, normalizing symbols. Blank lines are
/// ignored.
fn read_bars(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut bars = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut bar: Bar = serde_json::from_str(&line)
            .with_context(|| format!("Invalid bar on line {}", idx + 1))?;
        bar.symbol = parse_symbol(bar.symbol.as_str())?;
        bars.push(bar);
    }

    Ok(bars)
}

/// Load raw bars from an NDJSON file into the store.
pub(crate) async fn import_raw(ctx: &Context, path: &Path) -> Result<()> {
    let bars = read_bars(path)?;
    let total = bars.len();
    let inserted = ctx
        .store
        .import_raw_bars(bars)
        .await
        .context("Failed to import raw bars")?;

    println!(
        "Imported {inserted} new raw bars ({} already present).",
        total - inserted
    );
    Ok(())
}
