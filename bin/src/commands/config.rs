//! Configuration display and initialization.

use anyhow::{Context as _, Result, bail};
use std::fs;

use super::Context;

/// Print the effective configuration, or write it to the config path.
pub(crate) fn config(ctx: &Context, init: bool, force: bool) -> Result<()> {
    let rendered = ctx.config.to_toml().context("Failed to render config")?;
    let path = &ctx.config_path;

    if !init {
        let origin = if path.exists() { "" } else { " (not present, defaults)" };
        println!("# {}{origin}", path.display());
        println!("# state directory: {}", ctx.state.base_path().display());
        println!("# store: {}\n", ctx.config.store_path(&ctx.state).display());
        print!("{rendered}");
        return Ok(());
    }

    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    Ok(())
}
