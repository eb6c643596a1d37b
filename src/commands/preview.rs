//! Preview command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use super::build_reconciler;
use crate::config::Config;
use crate::utils::{format_count, format_count_with_separator};

/// Print the desired set for a feed specification without contacting any device
pub async fn run(feeds: &str, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let reconciler = build_reconciler(&config)?;
    let desired = reconciler.desired_set(feeds).await?;

    for entry in &desired.entries {
        println!("{}", entry);
    }

    println!();
    println!(
        "[OK] {} entries from {} extracted ({} addresses)",
        format_count_with_separator(desired.len() as u64),
        format_count_with_separator(desired.extracted as u64),
        format_count(desired.address_count())
    );

    Ok(())
}
