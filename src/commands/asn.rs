//! ASN lookup command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::collapse::{collapse, count_addresses};
use crate::config::Config;
use crate::feeds::Asn;
use crate::registry::{resolve_origin_prefixes, WhoisRegistry};
use crate::utils::format_count;

/// Print the validated prefixes originated by `asn`
pub async fn run(asn: &str, config_path: &Path) -> Result<()> {
    let asn: Asn = asn.trim().parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let config = Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let registry = WhoisRegistry::new(&config.registry);

    let prefixes = resolve_origin_prefixes(&registry, asn)
        .await
        .with_context(|| format!("Lookup of {} via {} failed", asn, config.registry.server))?;

    let mut sorted = prefixes.clone();
    sorted.sort();
    sorted.dedup();
    for prefix in &sorted {
        println!("{}", prefix);
    }

    let collapsed = collapse(&prefixes);
    println!();
    println!(
        "[OK] {}: {} prefixes, {} after collapse ({} addresses)",
        asn,
        sorted.len(),
        collapsed.len(),
        format_count(count_addresses(&collapsed))
    );

    Ok(())
}
