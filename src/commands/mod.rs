//! CLI command implementations.

pub mod asn;
pub mod preview;
pub mod sync;

use anyhow::Result;

use crate::config::Config;
use crate::fetcher::HttpFetcher;
use crate::reconciler::Reconciler;
use crate::registry::WhoisRegistry;

/// Reconciler wired to the real HTTP fetcher and whois registry.
pub(crate) fn build_reconciler(config: &Config) -> Result<Reconciler> {
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let registry = WhoisRegistry::new(&config.registry);
    Ok(Reconciler::new(Box::new(fetcher), Box::new(registry)))
}
