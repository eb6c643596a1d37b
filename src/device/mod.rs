//! RouterOS address-list backends (CLI over SSH, REST API).

mod api;
mod cli;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

pub use api::ApiDevice;
pub use cli::{CliDevice, SshSession, SshTarget};

use crate::adapter::RetryPolicy;
use crate::address::AddressEntry;
use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::{Backend, DeviceConfig};
use crate::delta::{ChangeAction, ChangeReport, Delta};
use crate::error::SyncError;

/// Characters that would let a value escape a quoted RouterOS argument.
const UNSAFE_CHARS: &[char] = &['"', '\'', '\\', '$', '[', ']', ';', '{', '}', '`'];

/// Maximum length of a list name or comment accepted by RouterOS
const MAX_VALUE_LEN: usize = 255;

/// Check that a list name or label can be embedded in a RouterOS command.
pub fn is_safe_routeros_value(value: &str) -> bool {
    !value.trim().is_empty()
        && value.len() <= MAX_VALUE_LEN
        && !value.chars().any(|c| c.is_control() || UNSAFE_CHARS.contains(&c))
}

/// An open session on one device, scoped to address-list operations.
///
/// Sessions are exclusively owned by one run and must be closed on every
/// exit path.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressListDevice: Send + Sync {
    /// Entries of `list` whose comment is `label`
    async fn read_current(&self, list: &str, label: &str) -> Result<BTreeSet<AddressEntry>>;

    /// Add one entry tagged with `label`
    async fn add_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()>;

    /// Remove the entry with this address from `list`, only if tagged `label`
    async fn remove_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()>;

    /// Release the session
    async fn close(&self) -> Result<()>;
}

/// Apply a delta entry by entry, folding every outcome into `report`.
///
/// Removals go first, then additions, each in set order. A failing call
/// is recorded and the remaining entries are still processed.
pub async fn apply_delta(
    device: &dyn AddressListDevice,
    delta: &Delta,
    report: ChangeReport,
) -> ChangeReport {
    let list = report.list.clone();
    let label = report.label.clone();
    let mut report = report;

    for entry in &delta.to_remove {
        let result = device.remove_entry(&list, &label, entry).await;
        match &result {
            Ok(()) => debug!("Removed {} from {}", entry, list),
            Err(e) => warn!("Failed to remove {} from {}: {:#}", entry, list, e),
        }
        report = report.record(ChangeAction::Remove, *entry, result);
    }

    for entry in &delta.to_add {
        let result = device.add_entry(&list, &label, entry).await;
        match &result {
            Ok(()) => debug!("Added {} to {}", entry, list),
            Err(e) => warn!("Failed to add {} to {}: {:#}", entry, list, e),
        }
        report = report.record(ChangeAction::Add, *entry, result);
    }

    report
}

/// Open a session on the configured device.
///
/// The backend is chosen here once and never switched during a run.
pub async fn connect(
    config: &DeviceConfig,
    policy: RetryPolicy,
) -> Result<Box<dyn AddressListDevice>, SyncError> {
    info!("Connecting to {} ({:?} backend)", config.name, config.backend);
    match config.backend {
        Backend::Cli => {
            let target = SshTarget::from_config(&config.host, &config.ssh);
            let session = SshSession::open(RealCommandExecutor::new(), target).await?;
            let device = CliDevice::connect(session, policy).await?;
            Ok(Box::new(device))
        }
        Backend::Api => {
            let device = ApiDevice::connect(&config.host, &config.api).await?;
            Ok(Box::new(device))
        }
    }
}
