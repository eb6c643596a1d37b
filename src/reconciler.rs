//! Convergence of one device list toward the desired membership.
//!
//! A run moves through `Fetching -> Diffing -> Actuating -> Reporting`.
//! Any failure while fetching aborts before the device is touched, and an
//! empty desired set counts as such a failure: it is never taken as an
//! instruction to empty a live list.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::address::AddressEntry;
use crate::alerts::{Notice, NotificationSink};
use crate::collapse::{collapse, count_addresses};
use crate::config::JobConfig;
use crate::delta::{ChangeReport, Delta};
use crate::device::{apply_delta, is_safe_routeros_value, AddressListDevice};
use crate::error::SyncError;
use crate::extractor::extract_addresses;
use crate::feeds::resolve_feeds;
use crate::fetcher::FeedFetcher;
use crate::registry::{resolve_origin_prefixes, OriginRegistry};

/// Concurrent URL downloads per job
const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// What to synchronize: one list, one label, one feed specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub list: String,
    pub label: String,
    pub feeds: String,
}

impl SyncJob {
    pub fn new(list: impl Into<String>, label: impl Into<String>, feeds: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            label: label.into(),
            feeds: feeds.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !is_safe_routeros_value(&self.list) {
            return Err(SyncError::Config(format!("invalid list name '{}'", self.list)));
        }
        if !is_safe_routeros_value(&self.label) {
            return Err(SyncError::Config(format!("invalid label '{}'", self.label)));
        }
        Ok(())
    }
}

impl From<&JobConfig> for SyncJob {
    fn from(job: &JobConfig) -> Self {
        Self::new(job.list.clone(), job.label.clone(), job.feeds.clone())
    }
}

/// Collapsed membership computed from the feeds of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSet {
    pub entries: BTreeSet<AddressEntry>,
    /// Valid entries extracted before collapsing, duplicates included
    pub extracted: usize,
}

impl DesiredSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of addresses covered
    pub fn address_count(&self) -> u64 {
        count_addresses(&self.entries)
    }
}

/// Terminal state of a run that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Device already matches; no actuation call was made
    Unchanged,
    /// Dry run: the delta that would have been applied
    Planned(Delta),
    /// Delta applied; only confirmed changes are listed
    Applied(ChangeReport),
}

pub struct Reconciler {
    fetcher: Box<dyn FeedFetcher>,
    registry: Box<dyn OriginRegistry>,
    fetch_concurrency: usize,
}

impl Reconciler {
    pub fn new(fetcher: Box<dyn FeedFetcher>, registry: Box<dyn OriginRegistry>) -> Self {
        Self {
            fetcher,
            registry,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    /// Resolve, fetch, extract and collapse the feeds of `spec`.
    ///
    /// Fails if any URL cannot be fetched, any ASN lookup fails, or the
    /// union of all sources holds no valid address.
    pub async fn desired_set(&self, spec: &str) -> Result<DesiredSet, SyncError> {
        let resolved = resolve_feeds(spec);
        if resolved.is_empty() {
            return Err(SyncError::Fetch(format!("no feed sources in '{}'", spec)));
        }
        info!(
            "Fetching {} URL(s) and {} ASN(s)",
            resolved.urls.len(),
            resolved.asns.len()
        );

        // Merged by set union, so completion order does not matter
        let fetched: Vec<(&String, anyhow::Result<String>)> = stream::iter(resolved.urls.iter())
            .map(|url| async move { (url, self.fetcher.fetch_text(url).await) })
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        let mut union: Vec<AddressEntry> = Vec::new();
        for (url, result) in fetched {
            let body = result.map_err(|e| SyncError::Fetch(format!("{:#}", e)))?;
            let entries = extract_addresses(&body);
            debug!("{}: {} valid entries", url, entries.len());
            union.extend(entries);
        }

        for asn in &resolved.asns {
            let prefixes = resolve_origin_prefixes(self.registry.as_ref(), *asn).await?;
            union.extend(prefixes);
        }

        if union.is_empty() {
            return Err(SyncError::Fetch(
                "feeds yielded no valid addresses".to_string(),
            ));
        }

        let entries = collapse(&union);
        info!(
            "Desired set: {} entries from {} extracted ({} addresses)",
            entries.len(),
            union.len(),
            count_addresses(&entries)
        );
        Ok(DesiredSet {
            entries,
            extracted: union.len(),
        })
    }

    /// Full run against one device: fetch, diff, actuate, report.
    ///
    /// The device session is not closed here; its owner does that.
    pub async fn run(
        &self,
        device: &dyn AddressListDevice,
        job: &SyncJob,
        dry_run: bool,
        sink: &dyn NotificationSink,
    ) -> Result<RunOutcome, SyncError> {
        job.validate()?;

        let desired = match self.desired_set(&job.feeds).await {
            Ok(desired) => desired,
            Err(e) => {
                sink.notify(&Notice::fetch_failed(&job.list, &e)).await;
                return Err(e);
            }
        };

        let outcome = converge(device, job, &desired, dry_run).await;
        match &outcome {
            Ok(RunOutcome::Applied(report)) => {
                sink.notify(&Notice::change_report(&job.list, report)).await
            }
            Err(e) => sink.notify(&Notice::sync_failed(&job.list, e)).await,
            Ok(_) => {}
        }
        outcome
    }
}

/// Diff the device against `desired` and apply the difference.
///
/// An empty delta returns [`RunOutcome::Unchanged`] without any actuation
/// call.
pub async fn converge(
    device: &dyn AddressListDevice,
    job: &SyncJob,
    desired: &DesiredSet,
    dry_run: bool,
) -> Result<RunOutcome, SyncError> {
    let current = device
        .read_current(&job.list, &job.label)
        .await
        .map_err(|e| SyncError::Device(format!("reading {}: {:#}", job.list, e)))?;

    let delta = Delta::compute(&desired.entries, &current);
    info!(
        "List '{}': {} current, {} desired, +{} -{}",
        job.list,
        current.len(),
        desired.len(),
        delta.to_add.len(),
        delta.to_remove.len()
    );

    if delta.is_empty() {
        info!("List '{}' is up to date", job.list);
        return Ok(RunOutcome::Unchanged);
    }
    if dry_run {
        return Ok(RunOutcome::Planned(delta));
    }

    let report = apply_delta(device, &delta, ChangeReport::new(&job.list, &job.label)).await;
    if report.has_failures() {
        warn!(
            "List '{}': {} of {} changes failed",
            job.list,
            report.failed.len(),
            delta.len()
        );
    }
    Ok(RunOutcome::Applied(report))
}

/// Converge, then close the session whatever the outcome.
pub async fn converge_and_close(
    device: Box<dyn AddressListDevice>,
    job: &SyncJob,
    desired: &DesiredSet,
    dry_run: bool,
) -> Result<RunOutcome, SyncError> {
    let outcome = converge(device.as_ref(), job, desired, dry_run).await;
    if let Err(e) = device.close().await {
        warn!("Failed to close device session: {:#}", e);
    }
    outcome
}
