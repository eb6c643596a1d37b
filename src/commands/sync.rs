//! Sync command implementation.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::build_reconciler;
use crate::adapter::RetryPolicy;
use crate::alerts::{AlertManager, Notice, NotificationSink};
use crate::config::{Config, DeviceConfig};
use crate::device::{connect, AddressListDevice};
use crate::error::SyncError;
use crate::reconciler::{converge_and_close, DesiredSet, Reconciler, RunOutcome, SyncJob};

/// Options of `addrsync sync`
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Device names; empty means every device a job targets
    pub devices: Vec<String>,
    /// Ad-hoc feed specification replacing the configured jobs
    pub feeds: Option<String>,
    pub list: Option<String>,
    pub label: Option<String>,
    pub dry_run: bool,
}

/// Terminal state of one device target.
#[derive(Debug)]
pub struct TargetResult {
    pub target: String,
    pub outcome: Result<RunOutcome, SyncError>,
}

/// Run the sync command
pub async fn run(request: SyncRequest, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let plans = plan_jobs(&config, &request)?;
    if plans.is_empty() {
        warn!("No jobs to run. Configure jobs or pass --feeds, --list and --label.");
        return Ok(());
    }

    let reconciler = build_reconciler(&config)?;
    let alerts = AlertManager::new(config.alerts.clone())?;
    let policy = RetryPolicy::from(&config.retry);

    let mut failures = 0;
    for (job, targets) in plans {
        failures += sync_job(&reconciler, &alerts, policy, job, targets, request.dry_run).await;
    }

    if failures > 0 {
        anyhow::bail!("{} target(s) failed to synchronize", failures);
    }
    Ok(())
}

/// Resolve the jobs to run and the devices each one targets.
pub fn plan_jobs(config: &Config, request: &SyncRequest) -> Result<Vec<(SyncJob, Vec<DeviceConfig>)>> {
    if let Some(feeds) = &request.feeds {
        let list = request
            .list
            .clone()
            .context("--list is required with --feeds")?;
        let label = request
            .label
            .clone()
            .context("--label is required with --feeds")?;
        let job = SyncJob::new(list, label, feeds.clone());
        job.validate()?;

        let targets = config.select_devices(&request.devices)?;
        if targets.is_empty() {
            anyhow::bail!("No devices configured");
        }
        return Ok(vec![(job, targets)]);
    }

    // Reject unknown names even when no job would use them
    config.select_devices(&request.devices)?;

    let mut plans = Vec::new();
    for job_config in &config.jobs {
        let job_targets = config.select_devices(&job_config.devices)?;
        let targets: Vec<DeviceConfig> = job_targets
            .into_iter()
            .filter(|d| request.devices.is_empty() || request.devices.contains(&d.name))
            .collect();
        if targets.is_empty() {
            continue;
        }
        plans.push((SyncJob::from(job_config), targets));
    }
    Ok(plans)
}

/// Run one job on all its targets. Returns the number of failed targets.
async fn sync_job(
    reconciler: &Reconciler,
    sink: &dyn NotificationSink,
    policy: RetryPolicy,
    job: SyncJob,
    targets: Vec<DeviceConfig>,
    dry_run: bool,
) -> usize {
    info!("Synchronizing list '{}' (label '{}')", job.list, job.label);

    // Fetch once per job; a failure here means no device is contacted
    let desired = match reconciler.desired_set(&job.feeds).await {
        Ok(desired) => desired,
        Err(e) => {
            error!("List '{}': {}", job.list, e);
            sink.notify(&Notice::fetch_failed(&job.list, &e)).await;
            return targets.len();
        }
    };

    let results = sync_targets(targets, &job, desired, dry_run, move |device: DeviceConfig| async move {
        connect(&device, policy).await
    })
    .await;

    let mut failures = 0;
    for result in &results {
        print_result(&job, result);
        match &result.outcome {
            Ok(RunOutcome::Applied(report)) => {
                sink.notify(&Notice::change_report(&result.target, report)).await
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                sink.notify(&Notice::sync_failed(&result.target, e)).await
            }
        }
    }
    failures
}

/// Converge every target in its own task, with its own session.
///
/// Results are returned only once every task has finished, in target
/// order.
pub async fn sync_targets<C, Fut>(
    targets: Vec<DeviceConfig>,
    job: &SyncJob,
    desired: DesiredSet,
    dry_run: bool,
    connector: C,
) -> Vec<TargetResult>
where
    C: Fn(DeviceConfig) -> Fut,
    Fut: Future<Output = Result<Box<dyn AddressListDevice>, SyncError>> + Send + 'static,
{
    let job = Arc::new(job.clone());
    let desired = Arc::new(desired);
    let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| {
            let job = Arc::clone(&job);
            let desired = Arc::clone(&desired);
            let name = target.name.clone();
            let session = connector(target);
            tokio::spawn(async move {
                let device = session.await.map_err(|e| {
                    warn!("{}: {}", name, e);
                    e
                })?;
                converge_and_close(device, &job, &desired, dry_run).await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .zip(names)
        .map(|(joined, target)| TargetResult {
            outcome: joined.unwrap_or_else(|e| {
                Err(SyncError::Device(format!("task for {} aborted: {}", target, e)))
            }),
            target,
        })
        .collect()
}

fn print_result(job: &SyncJob, result: &TargetResult) {
    match &result.outcome {
        Ok(RunOutcome::Unchanged) => {
            println!("[OK] {}: '{}' already up to date", result.target, job.list)
        }
        Ok(RunOutcome::Planned(delta)) => {
            println!(
                "[DRY-RUN] {}: '{}' would get +{} -{}",
                result.target,
                job.list,
                delta.to_add.len(),
                delta.to_remove.len()
            );
            for entry in &delta.to_remove {
                println!("  - {}", entry);
            }
            for entry in &delta.to_add {
                println!("  + {}", entry);
            }
        }
        Ok(RunOutcome::Applied(report)) => {
            let status = if report.has_failures() { "WARN" } else { "OK" };
            println!(
                "[{}] {}: '{}' +{} -{} ({} failed)",
                status,
                result.target,
                job.list,
                report.added.len(),
                report.removed.len(),
                report.failed.len()
            );
            for failure in &report.failed {
                println!("  ! {} {}: {}", failure.action, failure.entry, failure.reason);
            }
        }
        Err(e) => println!("[FAIL] {}: {}", result.target, e),
    }
}
