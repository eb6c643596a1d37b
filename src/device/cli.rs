//! RouterOS CLI backend over an SSH ControlMaster session.
//!
//! One master connection is opened per run; every command is a short
//! `ssh -S <socket>` invocation multiplexed over it. Authentication
//! therefore happens once, when the master starts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{is_safe_routeros_value, AddressListDevice};
use crate::adapter::{send_with_retry, CommandChannel, RetryPolicy};
use crate::address::AddressEntry;
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, CommandOutput};
use crate::config::SshConfig;
use crate::error::SyncError;
use crate::extractor::extract_addresses;

const IDENTITY_COMMAND: &str = "/system identity print";
const ADDRESS_LIST_PATH: &str = "/ip firewall address-list";

/// Output prefixes RouterOS uses to report a rejected command
const CLI_ERROR_MARKERS: &[&str] = &[
    "failure:",
    "bad command name",
    "syntax error",
    "expected ",
    "input does not match",
    "no such item",
];

/// Where and how to reach the device with the system ssh client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub binary: String,
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl SshTarget {
    pub fn from_config(host: &str, config: &SshConfig) -> Self {
        Self {
            binary: config.ssh_binary.clone(),
            host: host.to_string(),
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// Options shared by the master and every multiplexed command
    fn common_args(&self) -> Vec<String> {
        let mut args = args_to_strings(&["-o", "BatchMode=yes", "-o"]);
        args.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        if let Some(port) = self.port {
            args.extend(args_to_strings(&["-p", port.to_string().as_str()]));
        }
        if let Some(user) = &self.user {
            args.extend(args_to_strings(&["-l", user.as_str()]));
        }
        args
    }
}

/// Run the ssh client on tokio's blocking pool.
async fn execute_blocking<E: CommandExecutor + 'static>(
    executor: &Arc<E>,
    binary: &str,
    args: Vec<String>,
) -> Result<CommandOutput> {
    let executor = Arc::clone(executor);
    let binary = binary.to_string();
    tokio::task::spawn_blocking(move || executor.execute(&binary, &args))
        .await
        .context("ssh task aborted")?
}

/// A scoped SSH master connection.
///
/// The control socket lives in a private temporary directory that is
/// removed with the session. Dropping an open session tears the master
/// down.
pub struct SshSession<E: CommandExecutor> {
    executor: Arc<E>,
    target: SshTarget,
    socket: PathBuf,
    open: AtomicBool,
    // Held for its Drop: removes the socket directory
    _control_dir: TempDir,
}

impl<E: CommandExecutor> SshSession<E> {
    pub fn host(&self) -> &str {
        &self.target.host
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn socket_arg(&self) -> String {
        self.socket.to_string_lossy().to_string()
    }

    fn exit_args(&self) -> Vec<String> {
        args_to_strings(&["-S", self.socket_arg().as_str(), "-O", "exit", self.target.host.as_str()])
    }

    fn check_exit(&self, output: CommandOutput) -> Result<()> {
        if !output.success {
            anyhow::bail!("Failed to stop SSH master: {}", output.diagnostic());
        }
        debug!("Closed SSH master to {}", self.target.host);
        Ok(())
    }
}

impl<E: CommandExecutor + 'static> SshSession<E> {
    /// Start the master connection, failing with a connectivity error when
    /// the host is unreachable or rejects authentication.
    pub async fn open(executor: E, target: SshTarget) -> Result<Self, SyncError> {
        let control_dir = tempfile::Builder::new()
            .prefix("addrsync-ssh-")
            .tempdir()
            .map_err(|e| SyncError::Connectivity(format!("control socket directory: {}", e)))?;
        let socket = control_dir.path().join("control.sock");

        let mut args = args_to_strings(&["-M", "-N", "-f", "-o", "ControlPersist=yes", "-S"]);
        args.push(socket.to_string_lossy().to_string());
        args.extend(target.common_args());
        if let Some(identity) = &target.identity_file {
            args.extend(args_to_strings(&["-i", &*identity.to_string_lossy()]));
        }
        args.push(target.host.clone());

        debug!("Opening SSH master to {}", target.host);
        let executor = Arc::new(executor);
        let output = execute_blocking(&executor, &target.binary, args)
            .await
            .map_err(|e| {
                SyncError::Connectivity(format!("failed to run {}: {:#}", target.binary, e))
            })?;
        if !output.success {
            return Err(SyncError::Connectivity(format!(
                "{}: {}",
                target.host,
                output.diagnostic()
            )));
        }

        Ok(Self {
            executor,
            target,
            socket,
            open: AtomicBool::new(true),
            _control_dir: control_dir,
        })
    }

    /// Run one RouterOS command over the master connection.
    pub async fn run(&self, command: &str) -> Result<String> {
        if !self.is_open() {
            anyhow::bail!("SSH session to {} is closed", self.target.host);
        }

        let mut args = args_to_strings(&["-S", self.socket_arg().as_str()]);
        args.extend(self.target.common_args());
        args.extend(args_to_strings(&[self.target.host.as_str(), command]));

        let output = execute_blocking(&self.executor, &self.target.binary, args)
            .await
            .with_context(|| format!("Failed to run {}", self.target.binary))?;
        if !output.success {
            anyhow::bail!(
                "ssh exited with {:?}: {}",
                output.code,
                output.diagnostic()
            );
        }
        Ok(output.stdout)
    }

    /// Stop the master connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let output = execute_blocking(&self.executor, &self.target.binary, self.exit_args()).await?;
        self.check_exit(output)
    }
}

impl<E: CommandExecutor> Drop for SshSession<E> {
    fn drop(&mut self) {
        // No runtime to await on here; stop the master inline
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let result = self
            .executor
            .execute(&self.target.binary, &self.exit_args())
            .and_then(|output| self.check_exit(output));
        if let Err(e) = result {
            warn!("Failed to close SSH session to {}: {:#}", self.target.host, e);
        }
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> CommandChannel for SshSession<E> {
    async fn send_command(&self, command: &str) -> Result<String> {
        self.run(command).await
    }
}

/// Address-list access through RouterOS CLI commands.
pub struct CliDevice<E: CommandExecutor> {
    session: SshSession<E>,
    policy: RetryPolicy,
}

impl<E: CommandExecutor + 'static> CliDevice<E> {
    /// Probe the session with an identity query before use.
    ///
    /// The probe goes through the retry adapter; a session that never
    /// answers is unusable.
    pub async fn connect(session: SshSession<E>, policy: RetryPolicy) -> Result<Self, SyncError> {
        let response = send_with_retry(&session, IDENTITY_COMMAND, policy)
            .await
            .map_err(|e| SyncError::Connectivity(format!("{}: {:#}", session.host(), e)))?;

        let identity = parse_identity(&response).ok_or_else(|| {
            SyncError::Connectivity(format!(
                "{}: no answer to identity probe after {} attempts",
                session.host(),
                policy.attempts
            ))
        })?;
        info!("Connected to {} (identity: {})", session.host(), identity);

        Ok(Self { session, policy })
    }

    async fn query(&self, command: &str) -> Result<String> {
        let output = send_with_retry(&self.session, command, self.policy).await?;
        check_cli_output(&output)?;
        Ok(output)
    }

    async fn execute(&self, command: &str) -> Result<()> {
        let output = self.session.run(command).await?;
        check_cli_output(&output)
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> AddressListDevice for CliDevice<E> {
    async fn read_current(&self, list: &str, label: &str) -> Result<BTreeSet<AddressEntry>> {
        ensure_safe(list, label)?;
        let output = self.query(&print_command(list, label)).await?;
        let current = parse_terse_addresses(&output);
        debug!(
            "{} has {} entries in {} tagged '{}'",
            self.session.host(),
            current.len(),
            list,
            label
        );
        Ok(current)
    }

    async fn add_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()> {
        ensure_safe(list, label)?;
        self.execute(&add_command(list, label, entry)).await
    }

    async fn remove_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()> {
        ensure_safe(list, label)?;
        let output = self.query(&find_ids_command(list, label, entry)).await?;
        let ids = parse_item_ids(&output);
        if ids.is_empty() {
            anyhow::bail!("no entry {} in {} tagged '{}'", entry, list, label);
        }
        self.execute(&remove_command(&ids)).await
    }

    async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

fn ensure_safe(list: &str, label: &str) -> Result<()> {
    if !is_safe_routeros_value(list) || !is_safe_routeros_value(label) {
        anyhow::bail!("refusing unsafe list name or label: {:?} / {:?}", list, label);
    }
    Ok(())
}

fn print_command(list: &str, label: &str) -> String {
    format!(
        "{} print terse without-paging where list=\"{}\" and comment=\"{}\"",
        ADDRESS_LIST_PATH, list, label
    )
}

fn find_ids_command(list: &str, label: &str, entry: &AddressEntry) -> String {
    format!(
        ":put [{} find where list=\"{}\" and comment=\"{}\" and address=\"{}\"]",
        ADDRESS_LIST_PATH, list, label, entry
    )
}

fn remove_command(ids: &[String]) -> String {
    format!("{} remove numbers={}", ADDRESS_LIST_PATH, ids.join(","))
}

fn add_command(list: &str, label: &str, entry: &AddressEntry) -> String {
    format!(
        "{} add list=\"{}\" comment=\"{}\" address={}",
        ADDRESS_LIST_PATH, list, label, entry
    )
}

/// RouterOS reports command errors on stdout with a zero exit status.
fn check_cli_output(output: &str) -> Result<()> {
    let trimmed = output.trim();
    let lower = trimmed.to_ascii_lowercase();
    if CLI_ERROR_MARKERS.iter().any(|m| lower.starts_with(m)) {
        anyhow::bail!("device rejected command: {}", trimmed);
    }
    Ok(())
}

/// Name from `/system identity print` output (`name: R1`).
fn parse_identity(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return None;
    }
    let name = trimmed
        .lines()
        .find_map(|line| line.trim().strip_prefix("name:"))
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| trimmed.to_string());
    Some(name)
}

/// Addresses from `print terse` output.
///
/// Only the `address=` field of each row is scanned, so a comment that
/// happens to contain a dotted quad is never mistaken for an entry.
/// Rows whose address is a hostname are skipped.
fn parse_terse_addresses(output: &str) -> BTreeSet<AddressEntry> {
    output
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .find_map(|field| field.strip_prefix("address="))
        })
        .flat_map(extract_addresses)
        .collect()
}

/// Internal ids (`*1A`) from a `:put [find ...]` answer.
fn parse_item_ids(output: &str) -> Vec<String> {
    output
        .split(|c: char| c == ';' || c.is_whitespace())
        .filter(|id| id.starts_with('*') && id.len() > 1)
        .map(str::to_string)
        .collect()
}
