//! # addrsync - RouterOS address-list synchronizer
//!
//! Keeps a labelled subset of a RouterOS firewall address-list converged
//! with external feeds: plain-text IP lists served over HTTP and the
//! prefixes an Autonomous System originates according to a routing
//! registry. Each invocation is a one-shot convergence pass, meant to run
//! from cron or a systemd timer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        addrsync                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: sync, preview, asn, version                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── devices, jobs, retry, registry, fetch, alerts        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Feeds                                                      │
//! │    ├── Fetcher (reqwest + rustls) -> Extractor              │
//! │    └── Registry (whois -i origin) -> Extractor              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collapse (ipnet)                                           │
//! │    └── Minimal non-overlapping CIDR cover                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler                                                 │
//! │    └── desired set, current set, delta, change report       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Device (AddressListDevice trait)                           │
//! │    ├── CliDevice (ssh ControlMaster + retry adapter)        │
//! │    └── ApiDevice (RouterOS REST)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Alerts (gotify, webhook, telegram)                         │
//! │    └── Change reports and failure notices                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use addrsync::adapter::RetryPolicy;
//! use addrsync::config::Config;
//! use addrsync::device::connect;
//! use addrsync::fetcher::HttpFetcher;
//! use addrsync::reconciler::{converge_and_close, Reconciler, SyncJob};
//! use addrsync::registry::WhoisRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/addrsync/config.yaml")?;
//!
//!     let reconciler = Reconciler::new(
//!         Box::new(HttpFetcher::new(&config.fetch)?),
//!         Box::new(WhoisRegistry::new(&config.registry)),
//!     );
//!     let job = SyncJob::new("blocklist", "feed", "https://iplists.firehol.org/files/firehol_level1.netset,AS64500");
//!
//!     // Fetch failures abort here, before any device is contacted
//!     let desired = reconciler.desired_set(&job.feeds).await?;
//!
//!     let device = connect(&config.devices[0], RetryPolicy::from(&config.retry)).await?;
//!     let outcome = converge_and_close(device, &job, &desired, false).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Safety of a run
//!
//! - **Fail-closed fetching** - any feed or lookup failure, or an empty
//!   desired set, aborts before the device is touched
//! - **Label scoping** - only entries carrying the job's comment tag are
//!   read, added or removed
//! - **Injection prevention** - list names and labels are validated before
//!   being embedded in RouterOS commands
//! - **Confirmed reporting** - change reports list only changes the device
//!   acknowledged
//!
//! ## Modules
//!
//! - [`adapter`] - Empty-response retry for CLI commands
//! - [`address`] - Validated, globally routable address-list entries
//! - [`alerts`] - Notification destinations (Gotify, webhook, Telegram)
//! - [`cli`] - Command-line interface definitions
//! - [`collapse`] - CIDR aggregation
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`delta`] - Add/remove delta and change report
//! - [`device`] - RouterOS backends (CLI over SSH, REST API)
//! - [`extractor`] - IPv4 token extraction from free-form text
//! - [`feeds`] - Feed specification parsing
//! - [`fetcher`] - HTTP client for URL feeds
//! - [`reconciler`] - Convergence pipeline
//! - [`registry`] - ASN origin lookups
//! - [`utils`] - Formatting helpers

pub mod adapter;
pub mod address;
pub mod alerts;
pub mod cli;
pub mod cmd_abstraction;
pub mod collapse;
pub mod commands;
pub mod config;
pub mod delta;
pub mod device;
pub mod error;
pub mod extractor;
pub mod feeds;
pub mod fetcher;
pub mod reconciler;
pub mod registry;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::SyncError;
