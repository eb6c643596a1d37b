//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "addrsync")]
#[command(author, version, about = "RouterOS address-list synchronizer")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "/etc/addrsync/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (for cron/systemd timer)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize address lists on the configured devices
    Sync {
        /// Target device name (repeatable; default: all devices)
        #[arg(short = 'n', long = "device")]
        devices: Vec<String>,

        /// Feed specification: comma-separated URLs and ASNs (e.g. "https://x/list.txt,AS13335")
        #[arg(short = 'u', long, requires_all = ["list", "label"])]
        feeds: Option<String>,

        /// Address-list name (with --feeds)
        #[arg(short, long, requires = "feeds")]
        list: Option<String>,

        /// Comment tag identifying managed entries (with --feeds)
        #[arg(short = 't', long, requires = "feeds")]
        label: Option<String>,

        /// Read device state and print the delta without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch and collapse feeds, print the resulting desired set
    Preview {
        /// Feed specification: comma-separated URLs and ASNs
        #[arg(short = 'u', long)]
        feeds: String,
    },

    /// Show the validated prefixes originated by an ASN
    Asn {
        /// Autonomous System Number (e.g. AS13335)
        asn: String,
    },

    /// Show version
    Version,
}
