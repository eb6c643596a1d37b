//! addrsync - RouterOS address-list synchronizer
//!
//! Keeps tagged address-list entries on RouterOS devices converged with
//! IP feeds and BGP origin data.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use addrsync::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Sync {
            devices,
            feeds,
            list,
            label,
            dry_run,
        } => {
            let request = addrsync::commands::sync::SyncRequest {
                devices,
                feeds,
                list,
                label,
                dry_run,
            };
            addrsync::commands::sync::run(request, &cli.config).await
        }
        Commands::Preview { feeds } => addrsync::commands::preview::run(&feeds, &cli.config).await,
        Commands::Asn { asn } => addrsync::commands::asn::run(&asn, &cli.config).await,
        Commands::Version => {
            println!("addrsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
