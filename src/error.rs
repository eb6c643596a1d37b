//! Error types for addrsync.

use thiserror::Error;

use crate::registry::LookupError;

/// Failures that abort a synchronization run.
///
/// Per-address actuation failures are not represented here: they are
/// collected into the change report and never abort the run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Origin lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Device error: {0}")]
    Device(String),
}

impl SyncError {
    /// True for errors raised while building the desired set.
    ///
    /// Such errors always happen before any device is contacted.
    pub fn is_fetch_phase(&self) -> bool {
        matches!(self, SyncError::Fetch(_) | SyncError::Lookup(_))
    }
}
