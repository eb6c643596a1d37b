//! Command/response retry over a CLI session.
//!
//! RouterOS over SSH can hand back an empty response to a command that did
//! run, when the output has not been flushed yet. Reissuing after a short
//! pause recovers it. Exhausting the attempts is not an error: a filter
//! matching nothing legitimately prints nothing.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::RetryConfig;

/// Bounded retry policy for empty responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.delay_ms))
    }
}

/// A channel accepting one command string and returning its raw output.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn send_command(&self, command: &str) -> Result<String>;
}

/// Send `command`, reissuing it while the response is blank.
///
/// Returns the first non-blank response, or the last (blank) one once the
/// policy's attempts are used up. Transport errors are returned as-is and
/// never retried here.
pub async fn send_with_retry(
    channel: &dyn CommandChannel,
    command: &str,
    policy: RetryPolicy,
) -> Result<String> {
    let attempts = policy.attempts.max(1);
    let mut response = String::new();

    for attempt in 1..=attempts {
        response = channel.send_command(command).await?;
        if !response.trim().is_empty() {
            return Ok(response);
        }
        if attempt < attempts {
            debug!(
                "Empty response to '{}' (attempt {}/{}), retrying in {:?}",
                command, attempt, attempts, policy.delay
            );
            tokio::time::sleep(policy.delay).await;
        }
    }

    debug!("No output for '{}' after {} attempts", command, attempts);
    Ok(response)
}
