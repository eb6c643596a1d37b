//! Configuration management for addrsync.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::device::is_safe_routeros_value;

/// Default environment variable for the REST API password
const API_PASSWORD_ENV: &str = "ADDRSYNC_API_PASSWORD";

/// Upper bound on feed download attempts
pub const MAX_FETCH_RETRIES: u32 = 10;

/// Secure string type that zeroizes memory on drop
/// Used for sensitive data like tokens and passwords
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Resolve a secret: custom env var, then default env var, then config value.
fn resolve_secret(custom_env: Option<&str>, default_env: &str, fallback: &SecureString) -> SecureString {
    if let Some(env_name) = custom_env {
        if let Ok(val) = env::var(env_name) {
            return SecureString::new(val);
        }
    }
    if let Ok(val) = env::var(default_env) {
        return SecureString::new(val);
    }
    fallback.clone()
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device targets
    pub devices: Vec<DeviceConfig>,

    /// Synchronization jobs run by `addrsync sync` without `--feeds`
    pub jobs: Vec<JobConfig>,

    /// Retry policy for CLI command output
    pub retry: RetryConfig,

    /// Routing registry used for ASN lookups
    pub registry: RegistryConfig,

    /// Feed download settings
    pub fetch: FetchConfig,

    /// Notification destinations
    pub alerts: AlertsConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    ///
    /// Commands that never touch a device (preview, asn) work without one.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            info!("No config at {:?}, using defaults", path.as_ref());
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                anyhow::bail!("Device name cannot be empty (host: {})", device.host);
            }
            if device.host.trim().is_empty() {
                anyhow::bail!("Device '{}' has no host", device.name);
            }
            if !names.insert(device.name.as_str()) {
                anyhow::bail!("Duplicate device name '{}'", device.name);
            }
            if device.backend == Backend::Api {
                if let Some(url) = &device.api.url {
                    if !url.starts_with("https://") && !url.starts_with("http://") {
                        anyhow::bail!("Device '{}' API URL must be http(s): {}", device.name, url);
                    }
                }
            }
        }

        for job in &self.jobs {
            job.validate()?;
            for name in &job.devices {
                if !names.contains(name.as_str()) {
                    anyhow::bail!("Job for list '{}' names unknown device '{}'", job.list, name);
                }
            }
        }

        if self.retry.attempts == 0 {
            anyhow::bail!("retry.attempts must be at least 1");
        }

        if !(1..=MAX_FETCH_RETRIES).contains(&self.fetch.max_retries) {
            anyhow::bail!(
                "fetch.max_retries must be between 1 and {} (got {})",
                MAX_FETCH_RETRIES,
                self.fetch.max_retries
            );
        }

        // Validate alert URLs use HTTPS if enabled
        if self.alerts.webhook.enabled
            && !self.alerts.webhook.url.is_empty()
            && !self.alerts.webhook.url.starts_with("https://")
        {
            anyhow::bail!("Webhook URL must use HTTPS: {}", self.alerts.webhook.url);
        }

        if self.alerts.gotify.enabled
            && !self.alerts.gotify.url.is_empty()
            && !self.alerts.gotify.url.starts_with("https://")
        {
            anyhow::bail!("Gotify URL must use HTTPS: {}", self.alerts.gotify.url);
        }

        Ok(())
    }

    /// Find a device by name
    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Resolve device names to configs; an empty selection means all devices.
    pub fn select_devices(&self, names: &[String]) -> Result<Vec<DeviceConfig>> {
        if names.is_empty() {
            return Ok(self.devices.clone());
        }
        names
            .iter()
            .map(|name| {
                self.device(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Unknown device '{}'", name))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// RouterOS CLI over SSH
    #[default]
    Cli,
    /// RouterOS REST API over HTTPS
    Api,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Login user; the ssh client config decides when unset
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub ssh_binary: String,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            identity_file: None,
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Verify against the system trust store
    #[default]
    System,
    /// Accept self-signed device certificates
    Insecure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; defaults to `https://<host>`
    pub url: Option<String>,
    pub username: String,
    /// Password can be set directly or via ADDRSYNC_API_PASSWORD env var
    pub password: SecureString,
    /// Environment variable name to read password from (optional)
    pub password_env: Option<String>,
    pub tls: TlsMode,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: "admin".to_string(),
            password: SecureString::default(),
            password_env: None,
            tls: TlsMode::System,
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Get the effective password, checking env vars first
    pub fn get_password(&self) -> SecureString {
        resolve_secret(self.password_env.as_deref(), API_PASSWORD_ENV, &self.password)
    }

    /// Base URL of the device REST root (without `/rest`)
    pub fn base_url(&self, host: &str) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", host),
        }
    }
}

/// One list synchronization job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    /// Address-list name on the device
    pub list: String,
    /// Comment tag scoping the entries this job manages
    pub label: String,
    /// Comma-separated feed specification (URLs and ASNs)
    pub feeds: String,
    /// Target device names; empty means all devices
    #[serde(default)]
    pub devices: Vec<String>,
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_safe_routeros_value(&self.list) {
            anyhow::bail!(
                "Invalid list name '{}': must be non-empty without quotes, brackets, '$', ';' or backslashes",
                self.list
            );
        }
        if !is_safe_routeros_value(&self.label) {
            anyhow::bail!(
                "Invalid label '{}': must be non-empty without quotes, brackets, '$', ';' or backslashes",
                self.label
            );
        }
        if self.feeds.trim().is_empty() {
            anyhow::bail!("Job for list '{}' has no feeds", self.list);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before an empty response is accepted as "no data"
    pub attempts: u32,
    /// Delay between attempts
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub server: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server: "whois.radb.net".to_string(),
            port: 43,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Maximum size per feed body
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlertsConfig {
    pub gotify: GotifyConfig,
    pub webhook: WebhookConfig,
    pub telegram: TelegramConfig,
}

impl AlertsConfig {
    pub fn any_enabled(&self) -> bool {
        self.gotify.enabled || self.webhook.enabled || self.telegram.enabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GotifyConfig {
    pub enabled: bool,
    pub url: String,
    /// Token can be set directly or via ADDRSYNC_GOTIFY_TOKEN env var
    pub token: SecureString,
    pub token_env: Option<String>,
}

impl GotifyConfig {
    pub fn get_token(&self) -> SecureString {
        resolve_secret(self.token_env.as_deref(), "ADDRSYNC_GOTIFY_TOKEN", &self.token)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    /// Bot token can be set directly or via ADDRSYNC_TELEGRAM_TOKEN env var
    pub bot_token: SecureString,
    pub bot_token_env: Option<String>,
    pub chat_id: String,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: SecureString::default(),
            bot_token_env: None,
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    pub fn get_token(&self) -> SecureString {
        resolve_secret(
            self.bot_token_env.as_deref(),
            "ADDRSYNC_TELEGRAM_TOKEN",
            &self.bot_token,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(deserialize_with = "deserialize_headers")]
    pub headers: HashMap<String, String>,
}

/// Deserialize and validate HTTP headers (reject injection attempts)
fn deserialize_headers<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let headers: HashMap<String, String> = HashMap::deserialize(deserializer)?;

    for (key, value) in &headers {
        if key.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(serde::de::Error::custom(format!(
                "Invalid header '{}': contains newline characters",
                key
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c))
        {
            return Err(serde::de::Error::custom(format!(
                "Invalid header name '{}': contains invalid characters",
                key
            )));
        }
    }

    Ok(headers)
}
