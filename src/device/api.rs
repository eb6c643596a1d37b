//! RouterOS v7 REST API backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use super::AddressListDevice;
use crate::address::AddressEntry;
use crate::config::{ApiConfig, SecureString, TlsMode};
use crate::error::SyncError;

const ADDRESS_LIST_RESOURCE: &str = "ip/firewall/address-list";

/// One row of `/ip/firewall/address-list`
#[derive(Debug, Deserialize)]
struct AddressListRecord {
    #[serde(rename = ".id")]
    id: String,
    address: String,
    #[serde(default)]
    list: String,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewAddressListRecord<'a> {
    list: &'a str,
    address: String,
    comment: &'a str,
}

#[derive(Debug, Deserialize)]
struct Identity {
    name: String,
}

/// Error body returned by the REST API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: Option<String>,
}

/// Address-list access through structured REST calls.
pub struct ApiDevice {
    client: Client,
    base: String,
    username: String,
    password: SecureString,
}

impl ApiDevice {
    /// Build a client and check credentials against `/rest/system/identity`.
    pub async fn connect(host: &str, config: &ApiConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.tls == TlsMode::Insecure)
            .user_agent(format!("addrsync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Connectivity(format!("HTTP client: {}", e)))?;

        let device = Self {
            client,
            base: format!("{}/rest", config.base_url(host)),
            username: config.username.clone(),
            password: config.get_password(),
        };

        let response = device
            .request(device.client.get(device.url("system/identity")))
            .send()
            .await
            .map_err(|e| SyncError::Connectivity(format!("{}: {}", device.base, e)))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SyncError::Connectivity(format!(
                    "{}: authentication rejected for user '{}'",
                    device.base, device.username
                )))
            }
            status => {
                return Err(SyncError::Connectivity(format!(
                    "{}: identity probe returned {}",
                    device.base, status
                )))
            }
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| SyncError::Connectivity(format!("{}: bad identity reply: {}", device.base, e)))?;
        info!("Connected to {} (identity: {})", device.base, identity.name);

        Ok(device)
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base, resource)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(self.password.as_str()))
    }

    /// Filtered listing of address-list rows
    async fn find(&self, filters: &[(&str, &str)]) -> Result<Vec<AddressListRecord>> {
        let response = self
            .request(self.client.get(self.url(ADDRESS_LIST_RESOURCE)).query(filters))
            .send()
            .await
            .context("Address-list query failed")?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .context("Malformed address-list response")
    }
}

/// Turn a non-success response into an error carrying the API's detail.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.detail.unwrap_or(body.message),
        Err(_) => String::new(),
    };
    anyhow::bail!("HTTP {}: {}", status, detail)
}

#[async_trait]
impl AddressListDevice for ApiDevice {
    async fn read_current(&self, list: &str, label: &str) -> Result<BTreeSet<AddressEntry>> {
        let records = self.find(&[("list", list), ("comment", label)]).await?;
        let total = records.len();

        let current: BTreeSet<AddressEntry> = records
            .into_iter()
            .filter(|r| r.list == list && r.comment.as_deref() == Some(label))
            .filter_map(|r| match r.address.parse::<AddressEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Ignoring device entry {}: {}", r.id, e);
                    None
                }
            })
            .collect();

        debug!("{} rows returned, {} entries kept", total, current.len());
        Ok(current)
    }

    async fn add_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()> {
        let record = NewAddressListRecord {
            list,
            address: entry.to_string(),
            comment: label,
        };
        let response = self
            .request(self.client.put(self.url(ADDRESS_LIST_RESOURCE)).json(&record))
            .send()
            .await
            .with_context(|| format!("Failed to add {}", entry))?;
        check_status(response).await?;
        Ok(())
    }

    async fn remove_entry(&self, list: &str, label: &str, entry: &AddressEntry) -> Result<()> {
        let address = entry.to_string();
        let records = self
            .find(&[("list", list), ("comment", label), ("address", address.as_str())])
            .await?;
        if records.is_empty() {
            anyhow::bail!("no entry {} in {} tagged '{}'", entry, list, label);
        }

        for record in records {
            let url = format!("{}/{}", self.url(ADDRESS_LIST_RESOURCE), record.id);
            let response = self
                .request(self.client.delete(&url))
                .send()
                .await
                .with_context(|| format!("Failed to remove {}", entry))?;
            check_status(response).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Stateless HTTP: nothing to release
        Ok(())
    }
}
