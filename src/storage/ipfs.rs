/// IPFS backend through an HTTPS pinning service.
///
/// Objects are pinned with `POST {api}/pinning/pinFileToIPFS` (CIDv1),
/// read back through `GET {gateway}/ipfs/{cid}`, and unpinned with
/// `DELETE {api}/pinning/unpin/{cid}`. Every request carries the bearer
/// token and is bounded by the configured timeout.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ContentAddress, ContentStore};
use crate::error::{Result, VaultError};

/// Configuration for the pinning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    /// Pinning API base URL (e.g., "https://api.pinata.cloud").
    pub api_url: String,
    /// Gateway base URL for downloads (e.g., "https://gateway.pinata.cloud").
    pub gateway_url: String,
    /// Bearer token (JWT) for the pinning API.
    pub bearer_token: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.pinata.cloud".to_string(),
            gateway_url: "https://gateway.pinata.cloud".to_string(),
            bearer_token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// IPFS storage backend.
pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
    #[allow(dead_code)]
    pin_size: Option<u64>,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VaultError::Config(format!("IPFS client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn gateway(&self, address: &ContentAddress) -> String {
        format!(
            "{}/ipfs/{}",
            self.config.gateway_url.trim_end_matches('/'),
            address
        )
    }
}

fn transport_error(e: reqwest::Error) -> VaultError {
    if e.is_timeout() {
        VaultError::Timeout(e.to_string())
    } else {
        VaultError::Store(e.to_string())
    }
}

/// Map a non-success HTTP status to the storage error taxonomy.
fn status_error(status: StatusCode, address: Option<&ContentAddress>, body: String) -> VaultError {
    match status {
        StatusCode::NOT_FOUND => VaultError::NotFound {
            address: address.map(|a| a.to_string()).unwrap_or_default(),
            referenced: false,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            VaultError::Timeout(format!("HTTP {status}"))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            VaultError::Store(format!("HTTP {status}: {body}"))
        }
        _ => VaultError::StoreRejected(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn name(&self) -> &str {
        "IPFS"
    }

    async fn publish(&self, data: &[u8]) -> Result<ContentAddress> {
        let part = multipart::Part::bytes(data.to_vec()).file_name("bundle.json");
        let form = multipart::Form::new()
            .part("file", part)
            .text("pinataOptions", r#"{"cidVersion":1}"#);

        let resp = self
            .client
            .post(self.api("/pinning/pinFileToIPFS"))
            .bearer_auth(&self.config.bearer_token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, None, body));
        }

        let pinned: PinResponse = resp
            .json()
            .await
            .map_err(|e| VaultError::Serialization(format!("IPFS pin response parse error: {e}")))?;

        debug!(cid = %pinned.ipfs_hash, size = data.len(), "Pinned object");
        Ok(ContentAddress::new(pinned.ipfs_hash))
    }

    async fn fetch(&self, address: &ContentAddress) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.gateway(address))
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, Some(address), body));
        }

        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn retire(&self, address: &ContentAddress) -> Result<()> {
        let resp = self
            .client
            .delete(self.api(&format!("/pinning/unpin/{address}")))
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(cid = %address, status = %status, "Unpin rejected");
            return Err(status_error(status, Some(address), body));
        }

        Ok(())
    }
}
