/// Content-addressed storage for encrypted bundle objects.
///
/// The orchestrator only sees this narrow trait: publish bytes, fetch by
/// address, retire an address. Everything passed in is already encrypted
/// (or a legacy object being read back); backends never see plaintext.
///
/// The store holds no authority. An object not referenced by the current
/// on-chain pointer is inert.
pub mod ipfs;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::error::Result;

/// Hash-derived address of an immutable blob (a CID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The CIDv1 a conforming store assigns to `data`.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(hash::cid_v1_raw(data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Trait for content-addressed backends.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable name of this backend (e.g., "IPFS").
    fn name(&self) -> &str;

    /// Upload an opaque blob. Publishing identical bytes twice is allowed.
    async fn publish(&self, data: &[u8]) -> Result<ContentAddress>;

    /// Download a blob. `NotFound` when missing or unpinned, `Timeout` when
    /// the gateway does not answer in time.
    async fn fetch(&self, address: &ContentAddress) -> Result<Vec<u8>>;

    /// Unpin a blob. Best-effort: callers log and ignore failures.
    async fn retire(&self, address: &ContentAddress) -> Result<()>;
}
