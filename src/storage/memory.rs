/// In-process content store.
///
/// Addresses are real CIDv1 values computed from the bytes, so the
/// "same content, same address" property holds exactly as on IPFS.
/// Retiring an address unpins it and later fetches return `NotFound`.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ContentAddress, ContentStore};
use crate::error::{Result, VaultError};

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ContentAddress, Vec<u8>>>,
    retired: RwLock<Vec<ContentAddress>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, address: &ContentAddress) -> bool {
        self.objects.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Addresses retired so far, in order.
    pub async fn retired(&self) -> Vec<ContentAddress> {
        self.retired.read().await.clone()
    }

    /// Store bytes under an explicit address, bypassing content hashing.
    /// Used to seed legacy or corrupted objects.
    pub async fn insert_raw(&self, address: ContentAddress, data: Vec<u8>) {
        self.objects.write().await.insert(address, data);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, data: &[u8]) -> Result<ContentAddress> {
        let address = ContentAddress::for_bytes(data);
        self.objects
            .write()
            .await
            .insert(address.clone(), data.to_vec());
        Ok(address)
    }

    async fn fetch(&self, address: &ContentAddress) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| VaultError::NotFound {
                address: address.to_string(),
                referenced: false,
            })
    }

    async fn retire(&self, address: &ContentAddress) -> Result<()> {
        self.objects.write().await.remove(address);
        self.retired.write().await.push(address.clone());
        Ok(())
    }
}
