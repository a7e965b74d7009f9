/// In-process pointer ledger with instant confirmation.
///
/// Slots are keyed by identity (case-insensitive, as wallet addresses are).
/// Every write is recorded as a confirmed transaction.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Pointer, PointerStore, TxHandle, TxStatus};
use crate::error::Result;
use crate::storage::ContentAddress;

#[derive(Default)]
pub struct MemoryPointerStore {
    slots: RwLock<HashMap<String, Pointer>>,
    txs: RwLock<HashMap<TxHandle, TxStatus>>,
    next_tx: AtomicU64,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(identity: &str) -> String {
        identity.to_ascii_lowercase()
    }

    async fn record_tx(&self) -> TxHandle {
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = TxHandle {
            hash: format!("0x{n:064x}"),
        };
        self.txs.write().await.insert(tx.clone(), TxStatus::Confirmed);
        tx
    }

    /// Number of pointer transactions submitted so far.
    pub fn tx_count(&self) -> u64 {
        self.next_tx.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    fn chain_name(&self) -> &str {
        "memory"
    }

    async fn get_pointer(&self, identity: &str) -> Result<Pointer> {
        Ok(self
            .slots
            .read()
            .await
            .get(&Self::key(identity))
            .cloned()
            .unwrap_or_else(Pointer::absent))
    }

    async fn set_pointer(&self, identity: &str, address: &ContentAddress) -> Result<TxHandle> {
        let pointer = Pointer {
            content_address: address.clone(),
            last_modified: crate::totp::now_unix(),
            present: true,
        };
        self.slots.write().await.insert(Self::key(identity), pointer);
        Ok(self.record_tx().await)
    }

    async fn clear_pointer(&self, identity: &str) -> Result<TxHandle> {
        {
            let mut slots = self.slots.write().await;
            let slot = slots
                .entry(Self::key(identity))
                .or_insert_with(Pointer::absent);
            slot.present = false;
            slot.last_modified = crate::totp::now_unix();
        }
        Ok(self.record_tx().await)
    }

    async fn tx_status(&self, tx: &TxHandle) -> Result<TxStatus> {
        Ok(self
            .txs
            .read()
            .await
            .get(tx)
            .cloned()
            .unwrap_or_else(|| TxStatus::Failed("unknown transaction".to_string())))
    }
}
