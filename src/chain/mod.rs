/// On-chain pointer slot: the single source of truth for which stored
/// object is a user's current bundle.
///
/// One slot per identity, overwritten on every publish. Removal flips
/// `present` to false; the last address stays in the slot. Writes are
/// asynchronous transactions with a pending/confirmed/failed outcome and a
/// new bundle is durable only once its pointer write is confirmed.
pub mod ethereum;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::storage::ContentAddress;

/// The pointer record for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub content_address: ContentAddress,
    /// Unix seconds of the last write, as recorded on-chain.
    pub last_modified: u64,
    pub present: bool,
}

impl Pointer {
    /// The slot of an identity that has never published.
    pub fn absent() -> Self {
        Self {
            content_address: ContentAddress::new(""),
            last_modified: 0,
            present: false,
        }
    }

    /// Whether the pointer references a bundle.
    pub fn is_live(&self) -> bool {
        self.present && !self.content_address.is_empty()
    }
}

/// Handle to a submitted pointer transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: String,
}

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed(String),
}

/// Observability notifications for pointer changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerEvent {
    Updated {
        identity: String,
        address: ContentAddress,
        tx: TxHandle,
    },
    Retired {
        identity: String,
        tx: TxHandle,
    },
}

/// Trait for pointer ledgers.
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Name of the ledger (e.g., "Ethereum").
    fn chain_name(&self) -> &str;

    /// Read the current slot. Never-written slots come back as [`Pointer::absent`].
    async fn get_pointer(&self, identity: &str) -> Result<Pointer>;

    /// Overwrite the slot with a new address.
    async fn set_pointer(&self, identity: &str, address: &ContentAddress) -> Result<TxHandle>;

    /// Tombstone the slot (`present = false`).
    async fn clear_pointer(&self, identity: &str) -> Result<TxHandle>;

    async fn tx_status(&self, tx: &TxHandle) -> Result<TxStatus>;
}

/// How long to wait for a pointer transaction to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationPolicy {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_polls: 90,
        }
    }
}

/// Poll until the transaction is confirmed. Reverts and exhausted polling
/// both surface as `Transaction`.
pub async fn wait_for_confirmation(
    ledger: &dyn PointerStore,
    tx: &TxHandle,
    policy: &ConfirmationPolicy,
) -> Result<()> {
    for attempt in 0..policy.max_polls.max(1) {
        match ledger.tx_status(tx).await? {
            TxStatus::Confirmed => return Ok(()),
            TxStatus::Failed(reason) => {
                return Err(VaultError::Transaction(format!(
                    "tx {} failed: {reason}",
                    tx.hash
                )))
            }
            TxStatus::Pending => {
                debug!(tx = %tx.hash, attempt, "Pointer transaction pending");
                tokio::time::sleep(Duration::from_millis(policy.poll_interval_ms)).await;
            }
        }
    }

    Err(VaultError::Transaction(format!(
        "tx {} not confirmed after {} polls",
        tx.hash, policy.max_polls
    )))
}
