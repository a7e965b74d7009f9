/// Fault-injecting collaborators and a harness for orchestrator tests.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Vault, VaultOptions};
use crate::bundle::object::seal_bundle;
use crate::bundle::{Bundle, OtpEntry};
use crate::chain::memory::MemoryPointerStore;
use crate::chain::{ConfirmationPolicy, Pointer, PointerStore, TxHandle, TxStatus};
use crate::config::RetryConfig;
use crate::crypto::aead::Cipher;
use crate::crypto::hash::sha256;
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};
use crate::signer::UnlockSigner;
use crate::storage::memory::MemoryStore;
use crate::storage::{ContentAddress, ContentStore};

pub const IDENTITY: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
pub const TEST_ITERATIONS: u32 = 10;

#[derive(Clone, Copy)]
enum SignerMode {
    Approve,
    Decline,
    Hang,
}

/// Signer whose signature is a pure function of the identity.
pub struct TestSigner {
    identity: String,
    mode: SignerMode,
}

impl TestSigner {
    pub fn approving(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            mode: SignerMode::Approve,
        }
    }

    pub fn declining(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            mode: SignerMode::Decline,
        }
    }

    /// Never answers, like a wallet prompt left open.
    pub fn hanging(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            mode: SignerMode::Hang,
        }
    }

    pub fn signature(&self) -> UnlockSignature {
        let mut bytes = sha256(self.identity.as_bytes()).to_vec();
        bytes.extend_from_slice(&sha256(&bytes));
        bytes.push(0x1b);
        UnlockSignature::from_bytes(bytes).unwrap()
    }
}

#[async_trait]
impl UnlockSigner for TestSigner {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    async fn sign_unlock_message(&self) -> Result<UnlockSignature> {
        match self.mode {
            SignerMode::Approve => Ok(self.signature()),
            SignerMode::Decline => Err(VaultError::Cancelled),
            SignerMode::Hang => std::future::pending().await,
        }
    }
}

/// Memory store with switchable failures.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    fetch_failures: AtomicU32,
    fetch_calls: AtomicU32,
    fail_publish: AtomicBool,
    fail_retire: AtomicBool,
}

impl FaultyStore {
    /// The next `n` fetches time out.
    pub fn fail_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fail_publish(&self, on: bool) {
        self.fail_publish.store(on, Ordering::SeqCst);
    }

    pub fn fail_retire(&self, on: bool) {
        self.fail_retire.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn publish(&self, data: &[u8]) -> Result<ContentAddress> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(VaultError::Store("publish refused".into()));
        }
        self.inner.publish(data).await
    }

    async fn fetch(&self, address: &ContentAddress) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(VaultError::Timeout("gateway".into()));
        }
        self.inner.fetch(address).await
    }

    async fn retire(&self, address: &ContentAddress) -> Result<()> {
        if self.fail_retire.load(Ordering::SeqCst) {
            return Err(VaultError::Store("unpin refused".into()));
        }
        self.inner.retire(address).await
    }
}

/// Memory pointer ledger with switchable failures and a write gate.
#[derive(Default)]
pub struct FaultyPointers {
    pub inner: MemoryPointerStore,
    fail_set: AtomicBool,
    reject_set: AtomicBool,
    hold_writes: AtomicBool,
    write_entered: Notify,
    write_released: Notify,
}

impl FaultyPointers {
    pub fn fail_set(&self, on: bool) {
        self.fail_set.store(on, Ordering::SeqCst);
    }

    pub fn reject_set(&self, on: bool) {
        self.reject_set.store(on, Ordering::SeqCst);
    }

    /// Park `set_pointer` until [`release_write`](Self::release_write).
    pub fn hold_writes(&self, on: bool) {
        self.hold_writes.store(on, Ordering::SeqCst);
    }

    pub async fn wait_for_write(&self) {
        self.write_entered.notified().await;
    }

    pub fn release_write(&self) {
        self.write_released.notify_one();
    }
}

#[async_trait]
impl PointerStore for FaultyPointers {
    fn chain_name(&self) -> &str {
        "faulty"
    }

    async fn get_pointer(&self, identity: &str) -> Result<Pointer> {
        self.inner.get_pointer(identity).await
    }

    async fn set_pointer(&self, identity: &str, address: &ContentAddress) -> Result<TxHandle> {
        if self.hold_writes.load(Ordering::SeqCst) {
            self.write_entered.notify_one();
            self.write_released.notified().await;
        }
        if self.reject_set.load(Ordering::SeqCst) {
            return Err(VaultError::Cancelled);
        }
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(VaultError::Transaction("replacement transaction underpriced".into()));
        }
        self.inner.set_pointer(identity, address).await
    }

    async fn clear_pointer(&self, identity: &str) -> Result<TxHandle> {
        self.inner.clear_pointer(identity).await
    }

    async fn tx_status(&self, tx: &TxHandle) -> Result<TxStatus> {
        self.inner.tx_status(tx).await
    }
}

pub struct Harness {
    pub vault: Arc<Vault>,
    pub store: Arc<FaultyStore>,
    pub pointers: Arc<FaultyPointers>,
    pub signer: Arc<TestSigner>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_signer(TestSigner::approving(IDENTITY))
    }

    pub async fn unlocked() -> Self {
        let harness = Self::new();
        harness.vault.unlock().await.unwrap();
        harness
    }

    pub fn with_signer(signer: TestSigner) -> Self {
        let store = Arc::new(FaultyStore::default());
        let pointers = Arc::new(FaultyPointers::default());
        let signer = Arc::new(signer);
        let options = VaultOptions {
            cipher: Cipher::new(TEST_ITERATIONS),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
            },
            confirmation: ConfirmationPolicy {
                poll_interval_ms: 1,
                max_polls: 5,
            },
        };
        let vault = Arc::new(Vault::new(
            store.clone(),
            pointers.clone(),
            signer.clone(),
            options,
        ));
        Self {
            vault,
            store,
            pointers,
            signer,
        }
    }

    pub fn cipher(&self) -> Cipher {
        Cipher::new(TEST_ITERATIONS)
    }

    pub async fn signature(&self) -> UnlockSignature {
        self.signer.signature()
    }

    /// Publish a sealed bundle with the given `(id, secret)` entries directly
    /// to the backing stores and point the slot at it.
    pub async fn seed_sealed(&self, entries: &[(&str, &str)]) -> ContentAddress {
        let sig = self.signer.signature();
        let mut bundle = Bundle::new(IDENTITY);
        for (id, secret) in entries {
            let mut entry = OtpEntry {
                id: id.to_string(),
                label: format!("Seed:{id}"),
                ..OtpEntry::default()
            };
            entry.set_secret_envelope(self.cipher().encrypt_secret(secret, &sig).unwrap());
            bundle.push(entry).unwrap();
        }

        let sealed = seal_bundle(&bundle, &sig, &self.cipher()).unwrap();
        let address = self.store.inner.publish(&sealed).await.unwrap();
        self.pointers.inner.set_pointer(IDENTITY, &address).await.unwrap();
        address
    }
}
