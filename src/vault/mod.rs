/// Vault orchestrator.
///
/// State machine: `Locked → Unlocking → Unlocked ⇄ Syncing → Locked`.
///
/// - `unlock` asks the signer for the unlock signature, loads the bundle the
///   pointer references and decrypts every entry into memory.
/// - Reads (`entries`, `codes`) work while `Unlocked` or `Syncing` and never
///   wait on a sync.
/// - Mutations run one sync episode at a time (see [`sync`]); a second
///   mutation while one is in flight is rejected.
/// - `lock` drops the signature and every decrypted secret.
///
/// Collaborators are injected at construction; the vault holds no global
/// state.
mod session;
mod sync;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bundle::object::open_object;
use crate::bundle::Bundle;
use crate::chain::{ConfirmationPolicy, PointerEvent, PointerStore};
use crate::config::{RetryConfig, VaultConfig};
use crate::crypto::aead::Cipher;
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};
use crate::signer::UnlockSigner;
use crate::storage::{ContentAddress, ContentStore};
use crate::totp::CodeTicker;

pub use session::{EntryView, OtpCode};
pub use sync::{NewEntry, SyncOutcome};

use session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocking,
    Unlocked,
    Syncing,
}

/// Tunables injected at construction.
#[derive(Debug, Clone, Default)]
pub struct VaultOptions {
    pub cipher: Cipher,
    pub retry: RetryConfig,
    pub confirmation: ConfirmationPolicy,
}

impl VaultOptions {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            cipher: Cipher::new(config.kdf_iterations),
            retry: config.retry,
            confirmation: config.confirmation,
        }
    }
}

/// Run key derivation and AEAD work on the blocking pool. Every PBKDF2 call
/// in the vault goes through here.
pub(crate) async fn off_executor<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| VaultError::KeyDerivation(format!("cipher task failed: {e}")))?
}

pub struct Vault {
    store: Arc<dyn ContentStore>,
    pointers: Arc<dyn PointerStore>,
    signer: Arc<dyn UnlockSigner>,
    options: VaultOptions,
    state: watch::Sender<VaultState>,
    session: RwLock<Option<Session>>,
    unlock_cancel: Mutex<CancellationToken>,
    sync_lock: tokio::sync::Mutex<()>,
    ticker: tokio::sync::Mutex<CodeTicker>,
    events: broadcast::Sender<PointerEvent>,
}

impl Vault {
    pub fn new(
        store: Arc<dyn ContentStore>,
        pointers: Arc<dyn PointerStore>,
        signer: Arc<dyn UnlockSigner>,
        options: VaultOptions,
    ) -> Self {
        let (state, _) = watch::channel(VaultState::Locked);
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            pointers,
            signer,
            options,
            state,
            session: RwLock::new(None),
            unlock_cancel: Mutex::new(CancellationToken::new()),
            sync_lock: tokio::sync::Mutex::new(()),
            ticker: tokio::sync::Mutex::new(CodeTicker::new()),
            events,
        }
    }

    pub fn state(&self) -> VaultState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<VaultState> {
        self.state.subscribe()
    }

    /// Pointer-updated and pointer-retired notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PointerEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> String {
        self.signer.identity()
    }

    fn set_state(&self, next: VaultState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "Vault state changed");
        }
    }

    fn emit(&self, event: PointerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Unlock with a fresh signature. Already unlocked is a no-op; a second
    /// call while a signature request is outstanding is rejected.
    pub async fn unlock(&self) -> Result<()> {
        let token = CancellationToken::new();
        let mut rejected = None;
        self.state.send_if_modified(|state| match *state {
            VaultState::Locked => {
                *state = VaultState::Unlocking;
                *self
                    .unlock_cancel
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = token.clone();
                true
            }
            VaultState::Unlocking => {
                rejected = Some(Err(VaultError::UnlockInProgress));
                false
            }
            VaultState::Unlocked | VaultState::Syncing => {
                rejected = Some(Ok(()));
                false
            }
        });
        if let Some(outcome) = rejected {
            return outcome;
        }

        let identity = self.signer.identity();
        info!(identity = %identity, "Unlock requested");

        let opened = tokio::select! {
            _ = token.cancelled() => Err(VaultError::Cancelled),
            opened = self.open_session(identity.clone()) => opened,
        };

        match opened {
            Ok(session) => {
                let entries = session.bundle().len();
                self.ticker.lock().await.reset();
                // A `lock` that raced the install must win: re-check under the
                // write guard and hold it until the state is set.
                let mut slot = self.session.write().await;
                if token.is_cancelled() {
                    self.set_state(VaultState::Locked);
                    info!(identity = %identity, "Unlock cancelled");
                    return Err(VaultError::Cancelled);
                }
                *slot = Some(session);
                self.set_state(VaultState::Unlocked);
                drop(slot);
                info!(identity = %identity, entries, "Vault unlocked");
                Ok(())
            }
            Err(e) => {
                self.set_state(VaultState::Locked);
                if e.is_cancellation() {
                    info!(identity = %identity, "Unlock cancelled");
                } else {
                    warn!(identity = %identity, error = %e, "Unlock failed");
                }
                Err(e)
            }
        }
    }

    /// Abort an outstanding signature request. The pending `unlock` returns
    /// `Cancelled` and the vault stays locked.
    pub fn cancel_unlock(&self) {
        self.unlock_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    async fn open_session(&self, identity: String) -> Result<Session> {
        let signature = self.signer.sign_unlock_message().await?;
        let bundle = match self.load_current(&identity, &signature).await? {
            Some((bundle, _)) => bundle,
            None => Bundle::new(identity.clone()),
        };
        let cipher = self.options.cipher;
        off_executor(move || Session::open(identity, signature, bundle, &cipher)).await
    }

    /// Drop the signature and every decrypted secret. Does not touch the
    /// store or the chain.
    pub async fn lock(&self) {
        self.cancel_unlock();
        self.session.write().await.take();
        self.ticker.lock().await.reset();
        self.set_state(VaultState::Locked);
    }

    /// Fetch and open the bundle the pointer currently references, or `None`
    /// when the identity has never published (or deleted its vault).
    async fn load_current(
        &self,
        identity: &str,
        signature: &UnlockSignature,
    ) -> Result<Option<(Bundle, ContentAddress)>> {
        let pointer = self.pointers.get_pointer(identity).await?;
        if !pointer.is_live() {
            info!(identity, "No bundle published yet");
            return Ok(None);
        }

        let address = pointer.content_address;
        let bytes = self.fetch_with_retry(&address).await.map_err(|e| match e {
            VaultError::NotFound { address, .. } => VaultError::NotFound {
                address,
                referenced: true,
            },
            other => other,
        })?;

        let cipher = self.options.cipher;
        let key_signature = signature.clone();
        let mut bundle =
            off_executor(move || open_object(&bytes, &key_signature, &cipher)).await?;
        if bundle.owner_identity.is_empty() {
            bundle.owner_identity = identity.to_string();
        } else if !bundle.owner_identity.eq_ignore_ascii_case(identity) {
            return Err(VaultError::OwnerMismatch {
                expected: identity.to_string(),
                found: bundle.owner_identity,
            });
        }

        info!(identity, address = %address, entries = bundle.len(), "Loaded bundle");
        Ok(Some((bundle, address)))
    }

    async fn fetch_with_retry(&self, address: &ContentAddress) -> Result<Vec<u8>> {
        let attempts = self.options.retry.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match self.store.fetch(address).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && retry + 1 < attempts => {
                    retry += 1;
                    let delay = self.options.retry.delay_for(retry);
                    warn!(
                        address = %address,
                        error = %e,
                        retry,
                        delay = ?delay,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        match self.state() {
            VaultState::Unlocked | VaultState::Syncing => Ok(()),
            VaultState::Locked | VaultState::Unlocking => Err(VaultError::Locked),
        }
    }

    /// Entries of the current session, without secrets.
    pub async fn entries(&self) -> Result<Vec<EntryView>> {
        self.ensure_readable()?;
        self.session
            .read()
            .await
            .as_ref()
            .map(Session::views)
            .ok_or(VaultError::Locked)
    }

    /// Codes for every entry at `at_unix`.
    pub async fn codes(&self, at_unix: u64) -> Result<Vec<OtpCode>> {
        self.ensure_readable()?;
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.codes(at_unix))
            .ok_or(VaultError::Locked)
    }

    /// Codes only when some entry has entered a new time step since the last
    /// call; `None` means the previously rendered codes are still current.
    pub async fn refresh_codes(&self, at_unix: u64) -> Result<Option<Vec<OtpCode>>> {
        self.ensure_readable()?;
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(VaultError::Locked)?;

        let due = self.ticker.lock().await.due(session.periods(), at_unix);
        Ok(due.then(|| session.codes(at_unix)))
    }
}
