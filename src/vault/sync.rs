/// Sync episodes: every mutation is one read-modify-publish cycle.
///
/// 1. Fresh pointer read and bundle fetch (never the session copy).
/// 2. Apply the mutation and decrypt anything new from other devices.
/// 3. Seal as version 2 and publish.
/// 4. Point the slot at the new address and wait for confirmation.
/// 5. Retire the previous address, best-effort.
///
/// A failure in 1-3 has no external effect. A failure in 4 leaves the new
/// object unreferenced and the old pointer in charge. Either way the session
/// keeps its previous contents. Only one episode runs at a time; overlapping
/// calls get `SyncInProgress` instead of queueing.
use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::MutexGuard;
use tracing::{info, warn};
use uuid::Uuid;

use super::session::SecretTable;
use super::{off_executor, Vault, VaultState};
use crate::bundle::object::seal_bundle;
use crate::bundle::{Bundle, OtpEntry};
use crate::chain::{wait_for_confirmation, PointerEvent, TxHandle};
use crate::crypto::aead::Cipher;
use crate::crypto::sensitive::SensitiveVec;
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};
use crate::migration::{decode_migration_uri, EntryCandidate};
use crate::storage::ContentAddress;
use crate::totp::{self, Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD};

/// A plaintext entry to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub label: String,
    /// Base32 secret; whitespace and case are normalized.
    pub secret: String,
    pub issuer: Option<String>,
    pub account_name: Option<String>,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
    pub logo_reference: Option<String>,
}

impl NewEntry {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
            issuer: None,
            account_name: None,
            algorithm: Algorithm::Sha1,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            logo_reference: None,
        }
    }

    fn display_label(&self) -> String {
        let label = self.label.trim();
        if !label.is_empty() {
            return label.to_string();
        }
        match (self.issuer.as_deref(), self.account_name.as_deref()) {
            (Some(issuer), Some(account)) => format!("{issuer}:{account}"),
            (Some(only), None) | (None, Some(only)) => only.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Local checks only; runs before any crypto or I/O.
    pub fn validate(&self) -> Result<()> {
        if !totp::is_valid_secret(&self.secret) {
            return Err(VaultError::InvalidSecretFormat);
        }
        if !self.algorithm.is_supported() {
            return Err(VaultError::InvalidEntry(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }
        if !totp::is_supported_digits(self.digits) {
            return Err(VaultError::InvalidEntry(format!(
                "unsupported digit count {}",
                self.digits
            )));
        }
        if self.period == 0 {
            return Err(VaultError::InvalidEntry("period must be positive".to_string()));
        }
        if self.display_label().trim().is_empty() {
            return Err(VaultError::InvalidEntry("label is empty".to_string()));
        }
        Ok(())
    }

    /// Encrypt into a stored entry with a fresh id.
    fn seal(self, signature: &UnlockSignature, cipher: &Cipher) -> Result<(OtpEntry, SensitiveVec)> {
        let secret = totp::normalize_secret(&self.secret);
        let envelope = cipher.encrypt_secret(&secret, signature)?;

        let mut entry = OtpEntry {
            id: Uuid::new_v4().to_string(),
            label: self.display_label(),
            issuer: self.issuer,
            account_name: self.account_name,
            algorithm: self.algorithm,
            digits: self.digits,
            period: self.period,
            created_at: Utc::now(),
            logo_reference: self.logo_reference,
            ..OtpEntry::default()
        };
        entry.set_secret_envelope(envelope);
        Ok((entry, SensitiveVec::new(secret.into_bytes())))
    }
}

impl From<EntryCandidate> for NewEntry {
    fn from(candidate: EntryCandidate) -> Self {
        let label = candidate.label();
        let account_name = (!candidate.account_name.is_empty()).then_some(candidate.account_name);
        Self {
            label,
            secret: candidate.secret,
            issuer: candidate.issuer,
            account_name,
            algorithm: candidate.algorithm,
            digits: candidate.digits,
            period: candidate.period,
            logo_reference: None,
        }
    }
}

/// Result of a confirmed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Address of the new bundle, now referenced by the pointer.
    pub address: ContentAddress,
    pub tx: TxHandle,
    /// Whether the previous object was retired. Failures are logged, not raised.
    pub retired_previous: bool,
    /// Ids of the entries the mutation touched.
    pub affected: Vec<String>,
}

/// Holds the single-writer lock for one episode and restores `Unlocked`
/// when dropped, including when the caller abandons the future.
struct Episode<'a> {
    vault: &'a Vault,
    _guard: MutexGuard<'a, ()>,
    identity: String,
    signature: UnlockSignature,
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        self.vault.state.send_if_modified(|state| {
            if *state == VaultState::Syncing {
                *state = VaultState::Unlocked;
                true
            } else {
                false
            }
        });
    }
}

impl Vault {
    async fn begin_sync(&self) -> Result<Episode<'_>> {
        let guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| VaultError::SyncInProgress)?;

        let (identity, signature) = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(VaultError::Locked)?;
            (session.identity.clone(), session.signature.clone())
        };

        let mut entered = false;
        self.state.send_if_modified(|state| {
            if *state == VaultState::Unlocked {
                *state = VaultState::Syncing;
                entered = true;
            }
            entered
        });
        if !entered {
            return Err(VaultError::Locked);
        }

        info!(identity = %identity, "Sync started");
        Ok(Episode {
            vault: self,
            _guard: guard,
            identity,
            signature,
        })
    }

    async fn prepare_secrets(
        &self,
        bundle: &Bundle,
        fresh: HashMap<String, SensitiveVec>,
        signature: &UnlockSignature,
    ) -> Result<SecretTable> {
        let cache = self
            .session
            .read()
            .await
            .as_ref()
            .ok_or(VaultError::Locked)?
            .secret_cache();
        let bundle = bundle.clone();
        let signature = signature.clone();
        let cipher = self.options.cipher;
        off_executor(move || cache.prepare(&bundle, fresh, &signature, &cipher)).await
    }

    /// Encrypt new entries for this episode's signature.
    async fn seal_entries(
        &self,
        episode: &Episode<'_>,
        entries: Vec<NewEntry>,
    ) -> Result<Vec<(OtpEntry, SensitiveVec)>> {
        let signature = episode.signature.clone();
        let cipher = self.options.cipher;
        off_executor(move || {
            entries
                .into_iter()
                .map(|entry| entry.seal(&signature, &cipher))
                .collect()
        })
        .await
    }

    async fn install(&self, identity: &str, bundle: Bundle, table: SecretTable) {
        if let Some(session) = self.session.write().await.as_mut() {
            if session.identity == identity {
                session.install(bundle, table);
            }
        }
        self.ticker.lock().await.reset();
    }

    async fn retire_best_effort(&self, address: &ContentAddress) -> bool {
        match self.store.retire(address).await {
            Ok(()) => {
                info!(address = %address, "Retired previous bundle");
                true
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to retire previous bundle");
                false
            }
        }
    }

    async fn publish<F>(
        &self,
        episode: Episode<'_>,
        fresh: HashMap<String, SensitiveVec>,
        mutate: F,
    ) -> Result<SyncOutcome>
    where
        F: FnOnce(&mut Bundle) -> Result<Vec<String>>,
    {
        let identity = episode.identity.as_str();

        let (mut bundle, previous) = match self.load_current(identity, &episode.signature).await? {
            Some((bundle, address)) => (bundle, Some(address)),
            None => (Bundle::new(identity), None),
        };

        let affected = mutate(&mut bundle)?;
        bundle.touch(Utc::now());
        let table = self
            .prepare_secrets(&bundle, fresh, &episode.signature)
            .await?;

        let sealed = {
            let bundle = bundle.clone();
            let signature = episode.signature.clone();
            let cipher = self.options.cipher;
            off_executor(move || seal_bundle(&bundle, &signature, &cipher)).await?
        };
        let address = self.store.publish(&sealed).await?;
        info!(
            identity,
            address = %address,
            entries = bundle.len(),
            bytes = sealed.len(),
            "Published bundle"
        );

        let tx = self.pointers.set_pointer(identity, &address).await?;
        info!(identity, tx = %tx.hash, chain = self.pointers.chain_name(), "Pointer update submitted");
        if let Err(e) =
            wait_for_confirmation(self.pointers.as_ref(), &tx, &self.options.confirmation).await
        {
            warn!(identity, address = %address, error = %e, "Pointer update failed; new object left unreferenced");
            return Err(e);
        }
        info!(identity, tx = %tx.hash, "Pointer update confirmed");
        self.emit(PointerEvent::Updated {
            identity: identity.to_string(),
            address: address.clone(),
            tx: tx.clone(),
        });

        let retired_previous = match previous {
            Some(prev) if prev != address => self.retire_best_effort(&prev).await,
            _ => false,
        };

        self.install(identity, bundle, table).await;
        Ok(SyncOutcome {
            address,
            tx,
            retired_previous,
            affected,
        })
    }

    /// Add one entry. The secret is checked before anything else happens.
    pub async fn add_entry(&self, entry: NewEntry) -> Result<SyncOutcome> {
        entry.validate()?;
        let episode = self.begin_sync().await?;

        let (entry, secret) = self
            .seal_entries(&episode, vec![entry])
            .await?
            .pop()
            .ok_or_else(|| VaultError::Encryption("entry was not sealed".to_string()))?;
        let id = entry.id.clone();
        let fresh = HashMap::from([(id.clone(), secret)]);

        self.publish(episode, fresh, move |bundle| {
            bundle.push(entry)?;
            Ok(vec![id])
        })
        .await
    }

    pub async fn remove_entry(&self, id: &str) -> Result<SyncOutcome> {
        let episode = self.begin_sync().await?;
        self.publish(episode, HashMap::new(), |bundle| {
            bundle.remove(id).map(|removed| vec![removed.id])
        })
        .await
    }

    pub async fn rename_entry(&self, id: &str, label: &str) -> Result<SyncOutcome> {
        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(VaultError::InvalidEntry("label is empty".to_string()));
        }

        let episode = self.begin_sync().await?;
        self.publish(episode, HashMap::new(), |bundle| {
            let entry = bundle
                .find_mut(id)
                .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
            entry.label = label;
            Ok(vec![entry.id.clone()])
        })
        .await
    }

    /// Add many entries in a single publish. Every candidate is validated
    /// before any is encrypted; one bad candidate rejects the batch.
    pub async fn import_entries(&self, candidates: Vec<EntryCandidate>) -> Result<SyncOutcome> {
        let entries: Vec<NewEntry> = candidates.into_iter().map(NewEntry::from).collect();
        if entries.is_empty() {
            return Err(VaultError::InvalidEntry("nothing to import".to_string()));
        }
        for entry in &entries {
            entry.validate()?;
        }

        let episode = self.begin_sync().await?;
        let mut sealed = Vec::with_capacity(entries.len());
        let mut fresh = HashMap::with_capacity(entries.len());
        for (entry, secret) in self.seal_entries(&episode, entries).await? {
            fresh.insert(entry.id.clone(), secret);
            sealed.push(entry);
        }
        info!(count = sealed.len(), "Importing entries");

        self.publish(episode, fresh, move |bundle| {
            let ids = sealed.iter().map(|e| e.id.clone()).collect();
            for entry in sealed {
                bundle.push(entry)?;
            }
            Ok(ids)
        })
        .await
    }

    /// Import an `otpauth-migration://` export. Counter-based records are
    /// skipped.
    pub async fn import_migration_uri(&self, uri: &str) -> Result<SyncOutcome> {
        let records = decode_migration_uri(uri)?;
        let mut candidates = Vec::with_capacity(records.len());
        for record in &records {
            if record.kind.is_time_based() {
                candidates.push(EntryCandidate::from_record(record));
            } else {
                warn!(name = %record.name, "Skipping counter-based entry");
            }
        }

        if candidates.is_empty() {
            return Err(VaultError::Migration(
                "payload contains no time-based entries".to_string(),
            ));
        }
        self.import_entries(candidates).await
    }

    /// Tombstone the pointer and retire the current object. Returns `None`
    /// when there was nothing published.
    pub async fn delete_vault(&self) -> Result<Option<TxHandle>> {
        let episode = self.begin_sync().await?;
        let identity = episode.identity.as_str();

        let pointer = self.pointers.get_pointer(identity).await?;
        let empty = Bundle::new(identity);
        let table = self
            .prepare_secrets(&empty, HashMap::new(), &episode.signature)
            .await?;

        if !pointer.is_live() {
            self.install(identity, empty, table).await;
            return Ok(None);
        }

        let tx = self.pointers.clear_pointer(identity).await?;
        wait_for_confirmation(self.pointers.as_ref(), &tx, &self.options.confirmation).await?;
        info!(identity, tx = %tx.hash, "Pointer cleared");
        self.emit(PointerEvent::Retired {
            identity: identity.to_string(),
            tx: tx.clone(),
        });

        self.retire_best_effort(&pointer.content_address).await;
        self.install(identity, empty, table).await;
        Ok(Some(tx))
    }
}
