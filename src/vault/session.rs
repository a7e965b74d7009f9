/// In-memory state of an unlocked vault: the cached signature, the bundle as
/// stored, and each entry's decrypted secret.
///
/// Dropping a session zeroizes the signature and every secret.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::bundle::{Bundle, OtpEntry};
use crate::crypto::aead::Cipher;
use crate::crypto::sensitive::SensitiveVec;
use crate::crypto::signature::UnlockSignature;
use crate::error::Result;
use crate::totp::{self, Algorithm};

/// Public, secret-free view of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub id: String,
    pub label: String,
    pub issuer: Option<String>,
    pub account_name: Option<String>,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
    pub created_at: DateTime<Utc>,
    pub logo_reference: Option<String>,
}

impl From<&OtpEntry> for EntryView {
    fn from(entry: &OtpEntry) -> Self {
        Self {
            id: entry.id.clone(),
            label: entry.label.clone(),
            issuer: entry.issuer.clone(),
            account_name: entry.account_name.clone(),
            algorithm: entry.algorithm.clone(),
            digits: entry.digits,
            period: entry.period,
            created_at: entry.created_at,
            logo_reference: entry.logo_reference.clone(),
        }
    }
}

/// A rendered code for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpCode {
    pub id: String,
    pub label: String,
    pub code: String,
    /// Seconds until `code` expires.
    pub remaining: u64,
}

#[derive(Clone)]
struct CachedSecret {
    /// Ciphertext the secret was decrypted from, to detect replacement.
    ciphertext: String,
    secret: SensitiveVec,
}

/// Decrypted secrets for a bundle that is about to replace the session's.
pub(crate) struct SecretTable(HashMap<String, CachedSecret>);

impl SecretTable {
    /// Build the table for `bundle` before it is published. Secrets are
    /// reused when the ciphertext is unchanged, taken from `fresh` for
    /// entries this session just created, and decrypted otherwise (entries
    /// written by another device since unlock).
    pub(crate) fn prepare(
        self,
        bundle: &Bundle,
        mut fresh: HashMap<String, SensitiveVec>,
        signature: &UnlockSignature,
        cipher: &Cipher,
    ) -> Result<SecretTable> {
        let cache = self.0;
        let mut secrets = HashMap::with_capacity(bundle.len());
        for entry in &bundle.entries {
            let cached = match (cache.get(&entry.id), fresh.remove(&entry.id)) {
                (_, Some(secret)) => CachedSecret {
                    ciphertext: entry.encrypted_secret.clone(),
                    secret,
                },
                (Some(cached), None) if cached.ciphertext == entry.encrypted_secret => cached.clone(),
                _ => decrypt_entry(entry, signature, cipher)?,
            };
            secrets.insert(entry.id.clone(), cached);
        }
        Ok(SecretTable(secrets))
    }
}

pub(crate) struct Session {
    pub(crate) identity: String,
    pub(crate) signature: UnlockSignature,
    bundle: Bundle,
    secrets: HashMap<String, CachedSecret>,
}

fn decrypt_entry(entry: &OtpEntry, signature: &UnlockSignature, cipher: &Cipher) -> Result<CachedSecret> {
    let secret = cipher.decrypt_secret(&entry.secret_envelope(), signature)?;
    Ok(CachedSecret {
        ciphertext: entry.encrypted_secret.clone(),
        secret: SensitiveVec::new(secret.into_bytes()),
    })
}

impl Session {
    /// Decrypt every entry of `bundle`. Any failure aborts the whole unlock.
    pub(crate) fn open(
        identity: String,
        signature: UnlockSignature,
        bundle: Bundle,
        cipher: &Cipher,
    ) -> Result<Self> {
        let mut secrets = HashMap::with_capacity(bundle.len());
        for entry in &bundle.entries {
            secrets.insert(entry.id.clone(), decrypt_entry(entry, &signature, cipher)?);
        }

        Ok(Self {
            identity,
            signature,
            bundle,
            secrets,
        })
    }

    /// Secrets this session holds, as the starting point for the next
    /// bundle's table.
    pub(crate) fn secret_cache(&self) -> SecretTable {
        SecretTable(self.secrets.clone())
    }

    /// Swap in a published bundle and its prepared secrets.
    pub(crate) fn install(&mut self, bundle: Bundle, table: SecretTable) {
        self.bundle = bundle;
        self.secrets = table.0;
    }

    pub(crate) fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub(crate) fn views(&self) -> Vec<EntryView> {
        self.bundle.entries.iter().map(EntryView::from).collect()
    }

    pub(crate) fn periods(&self) -> Vec<u64> {
        self.bundle.entries.iter().map(|e| e.period).collect()
    }

    pub(crate) fn codes(&self, at_unix: u64) -> Vec<OtpCode> {
        self.bundle
            .entries
            .iter()
            .map(|entry| {
                let secret = self
                    .secrets
                    .get(&entry.id)
                    .and_then(|s| std::str::from_utf8(s.secret.as_bytes()).ok())
                    .unwrap_or_default();
                OtpCode {
                    id: entry.id.clone(),
                    label: entry.label.clone(),
                    code: totp::generate(secret, &entry.algorithm, entry.digits, entry.period, at_unix),
                    remaining: totp::time_remaining(entry.period, at_unix),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;

    fn signature(fill: u8) -> UnlockSignature {
        UnlockSignature::from_bytes(vec![fill; 65]).unwrap()
    }

    fn entry(id: &str, secret: &str, sig: &UnlockSignature, cipher: &Cipher) -> OtpEntry {
        let mut entry = OtpEntry {
            id: id.to_string(),
            label: format!("Test:{id}"),
            ..OtpEntry::default()
        };
        entry.set_secret_envelope(cipher.encrypt_secret(secret, sig).unwrap());
        entry
    }

    #[test]
    fn test_open_decrypts_all_entries() {
        let cipher = Cipher::new(10);
        let sig = signature(1);
        let mut bundle = Bundle::new("0xabc");
        bundle.push(entry("a", "JBSWY3DPEHPK3PXP", &sig, &cipher)).unwrap();

        let session = Session::open("0xabc".into(), sig, bundle, &cipher).unwrap();
        let codes = session.codes(59);
        assert_eq!(codes.len(), 1);
        assert_eq!(
            codes[0].code,
            totp::generate("JBSWY3DPEHPK3PXP", &Algorithm::Sha1, 6, 30, 59)
        );
        assert_eq!(codes[0].remaining, 1);
    }

    #[test]
    fn test_open_with_wrong_signature_fails() {
        let cipher = Cipher::new(10);
        let mut bundle = Bundle::new("0xabc");
        bundle
            .push(entry("a", "JBSWY3DPEHPK3PXP", &signature(1), &cipher))
            .unwrap();

        assert!(matches!(
            Session::open("0xabc".into(), signature(2), bundle, &cipher),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_prepare_decrypts_foreign_entries() {
        let cipher = Cipher::new(10);
        let sig = signature(1);
        let mut session =
            Session::open("0xabc".into(), sig.clone(), Bundle::new("0xabc"), &cipher).unwrap();

        let mut next = Bundle::new("0xabc");
        next.push(entry("other-device", "HXDMVJECJJWSRB3H", &sig, &cipher))
            .unwrap();
        let table = session
            .secret_cache()
            .prepare(&next, HashMap::new(), &sig, &cipher)
            .unwrap();
        session.install(next, table);

        assert_eq!(session.views().len(), 1);
        assert_eq!(
            session.codes(0)[0].code,
            totp::generate("HXDMVJECJJWSRB3H", &Algorithm::Sha1, 6, 30, 0)
        );
    }

    #[test]
    fn test_prepare_fails_on_undecryptable_entry() {
        let cipher = Cipher::new(10);
        let session =
            Session::open("0xabc".into(), signature(1), Bundle::new("0xabc"), &cipher).unwrap();

        let mut next = Bundle::new("0xabc");
        next.push(entry("foreign", "HXDMVJECJJWSRB3H", &signature(9), &cipher))
            .unwrap();
        assert!(matches!(
            session
                .secret_cache()
                .prepare(&next, HashMap::new(), &session.signature, &cipher),
            Err(VaultError::DecryptionFailed)
        ));
        assert!(session.views().is_empty());
    }
}
