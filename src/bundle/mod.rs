/// OTP bundle: the full set of a user's entries, serialized as one unit.
///
/// The codec is a deterministic JSON round trip. `decode` only checks that
/// `entries` is present and is a list. Entries written by older, looser
/// clients are accepted as they are; per-entry rules (unique ids, supported
/// algorithms, base32 secrets) are enforced when entries are created, not
/// when a bundle is read.
///
/// Secrets inside entries are individually encrypted, and the whole bundle
/// is encrypted again when stored (see [`object`]).
pub mod object;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::aead::{Envelope, ENVELOPE_VERSION};
use crate::error::{Result, VaultError};
use crate::totp::{Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD};

/// Current bundle schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// A single OTP entry as stored. The secret is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OtpEntry {
    /// Opaque unique identifier within the bundle.
    pub id: String,
    /// Display label, conventionally `issuer:account`.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    /// Base64 AES-GCM ciphertext of the base32 secret.
    pub encrypted_secret: String,
    pub algorithm: Algorithm,
    pub digits: u32,
    /// Time step in seconds.
    pub period: u64,
    pub created_at: DateTime<Utc>,
    /// Base64 IV used for `encrypted_secret`.
    pub iv: String,
    /// Base64 KDF salt used for `encrypted_secret`.
    pub salt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_reference: Option<String>,
}

impl Default for OtpEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            issuer: None,
            account_name: None,
            encrypted_secret: String::new(),
            algorithm: Algorithm::default(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            created_at: DateTime::<Utc>::default(),
            iv: String::new(),
            salt: String::new(),
            logo_reference: None,
        }
    }
}

impl OtpEntry {
    /// The per-entry secret as an envelope for decryption.
    pub fn secret_envelope(&self) -> Envelope {
        Envelope {
            ciphertext: self.encrypted_secret.clone(),
            iv: self.iv.clone(),
            salt: self.salt.clone(),
            version: ENVELOPE_VERSION,
        }
    }

    pub fn set_secret_envelope(&mut self, envelope: Envelope) {
        self.encrypted_secret = envelope.ciphertext;
        self.iv = envelope.iv;
        self.salt = envelope.salt;
    }
}

/// The ordered entry list plus ownership metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bundle {
    /// Insertion order, preserved across round trips.
    pub entries: Vec<OtpEntry>,
    pub owner_identity: String,
    pub last_modified: DateTime<Utc>,
    pub schema_version: u32,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            owner_identity: String::new(),
            last_modified: DateTime::<Utc>::default(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl Bundle {
    pub fn new(owner_identity: impl Into<String>) -> Self {
        Self {
            owner_identity: owner_identity.into(),
            last_modified: Utc::now(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&OtpEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut OtpEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Append an entry, keeping ids unique.
    pub fn push(&mut self, entry: OtpEntry) -> Result<()> {
        if self.find(&entry.id).is_some() {
            return Err(VaultError::DuplicateEntry(entry.id));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<OtpEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        Ok(self.entries.remove(index))
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_modified = now;
        self.schema_version = SCHEMA_VERSION;
    }
}

/// Serialize a bundle to JSON bytes.
pub fn encode(bundle: &Bundle) -> Result<Vec<u8>> {
    serde_json::to_vec(bundle).map_err(|e| VaultError::Serialization(e.to_string()))
}

/// Parse a bundle from JSON bytes.
pub fn decode(bytes: &[u8]) -> Result<Bundle> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| VaultError::MalformedBundle(format!("not valid JSON: {e}")))?;
    decode_value(value)
}

pub(crate) fn decode_value(value: serde_json::Value) -> Result<Bundle> {
    match value.get("entries") {
        Some(serde_json::Value::Array(_)) => {}
        Some(_) => {
            return Err(VaultError::MalformedBundle(
                "`entries` is not a list".to_string(),
            ))
        }
        None => {
            return Err(VaultError::MalformedBundle(
                "missing `entries` field".to_string(),
            ))
        }
    }

    serde_json::from_value(value).map_err(|e| VaultError::MalformedBundle(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str) -> OtpEntry {
        OtpEntry {
            id: id.to_string(),
            label: format!("Example:{id}"),
            issuer: Some("Example".to_string()),
            account_name: Some(id.to_string()),
            encrypted_secret: "Y2lwaGVy".to_string(),
            algorithm: Algorithm::Sha256,
            digits: 8,
            period: 30,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            iv: "aXZpdml2aXZpdml2".to_string(),
            salt: "c2FsdHNhbHRzYWx0c2FsdA==".to_string(),
            logo_reference: Some("bafkreilogo".to_string()),
        }
    }

    #[test]
    fn test_roundtrip_empty_single_and_many() {
        let mut bundle = Bundle::new("0xOwner");
        assert_eq!(decode(&encode(&bundle).unwrap()).unwrap(), bundle);

        bundle.push(entry("a")).unwrap();
        assert_eq!(decode(&encode(&bundle).unwrap()).unwrap(), bundle);

        bundle.push(entry("b")).unwrap();
        bundle.push(entry("c")).unwrap();
        let decoded = decode(&encode(&bundle).unwrap()).unwrap();
        assert_eq!(decoded, bundle);
        let ids: Vec<_> = decoded.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_roundtrip_optional_fields_absent() {
        let mut bare = entry("bare");
        bare.issuer = None;
        bare.account_name = None;
        bare.logo_reference = None;

        let mut bundle = Bundle::new("0xOwner");
        bundle.push(bare).unwrap();

        let bytes = encode(&bundle).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(!text.contains("logoReference"));
        assert_eq!(decode(&bytes).unwrap(), bundle);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let mut bundle = Bundle::new("0xOwner");
        bundle.push(entry("a")).unwrap();
        assert_eq!(encode(&bundle).unwrap(), encode(&bundle).unwrap());
    }

    #[test]
    fn test_missing_entries_is_malformed() {
        let result = decode(br#"{"ownerIdentity":"0xOwner"}"#);
        assert!(matches!(result, Err(VaultError::MalformedBundle(_))));
    }

    #[test]
    fn test_entries_not_a_list_is_malformed() {
        let result = decode(br#"{"entries":{"id":"x"}}"#);
        assert!(matches!(result, Err(VaultError::MalformedBundle(_))));
        assert!(matches!(
            decode(b"not json"),
            Err(VaultError::MalformedBundle(_))
        ));
    }

    #[test]
    fn test_legacy_loose_entries_accepted() {
        let legacy = br#"{
            "entries": [
                {"id": "1", "label": "Old", "encryptedSecret": "abc", "algorithm": "sha-1"},
                {"id": "1", "label": "Dup", "encryptedSecret": "def", "algorithm": "SHA3"}
            ]
        }"#;
        let bundle = decode(legacy).unwrap();
        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(bundle.entries[0].algorithm, Algorithm::Sha1);
        assert_eq!(bundle.entries[0].digits, DEFAULT_DIGITS);
        assert_eq!(bundle.entries[0].period, DEFAULT_PERIOD);
        assert_eq!(
            bundle.entries[1].algorithm,
            Algorithm::Unknown("SHA3".to_string())
        );
    }

    #[test]
    fn test_push_rejects_duplicate_id() {
        let mut bundle = Bundle::new("0xOwner");
        bundle.push(entry("a")).unwrap();
        assert!(matches!(
            bundle.push(entry("a")),
            Err(VaultError::DuplicateEntry(_))
        ));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut bundle = Bundle::new("0xOwner");
        for id in ["a", "b", "c"] {
            bundle.push(entry(id)).unwrap();
        }
        bundle.remove("b").unwrap();
        let ids: Vec<_> = bundle.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert!(matches!(
            bundle.remove("zzz"),
            Err(VaultError::EntryNotFound(_))
        ));
    }
}
