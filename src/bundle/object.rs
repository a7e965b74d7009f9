/// Stored object versions.
///
/// - version 1 (or no `version` field): the bundle JSON itself, stored in the
///   clear apart from the per-entry secret ciphertexts. Read-only.
/// - version 2: the encoded bundle wrapped in a single [`Envelope`].
///
/// Readers accept both; [`seal_bundle`] always writes version 2.
use crate::bundle::{self, Bundle};
use crate::crypto::aead::{Cipher, Envelope, ENVELOPE_VERSION};
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};

pub const LEGACY_VERSION: u32 = 1;

/// A fetched object, classified by version but not yet decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredObject {
    Legacy(Bundle),
    Sealed(Envelope),
}

impl StoredObject {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::MalformedBundle(format!("not valid JSON: {e}")))?;

        if !value.is_object() {
            return Err(VaultError::MalformedBundle(
                "stored object is not a JSON object".to_string(),
            ));
        }

        let version = match value.get("version") {
            None | Some(serde_json::Value::Null) => LEGACY_VERSION,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    VaultError::MalformedBundle(format!("invalid version field: {v}"))
                })?,
        };

        match version {
            LEGACY_VERSION => Ok(StoredObject::Legacy(bundle::decode_value(value)?)),
            ENVELOPE_VERSION => serde_json::from_value(value)
                .map(StoredObject::Sealed)
                .map_err(|e| VaultError::MalformedBundle(format!("bad envelope: {e}"))),
            other => Err(VaultError::MalformedBundle(format!(
                "unsupported object version {other}"
            ))),
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            StoredObject::Legacy(_) => LEGACY_VERSION,
            StoredObject::Sealed(envelope) => envelope.version,
        }
    }

    /// Recover the bundle. Legacy objects are returned without any
    /// decryption attempt; sealed objects must authenticate.
    pub fn open(self, signature: &UnlockSignature, cipher: &Cipher) -> Result<Bundle> {
        match self {
            StoredObject::Legacy(bundle) => Ok(bundle),
            StoredObject::Sealed(envelope) => {
                let plaintext = cipher.decrypt(&envelope, signature)?;
                bundle::decode(&plaintext)
            }
        }
    }
}

/// Parse and open fetched bytes in one step.
pub fn open_object(bytes: &[u8], signature: &UnlockSignature, cipher: &Cipher) -> Result<Bundle> {
    StoredObject::parse(bytes)?.open(signature, cipher)
}

/// Encode, encrypt and serialize a bundle as a version 2 object.
pub fn seal_bundle(bundle: &Bundle, signature: &UnlockSignature, cipher: &Cipher) -> Result<Vec<u8>> {
    let encoded = bundle::encode(bundle)?;
    let envelope = cipher.encrypt(&encoded, signature)?;
    serde_json::to_vec(&envelope).map_err(|e| VaultError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::OtpEntry;

    fn cipher() -> Cipher {
        Cipher::new(1_000)
    }

    fn sig(byte: u8) -> UnlockSignature {
        UnlockSignature::from_bytes(vec![byte; 65]).unwrap()
    }

    fn sample_bundle() -> Bundle {
        let mut bundle = Bundle::new("0xOwner");
        bundle
            .push(OtpEntry {
                id: "e1".to_string(),
                label: "GitHub:octocat".to_string(),
                encrypted_secret: "c2VjcmV0".to_string(),
                ..OtpEntry::default()
            })
            .unwrap();
        bundle
    }

    #[test]
    fn test_seal_writes_version_two() {
        let sealed = seal_bundle(&sample_bundle(), &sig(1), &cipher()).unwrap();
        let object = StoredObject::parse(&sealed).unwrap();
        assert_eq!(object.version(), ENVELOPE_VERSION);
        assert!(!String::from_utf8(sealed).unwrap().contains("GitHub"));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let bundle = sample_bundle();
        let sealed = seal_bundle(&bundle, &sig(1), &cipher()).unwrap();
        assert_eq!(open_object(&sealed, &sig(1), &cipher()).unwrap(), bundle);
    }

    #[test]
    fn test_sealed_wrong_signature_fails() {
        let sealed = seal_bundle(&sample_bundle(), &sig(1), &cipher()).unwrap();
        assert!(matches!(
            open_object(&sealed, &sig(2), &cipher()),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_legacy_without_version_is_read_in_the_clear() {
        let bundle = sample_bundle();
        let legacy = bundle::encode(&bundle).unwrap();

        let object = StoredObject::parse(&legacy).unwrap();
        assert_eq!(object.version(), LEGACY_VERSION);
        // Any signature opens a legacy object: no decryption is attempted.
        assert_eq!(object.open(&sig(9), &cipher()).unwrap(), bundle);
    }

    #[test]
    fn test_legacy_with_explicit_version_one() {
        let legacy = br#"{"version": 1, "entries": [], "ownerIdentity": "0xOwner"}"#;
        let bundle = open_object(legacy, &sig(1), &cipher()).unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.owner_identity, "0xOwner");
    }

    #[test]
    fn test_legacy_missing_entries_is_malformed() {
        assert!(matches!(
            StoredObject::parse(br#"{"version": 1}"#),
            Err(VaultError::MalformedBundle(_))
        ));
    }

    #[test]
    fn test_version_two_with_missing_fields_is_malformed() {
        assert!(matches!(
            StoredObject::parse(br#"{"version": 2, "ciphertext": "abc"}"#),
            Err(VaultError::MalformedBundle(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert!(matches!(
            StoredObject::parse(br#"{"version": 7, "entries": []}"#),
            Err(VaultError::MalformedBundle(_))
        ));
        assert!(matches!(
            StoredObject::parse(b"[1, 2, 3]"),
            Err(VaultError::MalformedBundle(_))
        ));
    }
}
