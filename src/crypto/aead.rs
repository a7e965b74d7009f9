/// AES-256-GCM envelopes keyed by an unlock signature.
///
/// Each encryption draws a fresh 16-byte KDF salt and a fresh 96-bit IV
/// from the OS CSPRNG. A failed tag check is the only integrity signal in
/// the system and always surfaces as `DecryptionFailed`.
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{self, PBKDF2_ITERATIONS, SALT_LEN};
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Envelope format version written by this crate.
pub const ENVELOPE_VERSION: u32 = 2;

/// Encrypted payload container. Binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub version: u32,
}

/// Generate a random 12-byte IV.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Signature-keyed cipher. Holds only the KDF cost, never key material.
#[derive(Debug, Clone, Copy)]
pub struct Cipher {
    iterations: u32,
}

impl Default for Cipher {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl Cipher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn encrypt(&self, plaintext: &[u8], signature: &UnlockSignature) -> Result<Envelope> {
        let salt = kdf::generate_salt();
        let iv = generate_iv();
        let key = kdf::derive_key(signature, &salt, self.iterations)?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        Ok(Envelope {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
            salt: BASE64.encode(salt),
            version: ENVELOPE_VERSION,
        })
    }

    pub fn decrypt(&self, envelope: &Envelope, signature: &UnlockSignature) -> Result<Vec<u8>> {
        let ciphertext = decode_field(&envelope.ciphertext)?;
        let iv: [u8; IV_LEN] = decode_field(&envelope.iv)?
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;
        let salt: [u8; SALT_LEN] = decode_field(&envelope.salt)?
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;

        if ciphertext.len() < TAG_LEN {
            return Err(VaultError::DecryptionFailed);
        }

        let key = kdf::derive_key(signature, &salt, self.iterations)?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| VaultError::DecryptionFailed)?;

        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| VaultError::DecryptionFailed)
    }

    /// Encrypt a UTF-8 secret (an entry's base32 seed).
    pub fn encrypt_secret(&self, secret: &str, signature: &UnlockSignature) -> Result<Envelope> {
        self.encrypt(secret.as_bytes(), signature)
    }

    pub fn decrypt_secret(&self, envelope: &Envelope, signature: &UnlockSignature) -> Result<String> {
        let bytes = self.decrypt(envelope, signature)?;
        String::from_utf8(bytes).map_err(|_| VaultError::DecryptionFailed)
    }
}

fn decode_field(field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(field)
        .map_err(|_| VaultError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(1_000)
    }

    fn sig(byte: u8) -> UnlockSignature {
        UnlockSignature::from_bytes(vec![byte; 65]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let secret = "JBSWY3DPEHPK3PXP";
        let envelope = cipher().encrypt_secret(secret, &sig(1)).unwrap();
        assert_eq!(envelope.version, ENVELOPE_VERSION);

        let decrypted = cipher().decrypt_secret(&envelope, &sig(1)).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn test_fresh_iv_and_salt_every_time() {
        let a = cipher().encrypt(b"same input", &sig(1)).unwrap();
        let b = cipher().encrypt(b"same input", &sig(1)).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_signature_fails() {
        let envelope = cipher().encrypt(b"secret", &sig(1)).unwrap();
        assert!(matches!(
            cipher().decrypt(&envelope, &sig(2)),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut envelope = cipher().encrypt(b"secret", &sig(1)).unwrap();
        let mut raw = BASE64.decode(&envelope.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        envelope.ciphertext = BASE64.encode(raw);

        assert!(matches!(
            cipher().decrypt(&envelope, &sig(1)),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_bad_iv_length_fails() {
        let mut envelope = cipher().encrypt(b"secret", &sig(1)).unwrap();
        envelope.iv = BASE64.encode([0u8; 8]);
        assert!(matches!(
            cipher().decrypt(&envelope, &sig(1)),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_field_lengths() {
        let envelope = cipher().encrypt(b"hello", &sig(1)).unwrap();
        assert_eq!(BASE64.decode(&envelope.iv).unwrap().len(), IV_LEN);
        assert_eq!(BASE64.decode(&envelope.salt).unwrap().len(), SALT_LEN);
        assert_eq!(
            BASE64.decode(&envelope.ciphertext).unwrap().len(),
            5 + TAG_LEN
        );
    }

    #[test]
    fn test_empty_plaintext() {
        let envelope = cipher().encrypt(b"", &sig(3)).unwrap();
        assert!(cipher().decrypt(&envelope, &sig(3)).unwrap().is_empty());
    }
}
