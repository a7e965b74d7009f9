/// Unlock signatures: the wallet-issued key material for a vault.
///
/// The signer is asked to sign [`UNLOCK_MESSAGE`] and nothing else. Wallet
/// signing schemes in use (secp256k1 with RFC 6979 nonces) are deterministic
/// for a fixed key and message, so the same identity always produces the same
/// signature. That determinism is a precondition here, not something this
/// module can check; only the format is validated.
use crate::crypto::sensitive::SensitiveVec;
use crate::error::{Result, VaultError};

/// The fixed message presented to the signer on every unlock.
pub const UNLOCK_MESSAGE: &str = "Unlock OTP Vault\n\n\
Signing this message derives the key that encrypts your one-time password secrets. \
It does not send a transaction and costs no gas.";

/// Minimum signature length in bytes (r || s || v).
pub const MIN_SIGNATURE_LEN: usize = 65;

/// A validated unlock signature. Only constructible through [`UnlockSignature::parse`]
/// or [`UnlockSignature::from_bytes`], so holding one means the format check passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlockSignature(SensitiveVec);

impl UnlockSignature {
    /// Parse a hex signature, with or without a `0x` prefix.
    pub fn parse(hex_sig: &str) -> Result<Self> {
        let trimmed = hex_sig.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() < MIN_SIGNATURE_LEN * 2 {
            return Err(VaultError::InvalidSignatureFormat);
        }

        let bytes = hex::decode(digits).map_err(|_| VaultError::InvalidSignatureFormat)?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SIGNATURE_LEN {
            return Err(VaultError::InvalidSignatureFormat);
        }
        Ok(Self(SensitiveVec::new(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Format predicate without constructing the signature.
pub fn is_valid_signature(hex_sig: &str) -> bool {
    UnlockSignature::parse(hex_sig).is_ok()
}
