/// Signer collaborator: produces the unlock signature for an identity.
///
/// Implementations sign [`UNLOCK_MESSAGE`] and nothing else. A user who
/// declines the prompt yields `VaultError::Cancelled`, which the vault
/// treats as a normal return to `Locked`.
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as _;
use async_trait::async_trait;

use crate::crypto::signature::{UnlockSignature, UNLOCK_MESSAGE};
use crate::error::{Result, VaultError};

#[async_trait]
pub trait UnlockSigner: Send + Sync {
    /// Wallet address this signer speaks for.
    fn identity(&self) -> String;

    /// Sign the fixed unlock message. May wait indefinitely on the user.
    async fn sign_unlock_message(&self) -> Result<UnlockSignature>;
}

/// EIP-191 personal-sign with a local secp256k1 key. RFC 6979 nonces make
/// the signature deterministic for the key and message.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    pub fn from_private_key(hex_key: &str) -> Result<Self> {
        let inner: PrivateKeySigner = hex_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| VaultError::Config(format!("invalid private key: {e}")))?;
        Ok(Self::new(inner))
    }

    pub fn key(&self) -> &PrivateKeySigner {
        &self.inner
    }
}

#[async_trait]
impl UnlockSigner for LocalSigner {
    fn identity(&self) -> String {
        self.inner.address().to_string()
    }

    async fn sign_unlock_message(&self) -> Result<UnlockSignature> {
        let signature = self
            .inner
            .sign_message(UNLOCK_MESSAGE.as_bytes())
            .await
            .map_err(|e| VaultError::KeyDerivation(format!("signing failed: {e}")))?;
        UnlockSignature::from_bytes(signature.as_bytes().to_vec())
    }
}
