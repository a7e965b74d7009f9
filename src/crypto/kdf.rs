/// PBKDF2-HMAC-SHA256 key derivation from an unlock signature.
///
/// Input keying material is SHA-256(signature bytes), which normalizes
/// signature length before stretching. Every envelope draws its own salt,
/// so one signature never yields the same key twice.
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::crypto::signature::UnlockSignature;
use crate::error::{Result, VaultError};

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit AEAD key from a validated signature and salt.
pub fn derive_key(
    signature: &UnlockSignature,
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> Result<SensitiveBytes32> {
    if iterations == 0 {
        return Err(VaultError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }

    let mut material = Zeroizing::new([0u8; 32]);
    material.copy_from_slice(&Sha256::digest(signature.as_bytes()));

    let mut output = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(&material[..], salt, iterations, &mut output);

    let key = SensitiveBytes32::new(output);
    output.fill(0);
    Ok(key)
}
