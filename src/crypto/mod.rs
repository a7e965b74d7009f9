/// Client-side cryptography for the vault.
///
/// Nothing in this module performs I/O. Plaintext secrets and key material
/// never leave the process.
pub mod aead;
pub mod hash;
pub mod kdf;
pub mod sensitive;
pub mod signature;

pub use aead::{Cipher, Envelope};
pub use signature::{UnlockSignature, UNLOCK_MESSAGE};
