pub mod bundle;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod migration;
pub mod signer;
pub mod storage;
pub mod totp;
pub mod vault;
