use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid unlock signature format")]
    InvalidSignatureFormat,

    #[error("Invalid secret format: expected base32 with at least 16 characters")]
    InvalidSecretFormat,

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// `referenced` is set when the missing object is the one the current
    /// pointer promises to be durable.
    #[error("Content not found: {address}")]
    NotFound { address: String, referenced: bool },

    #[error("Storage gateway timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Storage request rejected: {0}")]
    StoreRejected(String),

    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("Pointer transaction failed: {0}")]
    Transaction(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Vault is locked")]
    Locked,

    #[error("Unlock already in progress")]
    UnlockInProgress,

    #[error("Another sync is already in flight")]
    SyncInProgress,

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Duplicate entry id: {0}")]
    DuplicateEntry(String),

    #[error("Bundle owner mismatch: expected {expected}, found {found}")]
    OwnerMismatch { expected: String, found: String },

    #[error("Migration payload error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Whether retrying the same operation with the same inputs can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Timeout(_) | VaultError::Store(_))
    }

    /// User declined a signature or a transaction. Not an error to alarm about.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VaultError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
