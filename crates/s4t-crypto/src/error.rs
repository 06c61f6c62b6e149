use thiserror::Error;

/// Errors from key loading, sealing and opening.
///
/// Every variant aborts only the operation that raised it.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("malformed key: {0}")]
    KeyMalformed(String),

    #[error("malformed envelope: {0}")]
    EnvelopeMalformed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}
