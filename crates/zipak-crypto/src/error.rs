//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid IV size
    #[error("Invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize {
        /// Expected IV size in bytes
        expected: usize,
        /// Actual IV size in bytes
        actual: usize,
    },

    /// Key slot index out of range for the archive's key table
    #[error("key slot {0} out of range for key table of size {1}")]
    KeySlotOutOfRange(u16, usize),

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// RSA decryption of the key table blob failed
    #[error("asymmetric key table decryption failed: {0}")]
    AsymmetricDecryptionFailed(String),

    /// RSA signature verification failed
    #[error("signature verification failed")]
    InvalidSignature,
}

/// Convenience result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CryptoError>;
