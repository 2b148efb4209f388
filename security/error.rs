//! Error types for the trust core

use thiserror::Error;

/// Result type for trust core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Trust core errors
///
/// Verification-style operations report a plain mismatch as `false`; these
/// variants are for rejections the caller must handle distinctly.
#[derive(Error, Debug)]
pub enum Error {
    /// Token is past its expiry instant
    #[error("Token expired")]
    TokenExpired,

    /// Token is used before its not-before instant
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Bad signature, audience, issuer, algorithm or structure
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Credentials or second factor rejected
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Wrong key, corrupted ciphertext or authentication tag mismatch
    #[error("Decryption failed")]
    DecryptionFailure,

    /// Audit chain check failed
    #[error("Integrity violation at entry {index}: {reason}")]
    IntegrityViolation {
        /// Position of the first offending entry
        index: usize,
        /// What did not match
        reason: String,
    },

    /// Input rejected before any processing
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Key or secret not available from the key backend
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key backend failure
    #[error("Key backend error: {0}")]
    KeyBackend(String),

    /// Password hashing failure
    #[error("Hashing error: {0}")]
    Hashing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vigil_risk_engine::Error> for Error {
    fn from(err: vigil_risk_engine::Error) -> Self {
        Error::Config(err.to_string())
    }
}
