//! Error types for risk engine

use thiserror::Error;

/// Risk engine error
///
/// Scoring itself never fails; this only covers configuration problems.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
