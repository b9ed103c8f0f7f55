//! Error types for HashLedger

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Insufficient funds, bad signature or malformed fields. Never mined.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    /// Broken linkage, hash mismatch or missing proof-of-work.
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    /// A confirmed block failed the validity check.
    #[error("Chain invalid: {0}")]
    ChainInvalid(String),
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    /// The tip moved while a block was being mined against it.
    #[error("Stale tip: {0}")]
    StaleTip(String),
    #[error("Mining cancelled")]
    MiningCancelled,
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
