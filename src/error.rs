//! Error types for beamsync

use alloy_primitives::{Address, B256};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("State root {0} is not available")]
    MissingState(B256),
    #[error("Account {address} not found at state root {root}")]
    MissingAccount { root: B256, address: Address },
    #[error("Header {0} not found")]
    HeaderNotFound(B256),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Peer error: {0}")]
    PeerError(String),
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::TaskFailed(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, SyncError>;
