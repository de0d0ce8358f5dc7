// Error types shared across the node

use crate::consensus::ValidationError;
use crate::core::Hash256;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A lookup that came back empty
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("transaction {0} not found")]
    Transaction(Hash256),
    #[error("block {0} not found")]
    Block(Hash256),
    #[error("output {index} of transaction {txid} not found")]
    Output { txid: Hash256, index: i64 },
    #[error("no wallet for address {0}")]
    Wallet(String),
}

/// Ledger storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Malformed or undeliverable network messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for peer")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("blockchain already exists at {}", .0.display())]
    ChainExists(PathBuf),
    #[error("no blockchain found at {}; create one first", .0.display())]
    ChainMissing(PathBuf),
    #[error("mining was cancelled")]
    MiningCancelled,
    #[error("keystore error: {0}")]
    Keystore(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::Database(e))
    }
}

impl Error {
    /// Whether the failure only concerns the offending input (and the node can carry on)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::InsufficientFunds { .. }
                | Error::MiningCancelled
                | Error::Protocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientFunds { have: 5, need: 8 };
        assert_eq!(err.to_string(), "insufficient funds: have 5, need 8");

        let err: Error = NotFoundError::Block(Hash256::zero()).into();
        assert!(err.to_string().starts_with("block 0000"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_storage_errors_are_not_recoverable() {
        let err: Error = StorageError::Corrupt("bad utxo record".to_string()).into();
        assert!(!err.is_recoverable());
    }
}
