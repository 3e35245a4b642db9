use talos_storage::StorageError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("evidence record not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no records to checkpoint for tenant {0}")]
    NothingToCheckpoint(String),

    #[error("hash computation failed: {0}")]
    Hashing(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
