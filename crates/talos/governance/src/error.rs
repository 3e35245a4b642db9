use talos_pack::PackError;
use talos_storage::StorageError;
use thiserror::Error;

pub type GovernanceResult<T> = Result<T, GovernanceError>;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("override not found: {0}")]
    NotFound(String),

    #[error("invalid override operation: {0}")]
    Validation(String),

    #[error("override {override_id} expired at {expired_at}")]
    Expired {
        override_id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("override {override_id} is {status}, expected {expected}")]
    WrongStatus {
        override_id: String,
        status: String,
        expected: String,
    },

    #[error("evidence pack assembly failed: {0}")]
    Pack(#[from] PackError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
