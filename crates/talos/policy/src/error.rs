use talos_storage::StorageError;
use thiserror::Error;

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("invalid policy definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
