use talos_storage::StorageError;
use thiserror::Error;

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("state machine not found: {0}")]
    MachineNotFound(String),

    #[error("gate token not found: {0}")]
    TokenNotFound(String),

    #[error("invalid machine definition: {0}")]
    InvalidDefinition(String),

    #[error("no transition from {from} to {to} in machine {machine_id}")]
    UndefinedTransition {
        machine_id: String,
        from: String,
        to: String,
    },

    #[error("asset {asset} is in state {current}, transition starts from {requested_from}")]
    WrongCurrentState {
        asset: String,
        current: String,
        requested_from: String,
    },

    #[error("gate requirements not satisfiable: {0}")]
    RequirementsUnsatisfied(String),

    #[error("gate token {token_id} expired at {expired_at}")]
    TokenExpired {
        token_id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("gate token {token_id} invalid: {reasons}")]
    TokenInvalid { token_id: String, reasons: String },

    #[error("gate token {0} has already been consumed or revoked")]
    TokenConsumed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
