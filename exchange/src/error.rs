use crate::database::StoreError;
use thiserror::Error;

/// The error taxonomy every handler speaks. Inner layers return their own
/// typed errors; translation into this taxonomy happens once at the service
/// boundary and the transport maps each variant to exactly one status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The default translation of storage errors. Call sites with more context
/// map individual variants differently, like the duplicate deposit digest
/// which is an AlreadyExists while a duplicate live withdrawal is a failed
/// precondition.
impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("not found".to_string()),
            StoreError::Duplicate => Self::AlreadyExists("already exists".to_string()),
            StoreError::Constraint(message) => Self::FailedPrecondition(message),
            StoreError::Decode(message) => Self::Internal(anyhow::anyhow!("{}", message)),
            StoreError::Other(err) => Self::Internal(err.into()),
        }
    }
}

impl From<model::resource::ResourceNameError> for Error {
    fn from(err: model::resource::ResourceNameError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
