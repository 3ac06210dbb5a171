//! The single error sum type shared by every other crate in the workspace.
//!
//! Variants correspond 1:1 to the error kinds of the data-plane design:
//! input validation, store-state conflicts, data/codec faults, resource
//! exhaustion, and internal invariant violations. [`TracError::grpc_code`]
//! maps each to the gRPC status it surfaces at the outermost service layer;
//! nothing below that layer should convert to `tonic::Status` directly.

use tonic::Code;

#[derive(Debug, thiserror::Error)]
pub enum TracError {
    // -- Input --
    #[error("invalid argument: {0}")]
    InputValidation(String),
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("schema incompatible: {0}")]
    SchemaIncompatible(String),

    // -- State (raised by the metadata store) --
    #[error("missing item: {0}")]
    MissingItem(String),
    #[error("duplicate item: {0}")]
    DuplicateItem(String),
    #[error("wrong item type: {0}")]
    WrongItemType(String),

    // -- Data --
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("data constraint violated: {0}")]
    DataConstraint(String),
    #[error("data size exceeded: {0}")]
    DataSize(String),

    // -- Resource --
    #[error("storage I/O error: {0}")]
    StorageIo(#[source] std::io::Error),
    #[error("lock acquisition timed out: {0}")]
    LockTimeout(String),

    // -- Internal --
    #[error("unexpected internal state: {0}")]
    Unexpected(String),
    #[error("internal error: {0}")]
    TracInternal(String),

    // -- Boundary --
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
}

pub type Result<T> = std::result::Result<T, TracError>;

impl TracError {
    /// Maps this error to the gRPC status code it should surface as, per
    /// the error-code table in the data-plane design.
    pub fn grpc_code(&self) -> Code {
        use TracError::*;
        match self {
            InputValidation(_) | SchemaIncompatible(_) => Code::InvalidArgument,
            UnknownTenant(_) | MissingItem(_) => Code::NotFound,
            DuplicateItem(_) => Code::AlreadyExists,
            WrongItemType(_) => Code::FailedPrecondition,
            DataCorruption(_) => Code::DataLoss,
            DataConstraint(_) => Code::InvalidArgument,
            DataSize(_) => Code::ResourceExhausted,
            StorageIo(_) => Code::Internal,
            LockTimeout(_) => Code::ResourceExhausted,
            Unexpected(_) | TracInternal(_) => Code::Internal,
            Cancelled => Code::Cancelled,
            Grpc(status) => status.code(),
        }
    }
}

impl From<std::io::Error> for TracError {
    fn from(err: std::io::Error) -> Self {
        TracError::StorageIo(err)
    }
}

impl From<TracError> for tonic::Status {
    fn from(err: TracError) -> Self {
        let code = err.grpc_code();
        tonic::Status::new(code, err.to_string())
    }
}
