//! Error types for GhostProc

use crate::surface::SurfaceError;
use crate::types::LifecycleState;
use thiserror::Error;

/// Result type alias for GhostProc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flat status code, as reported through `ProcessorCallback::on_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation is illegal in the current lifecycle state
    InvalidState,
    /// Bad argument value (null surface, unknown field value, wrong kind)
    InvalidValue,
    /// Bad parameter (unknown buffer index)
    InvalidParam,
    /// Preconditions for the operation are not met
    InvalidOperation,
    /// A surface subsystem call failed
    Unknown,
    /// The transform backend failed on one frame
    ProcessFailed,
    /// Allocation failed
    NoMemory,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::InvalidValue => "INVALID_VAL",
            ErrorCode::InvalidParam => "INVALID_PARAM",
            ErrorCode::InvalidOperation => "INVALID_OPERATION",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::ProcessFailed => "PROCESS_FAILED",
            ErrorCode::NoMemory => "NO_MEMORY",
        };
        f.write_str(name)
    }
}

/// GhostProc error type
#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle errors
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // Collaborator errors
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Transform backend error: {0}")]
    Backend(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidState { .. } => ErrorCode::InvalidState,
            Error::InvalidValue(_) | Error::Config(_) => ErrorCode::InvalidValue,
            Error::InvalidParam(_) => ErrorCode::InvalidParam,
            Error::InvalidOperation(_) => ErrorCode::InvalidOperation,
            Error::Surface(_) | Error::Io(_) | Error::Internal(_) => ErrorCode::Unknown,
            Error::Backend(_) => ErrorCode::ProcessFailed,
        }
    }

    /// Check if the caller can recover by retrying with correct sequencing
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. }
                | Error::InvalidParam(_)
                | Error::Surface(_)
                | Error::Backend(_)
        )
    }

    pub(crate) fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Error::InvalidState { operation, state }
    }
}
