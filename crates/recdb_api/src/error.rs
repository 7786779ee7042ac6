//! Error types for the message protocol.

use recdb_core::CoreError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while serving the message protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The request does not have the `opID|method|args` shape, or its
    /// arguments are incomplete.
    #[error("bad request: malformed message")]
    Malformed,

    /// The request names a method the protocol does not know.
    #[error("bad request: unknown method")]
    UnknownMethod,

    /// The request data could not be applied.
    #[error("{0}")]
    InvalidData(String),

    /// The session has been shut down.
    #[error("session is shut down")]
    SessionClosed,

    /// A request was handled outside a tokio runtime.
    #[error("no async runtime available")]
    NoRuntime,

    /// Database error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProtocolError {
    /// Creates an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// Returns true for errors caused by the request itself.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed | Self::UnknownMethod | Self::InvalidData(_)
        )
    }
}
