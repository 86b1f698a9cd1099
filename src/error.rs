//! Defines the custom `Error` and `Result` types for the gateway.

use crate::types::{
    ErrorData, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    MISSING_CREDENTIAL, RESOURCE_NOT_FOUND, SESSION_NOT_FOUND,
};

/// The primary error type for the gateway.
///
/// The variants split along the line the protocol cares about: protocol
/// faults (bad shape, unknown names) are surfaced to the caller as JSON-RPC
/// errors, while `Downstream` failures are caught inside the capability
/// execute path and reported as result data instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request envelope itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request named a method the dispatcher does not know.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Request parameters failed validation against the declared contract.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A `tools/call` named a capability absent from the registry.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A `prompts/get` named a template absent from the prompt registry.
    #[error("unknown prompt: {0}")]
    PromptNotFound(String),

    /// The resource provider could not produce the addressed resource.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A capability requiring a bound credential was invoked on a session
    /// with none.
    #[error("capability '{0}' requires a bound credential")]
    MissingCredential(String),

    /// A non-creating request referenced an unrecognized session id.
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// Two capabilities with the same name were registered. Fails startup.
    #[error("duplicate capability name: {0}")]
    DuplicateCapability(String),

    /// The backend call behind a capability failed. Data, not a wire error.
    #[error("downstream request failed: {0}")]
    Downstream(String),

    /// Network I/O failure on a transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal channel closed unexpectedly, usually because the peer
    /// task has already shut down.
    #[error("internal communication channel closed")]
    ChannelClosed,

    /// Miscellaneous internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized `Result` type used throughout the gateway.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps the error to the JSON-RPC code it crosses the wire with.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => INVALID_REQUEST,
            Error::MethodNotFound(_) | Error::UnknownCapability(_) | Error::PromptNotFound(_) => {
                METHOD_NOT_FOUND
            }
            Error::InvalidParams(_) => INVALID_PARAMS,
            Error::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            Error::MissingCredential(_) => MISSING_CREDENTIAL,
            Error::SessionNotFound(_) => SESSION_NOT_FOUND,
            _ => INTERNAL_ERROR,
        }
    }

    /// Converts the error into the wire-level error payload.
    pub fn to_error_data(&self) -> ErrorData {
        ErrorData {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Downstream(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}
