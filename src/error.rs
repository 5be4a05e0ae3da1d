//! Error types for a3s-mcp-http

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::types::{ErrorObject, ErrorResponse};

/// Errors that can occur in the transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Session header present but not a valid identifier
    #[error("Invalid Mcp-Session-Id header format.")]
    InvalidSessionId(String),

    /// Session header required but absent
    #[error("Mcp-Session-Id header is required.")]
    MissingSessionId,

    /// HTTP method not supported by the endpoint
    #[error("Method Not Allowed")]
    MethodNotAllowed(String),

    /// Protocol handling finished without establishing a session
    #[error("Session could not be established.")]
    SessionNotEstablished,

    /// Protocol core failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message source failure
    #[error("Message source error: {0}")]
    Source(String),

    /// Continuation misuse or failure
    #[error("Computation error: {0}")]
    Computation(String),

    /// A tool failed; reported to the peer as a tool error result
    #[error("{0}")]
    Tool(String),

    /// The session was deleted while the computation was parked
    #[error("Computation abandoned: session was terminated")]
    Abandoned,

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML deserialization error
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Server bind/serve failure
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// HTTP status this error maps to at the transport boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransportError::InvalidSessionId(_) | TransportError::MissingSessionId => {
                StatusCode::BAD_REQUEST
            }
            TransportError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured protocol error body for this error
    pub fn to_error_response(&self) -> ErrorResponse {
        let error = match self {
            TransportError::InvalidSessionId(_)
            | TransportError::MissingSessionId
            | TransportError::MethodNotAllowed(_) => ErrorObject::invalid_request(self.to_string()),
            _ => ErrorObject::internal_error(self.to_string()),
        };
        ErrorResponse::new(None, error)
    }
}

impl From<TransportError> for Response {
    fn from(err: TransportError) -> Self {
        let status = err.status_code();
        let body = err.to_error_response();
        (status, axum::Json(body)).into_response()
    }
}
