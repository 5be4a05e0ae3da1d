//! Core transport types
//!
//! Session identifiers, outgoing messages, pending requests, resume values
//! and the JSON-RPC error body used on the wire. All wire types use
//! camelCase JSON serialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default timeout for a correlated request awaiting its reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-RPC protocol version tag
pub const JSONRPC_VERSION: &str = "2.0";

/// Opaque session identifier (RFC 4122 UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Mint a fresh random session identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a session identifier from its header form
    pub fn parse(value: &str) -> Option<Self> {
        uuid::Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Hyphenated lowercase form used in the session header
    pub fn as_header_value(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// JSON-RPC request identifier (number or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Kind of an outgoing protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Server-to-client request that expects a correlated reply
    Request,
    /// Fire-and-forget notification
    Notification,
    /// Response to a client request
    Response,
}

/// Context tag carried alongside an outgoing payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    /// Message kind
    pub kind: MessageKind,

    /// Request id this message correlates with, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<RequestId>,
}

/// A serialized protocol message queued for delivery to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Serialized payload (one JSON document)
    pub payload: String,

    /// Delivery context
    pub context: MessageContext,
}

impl OutgoingMessage {
    /// A server-to-client request correlated with `id`
    pub fn request(payload: impl Into<String>, id: RequestId) -> Self {
        Self {
            payload: payload.into(),
            context: MessageContext {
                kind: MessageKind::Request,
                correlation_id: Some(id),
            },
        }
    }

    /// A notification
    pub fn notification(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            context: MessageContext {
                kind: MessageKind::Notification,
                correlation_id: None,
            },
        }
    }

    /// A response to a client request
    pub fn response(payload: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            payload: payload.into(),
            context: MessageContext {
                kind: MessageKind::Response,
                correlation_id: id,
            },
        }
    }
}

/// A correlated outbound request awaiting the peer's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request identifier
    pub request_id: RequestId,

    /// When the request was issued
    pub timestamp: DateTime<Utc>,

    /// Expiry budget measured from `timestamp`
    pub timeout: Duration,
}

impl PendingRequest {
    /// Create a pending request issued now with the default timeout
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time elapsed since the request was issued
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }

    /// Whether the request has used up its timeout budget at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.timeout
    }
}

/// A reply received from the peer for a correlated request
#[derive(Debug, Clone, PartialEq)]
pub enum PeerReply {
    /// Successful result
    Result(serde_json::Value),
    /// Error reported by the peer
    Error(ErrorObject),
}

/// Value a suspended computation is resumed with
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Resumed after yielding to let notifications flush
    Continue,
    /// The peer answered a correlated request
    Reply(PeerReply),
    /// No reply arrived within the request's timeout
    TimedOut {
        request_id: RequestId,
        timeout: Duration,
    },
}

impl Resume {
    /// Collapse the resume value into the peer's result or an error body
    ///
    /// `Continue` yields `null`; a timeout becomes an internal error
    /// correlated with the request that expired.
    pub fn into_result(self) -> std::result::Result<serde_json::Value, ErrorResponse> {
        match self {
            Resume::Continue => Ok(serde_json::Value::Null),
            Resume::Reply(PeerReply::Result(value)) => Ok(value),
            Resume::Reply(PeerReply::Error(error)) => Err(ErrorResponse::new(None, error)),
            Resume::TimedOut {
                request_id,
                timeout,
            } => Err(ErrorResponse::new(
                Some(request_id),
                ErrorObject::internal_error(format!(
                    "Request timed out after {} seconds",
                    timeout.as_secs()
                )),
            )),
        }
    }
}

/// Why a session's computation is currently parked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitStatus {
    /// Not parked on anything the scheduler tracks
    #[default]
    None,
    /// Parked until a correlated reply arrives or times out
    AwaitingResponse,
    /// Parked once so queued notifications can flush
    AwaitingNotificationResume,
}

/// Lifecycle state reported by a continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationStatus {
    /// Executing, not yet parked
    Running,
    /// Parked, waiting for a resume value
    Suspended,
    /// Finished, the final output is available
    Terminated,
}

// ─── Wire error body ─────────────────────────────────────────────

/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// JSON-RPC error response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl ErrorResponse {
    pub fn new(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }
}
