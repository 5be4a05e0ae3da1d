//! Collaborator traits: the protocol core and its outbound message bus
//!
//! The transport never parses protocol messages itself. A `ProtocolHandler`
//! consumes inbound bodies and may register suspendable computations; a
//! `MessageSource` answers what is queued or pending for each session.

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;

use crate::error::Result;
use crate::transport::Transport;
use crate::types::{OutgoingMessage, PeerReply, PendingRequest, RequestId, SessionId};

pub mod memory;

/// Outbound message bus consulted by the HTTP adapter and the scheduler
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Drain the messages queued for a session since the last call, in order
    async fn outgoing_messages(&self, session_id: &SessionId) -> Result<Vec<OutgoingMessage>>;

    /// Correlated requests still awaiting a reply, in issue order
    async fn pending_requests(&self, session_id: &SessionId) -> Result<Vec<PendingRequest>>;

    /// Take the peer's reply to `request_id`, if it has arrived
    async fn reply_for(
        &self,
        request_id: &RequestId,
        session_id: &SessionId,
    ) -> Result<Option<PeerReply>>;

    /// Stop tracking a request the scheduler gave up on
    ///
    /// Any reply already stored for it is dropped, and later replies are
    /// refused. Idempotent.
    async fn discard_request(&self, request_id: &RequestId, session_id: &SessionId) -> Result<()>;
}

/// Protocol core invoked for every inbound message
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Handle one raw inbound body
    ///
    /// May mint a session, queue outgoing messages on the bus, or register
    /// a suspendable computation through `transport`.
    async fn handle_message(
        &self,
        body: Bytes,
        session_id: Option<SessionId>,
        transport: &Transport,
    ) -> Result<InboundOutcome>;

    /// Release protocol state for a terminated session
    async fn end_session(&self, session_id: &SessionId) -> Result<()>;
}

/// A self-contained reply produced while handling an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateReply {
    pub status: StatusCode,
    pub body: String,
}

/// What the protocol core produced for one inbound message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundOutcome {
    /// Session established or confirmed by the handler
    pub session_id: Option<SessionId>,

    /// Reply to return as-is, bypassing queue inspection
    pub immediate: Option<ImmediateReply>,
}

impl InboundOutcome {
    /// Outcome that only confirms (or establishes) a session
    pub fn session(session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            immediate: None,
        }
    }

    /// Outcome carrying an immediate reply
    pub fn immediate(
        session_id: Option<SessionId>,
        status: StatusCode,
        body: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            immediate: Some(ImmediateReply {
                status,
                body: body.into(),
            }),
        }
    }
}
