//! # a3s-mcp-http
//!
//! Session-scoped streamable HTTP transport with suspendable handlers for
//! the A3S ecosystem.
//!
//! ## Overview
//!
//! A single HTTP endpoint carries a bidirectional JSON-RPC conversation.
//! Clients POST messages; the server answers with JSON, a 202
//! acknowledgement, or a Server-Sent-Events stream. Handlers that need to
//! talk back to the client (log notifications, sampling requests) run as
//! suspendable computations parked between messages and resumed by a tick
//! scheduler when a reply arrives, a notification has been flushed, or a
//! request times out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use a3s_mcp_http::{DemoServer, MemoryMessageSource, Transport, TransportConfig};
//!
//! # async fn example() -> a3s_mcp_http::Result<()> {
//! let config = TransportConfig::default();
//! let bus = Arc::new(MemoryMessageSource::new());
//! let server = Arc::new(DemoServer::new(bus.clone(), config.request_timeout()));
//!
//! Transport::new(config, bus, server).serve().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Transport**: owns the session registry; cheap to clone
//! - **http**: axum adapter mapping methods and reply shapes
//! - **scheduler**: periodic flush and resume pass over the registry
//! - **Continuation** trait: a resumable unit of handler logic
//! - **MessageSource** / **ProtocolHandler** traits: the outbound bus and the
//!   protocol core the transport is wired to

pub mod config;
pub mod continuation;
pub mod demo;
pub mod error;
pub mod http;
pub mod registry;
mod scheduler;
pub mod sink;
pub mod source;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::TransportConfig;
pub use continuation::{Continuation, Suspender, TaskContinuation};
pub use error::{Result, TransportError};
pub use http::{router, SESSION_ID_HEADER};
pub use sink::{decode_events, encode_event, DecodedEvent, StreamSink};
pub use source::{ImmediateReply, InboundOutcome, MessageSource, ProtocolHandler};
pub use transport::{OutgoingReply, Transport};
pub use types::{
    ComputationStatus, ErrorObject, ErrorResponse, MessageKind, OutgoingMessage, PeerReply,
    PendingRequest, RequestId, Resume, SessionId, WaitStatus,
};

// Re-export the in-memory bus and demo core for convenience
pub use demo::DemoServer;
pub use source::memory::{MailboxStats, MemoryMessageSource};
