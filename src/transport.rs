//! Transport handle. Owns the session registry and ties the HTTP adapter,
//! the scheduler and the collaborators together
//!
//! Every registry mutation (HTTP callbacks, scheduler ticks, stream-close
//! notifications) happens under one async mutex, so the registry behaves as
//! if it were owned by a single event loop and a tick is never re-entered.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::continuation::Continuation;
use crate::error::{Result, TransportError};
use crate::registry::{Session, SessionRegistry};
use crate::sink::StreamSink;
use crate::source::{MessageSource, ProtocolHandler};
use crate::types::{MessageKind, OutgoingMessage, SessionId, WaitStatus};

/// How a write request should be answered once the protocol core is done
#[derive(Debug)]
pub enum OutgoingReply {
    /// Nothing queued; the caller must poll or wait for its next interaction
    Accepted,
    /// Queued messages serialized as one JSON value or array
    Json(String),
    /// An event stream was opened; frames arrive on this receiver
    Stream(mpsc::UnboundedReceiver<Bytes>),
}

pub(crate) struct TransportState {
    pub(crate) registry: SessionRegistry,
    pub(crate) ticker: Option<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    source: Arc<dyn MessageSource>,
    handler: Arc<dyn ProtocolHandler>,
    state: Mutex<TransportState>,
    next_sink_id: AtomicU64,
}

/// Cheaply cloneable transport handle
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a transport over the given collaborators
    pub fn new(
        config: TransportConfig,
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                handler,
                state: Mutex::new(TransportState {
                    registry: SessionRegistry::new(),
                    ticker: None,
                }),
                next_sink_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &dyn MessageSource {
        self.inner.source.as_ref()
    }

    pub fn handler(&self) -> &dyn ProtocolHandler {
        self.inner.handler.as_ref()
    }

    pub(crate) async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, TransportState> {
        self.inner.state.lock().await
    }

    /// Hand a suspendable computation to the scheduler
    ///
    /// Must be called once per session that intends to suspend. Replaces a
    /// computation already registered for the session and starts the tick
    /// loop if it is idle. Must not be called from inside a resumed
    /// computation.
    pub async fn register_suspendable(
        &self,
        computation: impl Continuation + 'static,
        session_id: SessionId,
    ) {
        let mut state = self.lock_state().await;
        if state.registry.register(session_id, Box::new(computation)) {
            tracing::warn!(
                session_id = %session_id,
                "Replacing computation already registered for session"
            );
        } else {
            tracing::debug!(session_id = %session_id, "Registered suspendable computation");
        }
        self.ensure_running(&mut state);
    }

    /// Wait-status of a registered session
    pub async fn wait_status(&self, session_id: &SessionId) -> Option<WaitStatus> {
        let state = self.lock_state().await;
        state.registry.get(session_id).map(Session::wait_status)
    }

    /// Whether a computation is registered for the session
    pub async fn is_registered(&self, session_id: &SessionId) -> bool {
        self.lock_state().await.registry.contains(session_id)
    }

    /// Whether the session currently has a writable event stream
    pub async fn has_open_stream(&self, session_id: &SessionId) -> bool {
        let state = self.lock_state().await;
        state
            .registry
            .get(session_id)
            .is_some_and(Session::has_writable_sink)
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.lock_state().await.registry.len()
    }

    /// Decide the reply shape for a write request on an established session
    ///
    /// Drains what is queued for the session. With a registered computation
    /// the messages open a new event stream (ending any previous one);
    /// otherwise they are returned as JSON.
    pub async fn route_outgoing(&self, session_id: &SessionId) -> Result<OutgoingReply> {
        let mut state = self.lock_state().await;
        let messages = self.inner.source.outgoing_messages(session_id).await?;

        if messages.is_empty() {
            tracing::debug!(session_id = %session_id, "No outgoing messages. Acknowledging with 202.");
            return Ok(OutgoingReply::Accepted);
        }

        if !state.registry.contains(session_id) {
            tracing::debug!(
                session_id = %session_id,
                count = messages.len(),
                "Outgoing messages without a suspended computation. Replying with JSON."
            );
            return Ok(OutgoingReply::Json(combine_payloads(&messages)));
        }

        tracing::debug!(
            session_id = %session_id,
            count = messages.len(),
            "Outgoing messages with a suspended computation. Opening event stream."
        );
        let sink_id = self.inner.next_sink_id.fetch_add(1, Ordering::Relaxed);
        let (sink, rx) = StreamSink::open(sink_id);
        let closed = sink.closed();
        if state.registry.attach_sink(session_id, sink).is_err() {
            return Err(TransportError::SessionNotEstablished);
        }
        if let Some(session) = state.registry.get_mut(session_id) {
            deliver(session, session_id, &messages);
        }

        if let Some(closed) = closed {
            let transport = self.clone();
            let session_id = *session_id;
            tokio::spawn(async move {
                if closed.await {
                    transport.release_sink(&session_id, sink_id).await;
                }
            });
        }

        Ok(OutgoingReply::Stream(rx))
    }

    /// Unregister a stream the peer walked away from
    async fn release_sink(&self, session_id: &SessionId, sink_id: u64) {
        let mut state = self.lock_state().await;
        if state.registry.detach_sink(session_id, sink_id) {
            tracing::info!(session_id = %session_id, "Event stream closed by peer");
        }
    }

    /// Tear down a session on explicit termination
    ///
    /// The computation is abandoned, its stream ended and the protocol core
    /// told to release the session. Safe to call for unknown sessions.
    pub async fn terminate_session(&self, session_id: &SessionId) -> Result<()> {
        tracing::info!(session_id = %session_id, "Terminating session");
        {
            let mut state = self.lock_state().await;
            if state.registry.remove(session_id) {
                tracing::debug!(session_id = %session_id, "Abandoned registered computation");
            }
        }
        self.inner.handler.end_session(session_id).await
    }

    /// Stop the scheduler, end every stream and clear the registry
    pub async fn close(&self) {
        tracing::info!("Closing transport");
        let mut state = self.lock_state().await;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        state.registry.clear();
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        self.inner.config.validate()?;
        let bind_addr = self.inner.config.bind_address();

        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

        tracing::info!(
            endpoint = %self.inner.config.endpoint,
            "Server listening on {bind_addr}"
        );

        let app = crate::http::router(self.clone());
        let transport = self.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                tracing::info!("Shutdown signal received");
                // Open event streams would otherwise hold graceful shutdown forever
                transport.close().await;
            })
            .await
            .map_err(|e| TransportError::Server(format!("Server error: {e}")))?;

        self.close().await;
        Ok(())
    }
}

/// Write queued messages into the session's stream in order
///
/// A request parks the session until its reply; a notification parks it
/// for one scheduler pass.
pub(crate) fn deliver(session: &mut Session, session_id: &SessionId, messages: &[OutgoingMessage]) {
    for message in messages {
        match message.context.kind {
            MessageKind::Request => session.wait = WaitStatus::AwaitingResponse,
            MessageKind::Notification => session.wait = WaitStatus::AwaitingNotificationResume,
            MessageKind::Response => {}
        }

        let written = session
            .sink
            .as_ref()
            .is_some_and(|sink| sink.write_event(&message.payload));
        if !written {
            tracing::warn!(
                session_id = %session_id,
                kind = ?message.context.kind,
                "Dropped outgoing message, event stream is closed"
            );
        }
    }
}

/// Single payload as-is, several as a JSON array
pub(crate) fn combine_payloads(messages: &[OutgoingMessage]) -> String {
    match messages {
        [single] => single.payload.clone(),
        many => {
            let joined: Vec<&str> = many.iter().map(|m| m.payload.as_str()).collect();
            format!("[{}]", joined.join(","))
        }
    }
}
