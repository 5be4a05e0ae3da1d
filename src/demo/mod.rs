//! Demo protocol core
//!
//! Minimal JSON-RPC dispatch over the in-memory bus, enough to exercise
//! every reply shape of the transport: immediate errors, JSON responses,
//! notification flushes and correlated server-to-client requests.

pub mod gateway;
pub mod tools;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::continuation::{Continuation, TaskContinuation};
use crate::error::{Result, TransportError};
use crate::source::memory::MemoryMessageSource;
use crate::source::{InboundOutcome, ProtocolHandler};
use crate::transport::Transport;
use crate::types::{
    ComputationStatus, ErrorObject, ErrorResponse, OutgoingMessage, PeerReply, RequestId,
    SessionId, JSONRPC_VERSION,
};
use gateway::ClientGateway;

/// Server name reported by `initialize`
pub const SERVER_NAME: &str = "a3s-mcp-http";

/// Protocol version answered when the client does not name one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// One inbound JSON-RPC message: request, notification or client reply
#[derive(Debug, Deserialize)]
struct InboundMessage {
    jsonrpc: Option<String>,
    id: Option<RequestId>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Protocol core serving the demo tools
pub struct DemoServer {
    bus: Arc<MemoryMessageSource>,
    sessions: RwLock<HashSet<SessionId>>,
    request_timeout: Duration,
}

impl DemoServer {
    pub fn new(bus: Arc<MemoryMessageSource>, request_timeout: Duration) -> Self {
        Self {
            bus,
            sessions: RwLock::new(HashSet::new()),
            request_timeout,
        }
    }

    /// Whether `initialize` minted this session and it has not been ended
    pub async fn is_active(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains(session_id)
    }

    async fn initialize(&self, id: Option<RequestId>, params: &Value) -> Result<InboundOutcome> {
        let Some(id) = id else {
            return immediate_error(
                None,
                StatusCode::BAD_REQUEST,
                None,
                ErrorObject::invalid_request("initialize must be a request"),
            );
        };

        let session_id = SessionId::new();
        self.sessions.write().await.insert(session_id);
        tracing::info!(session_id = %session_id, "Session initialized");

        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        let result = json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "logging": {},
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.respond(&session_id, id, result).await;
        Ok(InboundOutcome::session(Some(session_id)))
    }

    /// Hand a client reply to the bus
    async fn accept_reply(
        &self,
        message: InboundMessage,
        session_id: Option<SessionId>,
    ) -> Result<InboundOutcome> {
        let (Some(session_id), Some(id)) = (session_id, message.id) else {
            return immediate_error(
                session_id,
                StatusCode::BAD_REQUEST,
                None,
                ErrorObject::invalid_request("Invalid Request"),
            );
        };

        let reply = match message.error {
            Some(error) => PeerReply::Error(error),
            None => PeerReply::Result(message.result.unwrap_or(Value::Null)),
        };
        if !self.bus.deliver_reply(&session_id, id.clone(), reply).await {
            tracing::debug!(
                session_id = %session_id,
                request_id = %id,
                "Reply does not match a pending request"
            );
        }
        Ok(InboundOutcome::immediate(
            Some(session_id),
            StatusCode::ACCEPTED,
            "",
        ))
    }

    async fn call_tool(
        &self,
        transport: &Transport,
        session_id: SessionId,
        id: RequestId,
        params: Value,
    ) -> Result<()> {
        let params: CallParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return self
                    .respond_error(
                        &session_id,
                        Some(id),
                        ErrorObject::invalid_params(format!("Invalid tools/call params: {e}")),
                    )
                    .await;
            }
        };
        let arguments = match params.arguments {
            Value::Null => json!({}),
            arguments => arguments,
        };

        tracing::debug!(session_id = %session_id, tool = %params.name, "Calling tool");
        match params.name.as_str() {
            tools::CALCULATOR => {
                let args = match tools::parse_args(&arguments) {
                    Ok(args) => args,
                    Err(error) => return self.respond_error(&session_id, Some(id), error).await,
                };
                let result = match tools::calculator(args) {
                    Ok(value) => tools::success(value),
                    Err(e) => tools::failure(e.to_string()),
                };
                self.respond(&session_id, id, result).await;
                Ok(())
            }
            tools::LOGGING_DEMO => {
                self.start_tool(transport, session_id, id, &arguments, tools::logging_demo)
                    .await
            }
            tools::ANALYZE_TEXT => {
                self.start_tool(transport, session_id, id, &arguments, tools::analyze_text)
                    .await
            }
            tools::SUMMARIZE_AND_TRANSLATE => {
                self.start_tool(
                    transport,
                    session_id,
                    id,
                    &arguments,
                    tools::summarize_and_translate,
                )
                .await
            }
            other => {
                self.respond_error(
                    &session_id,
                    Some(id),
                    ErrorObject::invalid_params(format!("Unknown tool: {other}")),
                )
                .await
            }
        }
    }

    /// Run a tool as a suspendable computation
    ///
    /// The tool runs until it first parks; it is then handed to the
    /// scheduler. A tool that finishes without parking is answered directly.
    async fn start_tool<A, F, Fut>(
        &self,
        transport: &Transport,
        session_id: SessionId,
        id: RequestId,
        arguments: &Value,
        tool: F,
    ) -> Result<()>
    where
        A: DeserializeOwned + Send + 'static,
        F: FnOnce(ClientGateway, A) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let args: A = match tools::parse_args(arguments) {
            Ok(args) => args,
            Err(error) => return self.respond_error(&session_id, Some(id), error).await,
        };

        let bus = Arc::clone(&self.bus);
        let request_timeout = self.request_timeout;
        let call_id = id.clone();
        let mut computation = TaskContinuation::start(move |suspender| async move {
            let gateway = ClientGateway::new(bus, session_id, suspender, request_timeout);
            let result = match tool(gateway, args).await {
                Ok(value) => tools::success(value),
                Err(TransportError::Abandoned) => return Err(TransportError::Abandoned),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Tool failed");
                    tools::failure(e.to_string())
                }
            };
            Ok(json!({ "jsonrpc": JSONRPC_VERSION, "id": call_id, "result": result }))
        })
        .await;

        if computation.status() == ComputationStatus::Terminated {
            match computation.take_output() {
                Some(Ok(response)) if !response.is_null() => {
                    self.bus
                        .enqueue(
                            &session_id,
                            OutgoingMessage::response(response.to_string(), Some(id)),
                        )
                        .await;
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Tool ended before suspending");
                }
                _ => {}
            }
            return Ok(());
        }

        transport.register_suspendable(computation, session_id).await;
        Ok(())
    }

    async fn respond(&self, session_id: &SessionId, id: RequestId, result: Value) {
        let payload = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result });
        self.bus
            .enqueue(
                session_id,
                OutgoingMessage::response(payload.to_string(), Some(id)),
            )
            .await;
    }

    async fn respond_error(
        &self,
        session_id: &SessionId,
        id: Option<RequestId>,
        error: ErrorObject,
    ) -> Result<()> {
        let payload = serde_json::to_string(&ErrorResponse::new(id.clone(), error))?;
        self.bus
            .enqueue(session_id, OutgoingMessage::response(payload, id))
            .await;
        Ok(())
    }
}

#[async_trait]
impl ProtocolHandler for DemoServer {
    async fn handle_message(
        &self,
        body: Bytes,
        session_id: Option<SessionId>,
        transport: &Transport,
    ) -> Result<InboundOutcome> {
        let value: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed JSON body");
                return immediate_error(
                    session_id,
                    StatusCode::BAD_REQUEST,
                    None,
                    ErrorObject::parse_error(format!("Parse error: {e}")),
                );
            }
        };
        let message = match serde_json::from_value::<InboundMessage>(value) {
            Ok(message) if message.jsonrpc.as_deref() == Some(JSONRPC_VERSION) => message,
            _ => {
                return immediate_error(
                    session_id,
                    StatusCode::BAD_REQUEST,
                    None,
                    ErrorObject::invalid_request("Invalid Request"),
                );
            }
        };

        let Some(method) = message.method.clone() else {
            return self.accept_reply(message, session_id).await;
        };
        if method == "initialize" {
            return self.initialize(message.id, &message.params).await;
        }

        let Some(session_id) = session_id else {
            return immediate_error(
                None,
                StatusCode::BAD_REQUEST,
                message.id,
                ErrorObject::invalid_request(TransportError::MissingSessionId.to_string()),
            );
        };
        if !self.is_active(&session_id).await {
            return immediate_error(
                None,
                StatusCode::NOT_FOUND,
                message.id,
                ErrorObject::invalid_request("Session not found"),
            );
        }

        let Some(id) = message.id else {
            tracing::debug!(session_id = %session_id, method = %method, "Notification received");
            return Ok(InboundOutcome::session(Some(session_id)));
        };

        match method.as_str() {
            "ping" => self.respond(&session_id, id, json!({})).await,
            "tools/list" => {
                self.respond(&session_id, id, json!({ "tools": tools::definitions() }))
                    .await
            }
            "tools/call" => {
                self.call_tool(transport, session_id, id, message.params)
                    .await?
            }
            other => {
                self.respond_error(
                    &session_id,
                    Some(id),
                    ErrorObject::method_not_found(format!("Method not found: {other}")),
                )
                .await?
            }
        }

        Ok(InboundOutcome::session(Some(session_id)))
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<()> {
        let known = self.sessions.write().await.remove(session_id);
        self.bus.clear_session(session_id).await;
        if known {
            tracing::info!(session_id = %session_id, "Session ended");
        }
        Ok(())
    }
}

fn immediate_error(
    session_id: Option<SessionId>,
    status: StatusCode,
    id: Option<RequestId>,
    error: ErrorObject,
) -> Result<InboundOutcome> {
    let body = serde_json::to_string(&ErrorResponse::new(id, error))?;
    Ok(InboundOutcome::immediate(session_id, status, body))
}
