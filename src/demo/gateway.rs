//! Client gateway handed to suspending tools
//!
//! Queues server-to-client messages on the bus and parks the tool until the
//! scheduler resumes it.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::continuation::Suspender;
use crate::error::{Result, TransportError};
use crate::source::memory::MemoryMessageSource;
use crate::types::{ErrorResponse, OutgoingMessage, SessionId, JSONRPC_VERSION};

/// Logging level carried by `notifications/message`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// A sampling request sent to the client
#[derive(Debug, Clone)]
pub struct SamplingRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl SamplingRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn params(&self) -> Value {
        let mut params = json!({
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": self.prompt },
            }],
            "maxTokens": self.max_tokens,
        });
        if let Some(temperature) = self.temperature {
            params["temperature"] = json!(temperature);
        }
        params
    }
}

/// Text and model of a sampling reply
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingReply {
    pub text: String,
    pub model: Option<String>,
}

impl SamplingReply {
    fn from_result(result: &Value) -> Self {
        let text = result
            .get("content")
            .filter(|content| content.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|content| content.get("text"))
            .and_then(Value::as_str)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        let model = result
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self { text, model }
    }
}

pub struct ClientGateway {
    bus: Arc<MemoryMessageSource>,
    session_id: SessionId,
    suspender: Suspender,
    request_timeout: Duration,
}

impl ClientGateway {
    pub fn new(
        bus: Arc<MemoryMessageSource>,
        session_id: SessionId,
        suspender: Suspender,
        request_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            session_id,
            suspender,
            request_timeout,
        }
    }

    /// Send a log notification and yield once so it is flushed
    pub async fn log(&mut self, level: LogLevel, data: Value) -> Result<()> {
        let payload = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": "notifications/message",
            "params": { "level": level.as_str(), "data": data },
        });
        self.bus
            .enqueue(
                &self.session_id,
                OutgoingMessage::notification(payload.to_string()),
            )
            .await;
        self.suspender.suspend().await?;
        Ok(())
    }

    /// Ask the client to sample its model and park until it answers
    ///
    /// A peer error or timeout surfaces as a `Tool` error carrying the
    /// error code and message.
    pub async fn sample(&mut self, request: SamplingRequest) -> Result<SamplingReply> {
        let request_id = self.bus.next_request_id();
        let payload = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": request_id,
            "method": "sampling/createMessage",
            "params": request.params(),
        });
        self.bus
            .send_request(
                &self.session_id,
                request_id.clone(),
                payload.to_string(),
                self.request_timeout,
            )
            .await;
        tracing::debug!(
            session_id = %self.session_id,
            request_id = %request_id,
            "Sampling request queued, suspending"
        );

        let resumed = self.suspender.suspend().await?;
        match resumed.into_result() {
            Ok(result) => Ok(SamplingReply::from_result(&result)),
            Err(ErrorResponse { error, .. }) => Err(TransportError::Tool(format!(
                "Sampling failed ({}): {}",
                error.code, error.message
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_params_shape() {
        let params = SamplingRequest::new("hello", 500)
            .with_temperature(0.7)
            .params();
        assert_eq!(params["messages"][0]["role"], "user");
        assert_eq!(params["messages"][0]["content"]["text"], "hello");
        assert_eq!(params["maxTokens"], 500);
        assert_eq!(params["temperature"], 0.7);

        let params = SamplingRequest::new("x", 10).params();
        assert!(params.get("temperature").is_none());
    }

    #[test]
    fn test_sampling_reply_extracts_trimmed_text() {
        let reply = SamplingReply::from_result(&json!({
            "role": "assistant",
            "content": { "type": "text", "text": "  insight \n" },
            "model": "test-model",
        }));
        assert_eq!(reply.text, "insight");
        assert_eq!(reply.model.as_deref(), Some("test-model"));
    }

    #[test]
    fn test_sampling_reply_non_text_content() {
        let reply = SamplingReply::from_result(&json!({
            "content": { "type": "image", "data": "..." },
        }));
        assert_eq!(reply.text, "");
        assert!(reply.model.is_none());
    }
}
