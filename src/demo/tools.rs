//! Demo tools
//!
//! `calculator` answers immediately. The others talk back to the client
//! through a `ClientGateway` and therefore run as suspendable computations.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::gateway::{ClientGateway, LogLevel, SamplingRequest};
use crate::error::{Result, TransportError};
use crate::types::ErrorObject;

pub const CALCULATOR: &str = "calculator";
pub const LOGGING_DEMO: &str = "logging_demo";
pub const ANALYZE_TEXT: &str = "analyze_text";
pub const SUMMARIZE_AND_TRANSLATE: &str = "summarize_and_translate";

/// Tool descriptors returned by `tools/list`
pub fn definitions() -> Value {
    json!([
        {
            "name": CALCULATOR,
            "description": "Perform a calculation (no bidirectional communication)",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "a": { "type": "integer" },
                    "b": { "type": "integer" },
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"],
                        "default": "add"
                    }
                },
                "required": ["a", "b"]
            }
        },
        {
            "name": LOGGING_DEMO,
            "description": "Send logging notifications to the client over the event stream",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }
        },
        {
            "name": ANALYZE_TEXT,
            "description": "Analyze text using LLM sampling on the client",
            "inputSchema": {
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }
        },
        {
            "name": SUMMARIZE_AND_TRANSLATE,
            "description": "Summarize and translate text with two sequential sampling requests",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "target_language": { "type": "string" }
                },
                "required": ["text", "target_language"]
            }
        }
    ])
}

/// Decode tool arguments, mapping failures to invalid-params
pub fn parse_args<T: DeserializeOwned>(arguments: &Value) -> std::result::Result<T, ErrorObject> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| ErrorObject::invalid_params(format!("Invalid arguments: {e}")))
}

/// Successful `tools/call` result carrying `value` as structured content
pub fn success(value: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": value.to_string() }],
        "structuredContent": value,
        "isError": false,
    })
}

/// Failed `tools/call` result
pub fn failure(message: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": message.into() }],
        "isError": true,
    })
}

#[derive(Debug, Deserialize)]
pub struct CalculatorArgs {
    pub a: i64,
    pub b: i64,
    #[serde(default = "default_operation")]
    pub operation: String,
}

fn default_operation() -> String {
    "add".to_string()
}

pub fn calculator(args: CalculatorArgs) -> Result<Value> {
    let CalculatorArgs { a, b, operation } = args;
    let overflow = || TransportError::Tool("Arithmetic overflow".to_string());
    let result = match operation.as_str() {
        "add" => json!(a.checked_add(b).ok_or_else(overflow)?),
        "subtract" => json!(a.checked_sub(b).ok_or_else(overflow)?),
        "multiply" => json!(a.checked_mul(b).ok_or_else(overflow)?),
        "divide" if b == 0 => {
            return Err(TransportError::Tool("Cannot divide by zero".to_string()));
        }
        "divide" if a.checked_rem(b) == Some(0) => json!(a.checked_div(b).ok_or_else(overflow)?),
        "divide" => json!(a as f64 / b as f64),
        other => {
            return Err(TransportError::Tool(format!("Unknown operation: {other}")));
        }
    };

    Ok(json!({
        "operation": operation,
        "operands": [a, b],
        "result": result,
        "note": "This tool does not use bidirectional communication",
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoggingArgs {
    pub message: String,
}

pub async fn logging_demo(mut gateway: ClientGateway, args: LoggingArgs) -> Result<Value> {
    tracing::info!("Starting logging demonstration");

    gateway
        .log(
            LogLevel::Info,
            json!({
                "message": "Processing logging request",
                "timestamp": Utc::now().to_rfc3339(),
                "tool": LOGGING_DEMO,
            }),
        )
        .await?;

    gateway
        .log(
            LogLevel::Info,
            json!({
                "message": "Logging demonstration completed",
                "timestamp": Utc::now().to_rfc3339(),
                "original_message": args.message,
                "status": "success",
            }),
        )
        .await?;

    tracing::info!("Logging demonstration finished");
    Ok(json!({
        "message": args.message,
        "status": "completed",
        "notifications_sent": 2,
        "note": "This tool demonstrates sending logging notifications to the client via SSE",
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeArgs {
    pub text: String,
}

pub async fn analyze_text(mut gateway: ClientGateway, args: AnalyzeArgs) -> Result<Value> {
    tracing::info!("Starting text analysis with client sampling");

    let reply = gateway
        .sample(
            SamplingRequest::new(
                format!("Analyze the following text and provide insights: {}", args.text),
                500,
            )
            .with_temperature(0.7),
        )
        .await?;

    let analysis = if reply.text.is_empty() {
        "No response".to_string()
    } else {
        reply.text
    };

    Ok(json!({
        "original_text": args.text,
        "text_length": args.text.len(),
        "analysis": analysis,
        "model": reply.model,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeArgs {
    pub text: String,
    pub target_language: String,
}

pub async fn summarize_and_translate(
    mut gateway: ClientGateway,
    args: SummarizeArgs,
) -> Result<Value> {
    tracing::info!("Requesting summary");
    let summary = gateway
        .sample(SamplingRequest::new(
            format!("Summarize the following text in 2-3 sentences: {}", args.text),
            200,
        ))
        .await?
        .text;

    tracing::info!("Got summary, requesting translation");
    let translation = gateway
        .sample(SamplingRequest::new(
            format!(
                "Translate the following text to {}: {}",
                args.target_language, summary
            ),
            300,
        ))
        .await?
        .text;

    Ok(json!({
        "original_length": args.text.len(),
        "summary": summary,
        "translation": translation,
        "target_language": args.target_language,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(a: i64, b: i64, operation: &str) -> Result<Value> {
        calculator(CalculatorArgs {
            a,
            b,
            operation: operation.to_string(),
        })
    }

    #[test]
    fn test_calculator_operations() {
        assert_eq!(calc(2, 3, "add").unwrap()["result"], 5);
        assert_eq!(calc(2, 3, "subtract").unwrap()["result"], -1);
        assert_eq!(calc(4, 3, "multiply").unwrap()["result"], 12);
        assert_eq!(calc(8, 2, "divide").unwrap()["result"], 4);
        assert_eq!(calc(7, 2, "divide").unwrap()["result"], 3.5);
    }

    #[test]
    fn test_calculator_errors() {
        let err = calc(1, 0, "divide").unwrap_err();
        assert_eq!(err.to_string(), "Cannot divide by zero");

        let err = calc(1, 1, "modulo").unwrap_err();
        assert_eq!(err.to_string(), "Unknown operation: modulo");

        assert!(calc(i64::MAX, 1, "add").is_err());
    }

    #[test]
    fn test_calculator_default_operation() {
        let args: CalculatorArgs = parse_args(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(args.operation, "add");
        assert!(parse_args::<CalculatorArgs>(&json!({"a": "one"})).is_err());
    }

    #[test]
    fn test_result_shapes() {
        let ok = success(json!({"x": 1}));
        assert_eq!(ok["isError"], false);
        assert_eq!(ok["structuredContent"]["x"], 1);
        assert_eq!(ok["content"][0]["text"], r#"{"x":1}"#);

        let err = failure("nope");
        assert_eq!(err["isError"], true);
        assert_eq!(err["content"][0]["text"], "nope");
    }

    #[test]
    fn test_definitions_list_every_tool() {
        let names: Vec<String> = definitions()
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![CALCULATOR, LOGGING_DEMO, ANALYZE_TEXT, SUMMARIZE_AND_TRANSLATE]
        );
    }
}
