//! HTTP boundary adapter
//!
//! One endpoint, dispatched on method. POST bodies go to the protocol core;
//! the reply is then an immediate response, a 202 acknowledgement, a JSON
//! body or a freshly opened event stream. Every response carries permissive
//! CORS headers.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;

use crate::error::{Result, TransportError};
use crate::transport::{OutgoingReply, Transport};
use crate::types::SessionId;

/// Header carrying the session identifier in both directions
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const ALLOW_METHODS: &str = "POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Mcp-Session-Id, Last-Event-ID, Authorization, Accept";
const EXPOSE_HEADERS: &str = "Mcp-Session-Id";

/// Build the router serving the transport at its configured endpoint
pub fn router(transport: Transport) -> Router {
    let endpoint = transport.config().endpoint.clone();
    Router::new()
        .route(&endpoint, any(handle_request))
        .layer(middleware::map_response(apply_cors))
        .layer(TraceLayer::new_for_http())
        .with_state(transport)
}

async fn handle_request(
    State(transport): State<Transport>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = match session_from_headers(&headers) {
        Ok(session_id) => session_id,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting request with malformed session header");
            return e.into();
        }
    };

    match method {
        Method::OPTIONS => StatusCode::NO_CONTENT.into_response(),
        Method::POST => handle_post(&transport, session_id, body).await,
        Method::DELETE => handle_delete(&transport, session_id).await,
        other => TransportError::MethodNotAllowed(other.to_string()).into(),
    }
}

/// Session id from the request headers; empty counts as absent
fn session_from_headers(headers: &HeaderMap) -> Result<Option<SessionId>> {
    let Some(value) = headers.get(SESSION_ID_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| TransportError::InvalidSessionId("<non-ascii>".to_string()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    SessionId::parse(raw)
        .map(Some)
        .ok_or_else(|| TransportError::InvalidSessionId(raw.to_string()))
}

async fn handle_post(transport: &Transport, session_id: Option<SessionId>, body: Bytes) -> Response {
    let outcome = match transport
        .handler()
        .handle_message(body, session_id, transport)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Protocol core failed to handle message");
            return e.into();
        }
    };

    if let Some(reply) = outcome.immediate {
        let mut response = if reply.body.is_empty() {
            reply.status.into_response()
        } else {
            (
                reply.status,
                [(header::CONTENT_TYPE, "application/json")],
                reply.body,
            )
                .into_response()
        };
        if let Some(session_id) = outcome.session_id.or(session_id) {
            set_session_header(&mut response, &session_id);
        }
        return response;
    }

    let Some(session_id) = outcome.session_id else {
        tracing::error!("Message handled but no session was established");
        return TransportError::SessionNotEstablished.into();
    };

    let reply = match transport.route_outgoing(&session_id).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to route outgoing messages");
            return e.into();
        }
    };

    let mut response = match reply {
        OutgoingReply::Accepted => StatusCode::ACCEPTED.into_response(),
        OutgoingReply::Json(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        OutgoingReply::Stream(rx) => {
            let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                    (header::CONNECTION, "keep-alive"),
                    (HeaderName::from_static("x-accel-buffering"), "no"),
                ],
                Body::from_stream(stream),
            )
                .into_response()
        }
    };
    set_session_header(&mut response, &session_id);
    response
}

async fn handle_delete(transport: &Transport, session_id: Option<SessionId>) -> Response {
    let Some(session_id) = session_id else {
        return TransportError::MissingSessionId.into();
    };

    match transport.terminate_session(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to terminate session");
            e.into()
        }
    }
}

fn set_session_header(response: &mut Response, session_id: &SessionId) {
    if let Ok(value) = HeaderValue::from_str(&session_id.as_header_value()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
}

async fn apply_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_session(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_missing_header_is_absent() {
        assert_eq!(session_from_headers(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_empty_header_is_absent() {
        assert_eq!(session_from_headers(&headers_with_session("")).unwrap(), None);
        assert_eq!(session_from_headers(&headers_with_session("  ")).unwrap(), None);
    }

    #[test]
    fn test_valid_header_parsed() {
        let id = SessionId::new();
        let parsed = session_from_headers(&headers_with_session(&id.as_header_value())).unwrap();
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let err = session_from_headers(&headers_with_session("abc")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidSessionId(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_headers_applied() {
        let response = apply_cors(StatusCode::NO_CONTENT.into_response()).await;
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], EXPOSE_HEADERS);
    }
}
