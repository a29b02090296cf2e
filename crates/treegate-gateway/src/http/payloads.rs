//! Payload submission handlers.
//!
//! Both routes carry a JSON message at the start of the body, its length
//! declared by the `message-size` header, followed immediately by the raw
//! payload bytes. The legacy route names its lease in the message's
//! `session_token` field; the token route names it in the path (and the
//! message field, if present, is ignored).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use super::{GatewayState, reply};

/// The JSON message framing a payload submission.
#[derive(Debug, Deserialize)]
struct SubmitMessage {
    /// Lease session token; required on the legacy route.
    #[serde(default)]
    session_token: Option<String>,
    /// Base64 SHA-1 the client claims for the payload bytes.
    payload_digest: String,
    /// Size of the object header inside the payload, logged for the
    /// receiver's benefit.
    #[serde(default)]
    header_size: Option<u64>,
    /// Client protocol version, logged for diagnostics.
    #[serde(default)]
    api_version: Option<i64>,
}

/// Splits the body into the leading JSON message and the payload blob.
fn split_body(headers: &HeaderMap, body: &Bytes) -> Result<(SubmitMessage, Bytes), Response> {
    let message_size = headers
        .get("message-size")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse::<usize>().ok())
        .ok_or_else(|| reply::bad_request("invalid_body"))?;
    if body.len() < message_size {
        return Err(reply::bad_request("invalid_body"));
    }
    let message = serde_json::from_slice::<SubmitMessage>(&body[..message_size])
        .map_err(|_| reply::bad_request("invalid_body"))?;
    tracing::debug!(
        header_size = ?message.header_size,
        api_version = ?message.api_version,
        payload_bytes = body.len() - message_size,
        "payload submission"
    );
    Ok((message, body.slice(message_size..)))
}

async fn run_submission(
    state: &GatewayState,
    token: &str,
    payload: Bytes,
    digest_b64: &str,
) -> Response {
    match state.ingest.submit(token, payload, digest_b64).await {
        Ok(()) => {
            state.metrics.payload_submission("ok");
            reply::ok()
        }
        Err(err) => {
            state.metrics.payload_submission(err.reason_code());
            reply::failure(&err)
        }
    }
}

/// `POST /api/v1/payloads/{token}` — submit a payload against the lease
/// named in the path.
pub async fn submit(
    State(state): State<Arc<GatewayState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (message, payload) = match split_body(&headers, &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    run_submission(&state, &token, payload, &message.payload_digest).await
}

/// `POST /api/v1/payloads` — legacy submit; the lease token travels in
/// the JSON message instead of the path.
pub async fn legacy_submit(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (message, payload) = match split_body(&headers, &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let Some(token) = message.session_token.as_deref() else {
        return reply::bad_request("invalid_body");
    };
    run_submission(&state, token, payload, &message.payload_digest).await
}
