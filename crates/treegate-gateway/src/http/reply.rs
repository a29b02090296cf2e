//! JSON response envelopes and the error-to-response mapping.
//!
//! Every response body is `{"status": ...}` with `"ok"`, `"error"` (plus a
//! `reason`), or `"path_busy"` (plus `time_remaining`). Business-level
//! failures keep HTTP 200 for compatibility with existing publisher
//! tooling; only malformed requests (400) and internal invariant
//! violations (500) use error status codes.
//!
//! This module also owns the propagation rule: every reported error is
//! logged at warn, internal errors at error.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use treegate_core::error::GatewayError;

/// `200 {"status":"ok"}`.
pub fn ok() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// `200 {"status":"error","reason":...}` — a well-formed interaction with
/// a business-level failure.
pub fn business_error(reason: &str) -> Response {
    Json(json!({ "status": "error", "reason": reason })).into_response()
}

/// `400 {"status":"error","reason":...}` — the request itself is
/// malformed (bad JSON, missing required header or field).
pub fn bad_request(reason: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "reason": reason })),
    )
        .into_response()
}

/// Maps a [`GatewayError`] onto the wire, applying the logging policy.
pub fn failure(err: &GatewayError) -> Response {
    match err {
        GatewayError::PathBusy { remaining_ms } => {
            tracing::warn!(remaining_ms, "lease request rejected: path busy");
            Json(json!({ "status": "path_busy", "time_remaining": remaining_ms }))
                .into_response()
        }
        GatewayError::SinkError { reason } => {
            tracing::warn!(reason, "payload sink rejected submission");
            business_error(reason)
        }
        GatewayError::InvalidBody { reason } => {
            tracing::warn!(reason, "malformed request body");
            bad_request(err.reason_code())
        }
        GatewayError::Internal { reason } => {
            tracing::error!(reason, "internal invariant violation");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "reason": err.reason_code() })),
            )
                .into_response()
        }
        other => {
            tracing::warn!(reason = other.reason_code(), "request failed");
            business_error(other.reason_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_busy_keeps_http_200() {
        let response = failure(&GatewayError::PathBusy { remaining_ms: 42 });
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn invalid_body_is_a_400() {
        let response = failure(&GatewayError::InvalidBody {
            reason: "bad json".into(),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_is_a_500() {
        let response = failure(&GatewayError::Internal {
            reason: "broken".into(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn business_failures_keep_http_200() {
        for err in [
            GatewayError::InvalidHmac,
            GatewayError::InvalidLease,
            GatewayError::LeaseExpired,
            GatewayError::InvalidPayloadHash,
            GatewayError::SinkError {
                reason: "full".into(),
            },
            GatewayError::BackendUnavailable {
                reason: "down".into(),
            },
        ] {
            assert_eq!(failure(&err).status(), StatusCode::OK);
        }
    }
}
