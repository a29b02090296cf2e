//! Lease endpoint handlers: acquire, commit, drop.

use std::sync::Arc;

use axum::Extension;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use treegate_core::path::LeasePath;

use super::authz::VerifiedKey;
use super::{GatewayState, reply};

/// Body of `POST /api/v1/leases`.
#[derive(Debug, Deserialize)]
struct NewLeaseRequest {
    /// The repository subtree to lease.
    path: String,
    /// Client protocol version, logged for diagnostics.
    #[serde(default)]
    api_version: Option<i64>,
}

/// `POST /api/v1/leases` — acquire a lease on a subtree.
pub async fn new_lease(
    State(state): State<Arc<GatewayState>>,
    Extension(VerifiedKey(key_id)): Extension<VerifiedKey>,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<NewLeaseRequest>(&body) else {
        state.metrics.lease_operation("acquire", "invalid_body");
        return reply::bad_request("invalid_body");
    };
    let Ok(path) = LeasePath::parse(&request.path) else {
        state.metrics.lease_operation("acquire", "invalid_body");
        return reply::bad_request("invalid_body");
    };
    tracing::debug!(
        path = %path,
        key_id,
        api_version = ?request.api_version,
        "new lease request"
    );

    match state.manager.acquire(&key_id, path).await {
        Ok(granted) => {
            state.metrics.lease_operation("acquire", "ok");
            state.refresh_lease_gauge().await;
            axum::Json(json!({
                "status": "ok",
                "session_token": granted.session_token,
                "max_lease_time": state.manager.max_lease_time_ms(),
            }))
            .into_response()
        }
        Err(err) => {
            state.metrics.lease_operation("acquire", err.reason_code());
            state.refresh_lease_gauge().await;
            reply::failure(&err)
        }
    }
}

/// `POST /api/v1/leases/{token}` — finalize (commit) a lease.
pub async fn commit_lease(
    State(state): State<Arc<GatewayState>>,
    Path(token): Path<String>,
) -> Response {
    match state.manager.commit(&token).await {
        Ok(_context) => {
            state.metrics.lease_operation("commit", "ok");
            state.refresh_lease_gauge().await;
            reply::ok()
        }
        Err(err) => {
            state.metrics.lease_operation("commit", err.reason_code());
            state.refresh_lease_gauge().await;
            reply::failure(&err)
        }
    }
}

/// `DELETE /api/v1/leases/{token}` — drop a lease. Idempotent.
pub async fn drop_lease(
    State(state): State<Arc<GatewayState>>,
    Path(token): Path<String>,
) -> Response {
    match state.manager.release(&token).await {
        Ok(()) => {
            state.metrics.lease_operation("drop", "ok");
            state.refresh_lease_gauge().await;
            reply::ok()
        }
        Err(err) => {
            state.metrics.lease_operation("drop", err.reason_code());
            reply::failure(&err)
        }
    }
}
