//! Read-only configuration introspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::{GatewayState, reply};

/// `GET /api/v1/repos` — the configured repository names.
pub async fn list_repos(State(state): State<Arc<GatewayState>>) -> Response {
    let names: Vec<&str> = state
        .access
        .repos()
        .iter()
        .map(|repo| repo.name.as_str())
        .collect();
    Json(json!({ "status": "ok", "repos": names })).into_response()
}

/// `GET /api/v1/repos/{name}` — one repository and its authorized keys.
pub async fn get_repo(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Response {
    match state.access.repo(&name) {
        Some(repo) => Json(json!({ "status": "ok", "repo": repo })).into_response(),
        None => reply::business_error("unknown_repo"),
    }
}
