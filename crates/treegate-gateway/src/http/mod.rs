//! The gateway's HTTP surface.
//!
//! All publisher-facing routes live under [`API_ROOT`] behind the HMAC
//! authorization middleware; the Prometheus endpoint runs on its own
//! loopback listener in the binary. Handlers are thin: they parse the
//! envelope, call the lease manager or the ingest pipeline, and serialize
//! the result. Nothing in this layer holds mutable state across an await
//! other than the lease in the store.

pub mod authz;
mod leases;
mod payloads;
mod reply;
mod repos;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::access::AccessConfig;
use crate::ingest::PayloadIngest;
use crate::manager::LeaseManager;
use crate::metrics::SharedMetrics;

pub use authz::{RecombineBody, VerifiedKey};

/// Prefix of the publisher-facing API.
pub const API_ROOT: &str = "/api/v1";

/// Shared state behind every handler.
pub struct GatewayState {
    /// The lease arbitrator.
    pub manager: Arc<LeaseManager>,
    /// The payload submission pipeline.
    pub ingest: PayloadIngest,
    /// Repository and key configuration; answers secret lookups.
    pub access: Arc<AccessConfig>,
    /// Metrics sink.
    pub metrics: SharedMetrics,
}

impl GatewayState {
    /// Recomputes the live-lease gauge from the store.
    pub(crate) async fn refresh_lease_gauge(&self) {
        if let Ok(live) = self.manager.list().await {
            self.metrics
                .set_leases_active(i64::try_from(live.len()).unwrap_or(i64::MAX));
        }
    }
}

/// Builds the publisher-facing router under [`API_ROOT`].
///
/// The Prometheus endpoint is served from its own listener (see the
/// binary); publishers never see it.
pub fn router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route("/repos", get(repos::list_repos))
        .route("/repos/{name}", get(repos::get_repo))
        .route("/leases", post(leases::new_lease))
        .route(
            "/leases/{token}",
            post(leases::commit_lease).delete(leases::drop_lease),
        )
        .route("/payloads", post(payloads::legacy_submit))
        .route("/payloads/{token}", post(payloads::submit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authz::require_hmac,
        ))
        .with_state(state);

    Router::new().nest(API_ROOT, api)
}
