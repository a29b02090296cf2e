//! Prometheus metrics for gateway observability.
//!
//! Metric families:
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `treegate_leases_active` | Gauge | — |
//! | `treegate_lease_requests_total` | Counter | `operation`, `outcome` |
//! | `treegate_payload_submissions_total` | Counter | `outcome` |
//!
//! The metrics sink carries no semantic coupling: handlers record
//! outcomes, nothing reads them back. All types are safe for concurrent
//! use.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors from metrics registration or encoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetricsError {
    /// A collector could not be registered or encoded.
    #[error("metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// The gateway's metric families, backed by one registry.
pub struct GatewayMetrics {
    registry: Registry,
    leases_active: IntGauge,
    lease_requests: IntCounterVec,
    payload_submissions: IntCounterVec,
}

/// Shared handle to the gateway metrics.
pub type SharedMetrics = Arc<GatewayMetrics>;

impl GatewayMetrics {
    /// Creates and registers all metric families.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if a collector cannot be registered.
    pub fn new() -> Result<SharedMetrics, MetricsError> {
        let registry = Registry::new();

        let leases_active = IntGauge::with_opts(Opts::new(
            "treegate_leases_active",
            "Number of live leases",
        ))?;
        registry.register(Box::new(leases_active.clone()))?;

        let lease_requests = IntCounterVec::new(
            Opts::new(
                "treegate_lease_requests_total",
                "Lease operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(lease_requests.clone()))?;

        let payload_submissions = IntCounterVec::new(
            Opts::new(
                "treegate_payload_submissions_total",
                "Payload submissions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(payload_submissions.clone()))?;

        Ok(Arc::new(Self {
            registry,
            leases_active,
            lease_requests,
            payload_submissions,
        }))
    }

    /// Records a lease operation's outcome (`ok` or a reason code).
    pub fn lease_operation(&self, operation: &str, outcome: &str) {
        self.lease_requests
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Records a payload submission's outcome.
    pub fn payload_submission(&self, outcome: &str) {
        self.payload_submissions.with_label_values(&[outcome]).inc();
    }

    /// Sets the live-lease gauge to an absolute value.
    ///
    /// The gauge is always recomputed from a store snapshot rather than
    /// adjusted by deltas; expiry reaps happen inside the manager, so only
    /// the store knows the true live count.
    pub fn set_leases_active(&self, count: i64) {
        self.leases_active.set(count);
    }

    /// Encodes all families in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
