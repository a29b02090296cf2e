//! Payload ingest: binds a submission to a lease and verifies content.
//!
//! A submission carries a session token, the payload bytes, and the
//! base64-encoded SHA-1 the client claims for them. The pipeline is
//! strictly ordered: lease check first (no hashing work for unauthorized
//! callers), then the content hash, then the external sink. Sink failures
//! pass through to the client verbatim.
//!
//! The ingest layer is deliberately not idempotent; the sink deduplicates
//! by content hash, which the spool implementation gets for free from its
//! naming scheme.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;
use treegate_core::error::GatewayError;
use treegate_core::lease::LeaseContext;

use crate::manager::LeaseManager;

/// A sink rejection; the reason travels to the client unmodified.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct SinkError {
    /// The sink's own failure description.
    pub reason: String,
}

impl SinkError {
    /// Creates a sink error with the given client-visible reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Persists a verified payload into the content-addressed store.
///
/// Implementations must be safe for concurrent use; the gateway may push
/// payloads for unrelated leases in parallel.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Accepts one verified payload on behalf of `lease`.
    async fn receive(&self, lease: &LeaseContext, payload: Bytes) -> Result<(), SinkError>;
}

/// The authenticated submission pipeline.
pub struct PayloadIngest {
    manager: Arc<LeaseManager>,
    sink: Arc<dyn PayloadSink>,
}

impl PayloadIngest {
    /// Creates the pipeline over a lease manager and a sink.
    #[must_use]
    pub fn new(manager: Arc<LeaseManager>, sink: Arc<dyn PayloadSink>) -> Self {
        Self { manager, sink }
    }

    /// Accepts a payload for the lease bound to `session_token`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidLease`] / [`GatewayError::LeaseExpired`]
    ///   from the lease check.
    /// - [`GatewayError::InvalidPayloadHash`] when the declared SHA-1 does
    ///   not match the payload bytes (or does not decode).
    /// - [`GatewayError::SinkError`] carrying the sink's reason verbatim.
    pub async fn submit(
        &self,
        session_token: &str,
        payload: Bytes,
        declared_hash_b64: &str,
    ) -> Result<(), GatewayError> {
        let lease = self.manager.check(session_token).await?;

        let digest = Sha1::digest(&payload);
        let declared = STANDARD
            .decode(declared_hash_b64)
            .map_err(|_| GatewayError::InvalidPayloadHash)?;
        if !bool::from(digest.as_slice().ct_eq(&declared)) {
            tracing::warn!(
                path = %lease.path,
                public = %lease.public,
                "payload hash mismatch"
            );
            return Err(GatewayError::InvalidPayloadHash);
        }

        tracing::debug!(
            path = %lease.path,
            public = %lease.public,
            bytes = payload.len(),
            "payload verified, forwarding to sink"
        );
        self.sink
            .receive(&lease, payload)
            .await
            .map_err(|err| GatewayError::SinkError { reason: err.reason })
    }
}

/// Sink that spools verified payloads to a local directory, one file per
/// payload named by its SHA-1. Re-submitting identical content overwrites
/// the identical file, which is what makes the scheme deduplicating.
pub struct SpoolSink {
    dir: PathBuf,
}

impl SpoolSink {
    /// Creates the spool directory if needed and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the directory cannot be created.
    pub fn create(dir: PathBuf) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&dir)
            .map_err(|err| SinkError::new(format!("spool dir unavailable: {err}")))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl PayloadSink for SpoolSink {
    async fn receive(&self, lease: &LeaseContext, payload: Bytes) -> Result<(), SinkError> {
        let name = hex::encode(Sha1::digest(&payload));
        let target = self.dir.join(&name);
        tokio::fs::write(&target, &payload)
            .await
            .map_err(|err| SinkError::new(format!("spool write failed: {err}")))?;
        tracing::info!(
            path = %lease.path,
            object = %name,
            bytes = payload.len(),
            "payload spooled"
        );
        Ok(())
    }
}
