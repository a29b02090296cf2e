//! The gateway's closed error taxonomy.
//!
//! Every failure a client can observe maps onto one of these variants,
//! independent of the transport that carried the request. Handlers serialize
//! the [`reason code`](GatewayError::reason_code) into the JSON response
//! envelope; the HTTP layer decides status codes separately.
//!
//! Only [`GatewayError::BackendUnavailable`] is retriable, and only
//! [`GatewayError::Internal`] is fatal to the in-flight handler.

use thiserror::Error;

/// Errors reported by lease and payload operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The request signature is missing, malformed, references an unknown
    /// key, or does not match the signed material.
    #[error("request HMAC verification failed")]
    InvalidHmac,

    /// The request body is not valid JSON or misses a required field.
    #[error("invalid request body: {reason}")]
    InvalidBody {
        /// What was wrong with the body.
        reason: String,
    },

    /// The requested path overlaps a live lease held by someone else.
    #[error("path is busy for another {remaining_ms} ms")]
    PathBusy {
        /// Milliseconds until the conflicting lease expires.
        remaining_ms: u64,
    },

    /// No live lease matches the presented session token.
    #[error("no lease matches the presented token")]
    InvalidLease,

    /// The lease matching the token has aged out.
    #[error("lease has expired")]
    LeaseExpired,

    /// The declared payload hash does not match the payload content.
    #[error("payload hash mismatch")]
    InvalidPayloadHash,

    /// The payload sink rejected the submission; the reason is passed
    /// through to the client verbatim.
    #[error("payload sink error: {reason}")]
    SinkError {
        /// The sink's own failure description.
        reason: String,
    },

    /// The lease store is temporarily unreachable. Retriable.
    #[error("lease store unavailable: {reason}")]
    BackendUnavailable {
        /// Backend-specific detail, for logs.
        reason: String,
    },

    /// An internal invariant was violated. Fatal to the in-flight handler.
    #[error("internal invariant violation: {reason}")]
    Internal {
        /// Which invariant broke.
        reason: String,
    },
}

impl GatewayError {
    /// Returns the wire-level reason code for this error.
    ///
    /// Sink errors carry their own reason and are rendered from the variant
    /// payload instead; callers should special-case [`Self::SinkError`]
    /// when building a response.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidHmac => "invalid_hmac",
            Self::InvalidBody { .. } => "invalid_body",
            Self::PathBusy { .. } => "path_busy",
            Self::InvalidLease => "invalid_lease",
            Self::LeaseExpired => "lease_expired",
            Self::InvalidPayloadHash => "invalid_payload_hash",
            Self::SinkError { .. } => "sink_error",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns true if the caller may retry the operation unchanged.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Returns true if the error indicates a broken internal invariant.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}
