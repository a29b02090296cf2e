//! Lease records: time-bounded exclusive write grants.
//!
//! A lease couples a repository subtree ([`LeasePath`]) with the identity
//! that acquired it and two generated values: a 128-bit `public` handle
//! used for lookups, and a 256-bit `secret` that signs the lease's session
//! tokens. Expiry is always derived from `acquired_at_ms` against a
//! configured maximum lease time; it is never stored.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::LeasePath;

/// Errors decoding a stored identifier or secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LeaseFieldError {
    /// The value was not valid hex of the expected length.
    #[error("invalid {field}: expected {expected_bytes} hex-encoded bytes")]
    InvalidHex {
        /// Which field failed to decode.
        field: &'static str,
        /// Expected decoded length in bytes.
        expected_bytes: usize,
    },
}

/// The lease's public handle: 128 random bits, hex-encoded.
///
/// Not secret, but unguessable; clients address commit/drop/submit requests
/// through the session token that embeds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicId(String);

impl PublicId {
    /// Number of random bytes behind a public ID.
    pub const LEN_BYTES: usize = 16;

    /// Generates a fresh random public ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; Self::LEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parses a stored hex form.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseFieldError::InvalidHex`] if `raw` is not 32 hex
    /// characters.
    pub fn parse(raw: &str) -> Result<Self, LeaseFieldError> {
        let decoded = hex::decode(raw).map_err(|_| LeaseFieldError::InvalidHex {
            field: "public id",
            expected_bytes: Self::LEN_BYTES,
        })?;
        if decoded.len() != Self::LEN_BYTES {
            return Err(LeaseFieldError::InvalidHex {
                field: "public id",
                expected_bytes: Self::LEN_BYTES,
            });
        }
        // Re-encode so the canonical form is always lowercase.
        Ok(Self(hex::encode(decoded)))
    }

    /// The hex string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The lease's token-signing key: 256 random bits.
///
/// Known only to the gateway and the acquiring client. `Debug` redacts the
/// value so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct LeaseSecret(Vec<u8>);

impl LeaseSecret {
    /// Number of random bytes in a lease secret.
    pub const LEN_BYTES: usize = 32;

    /// Generates a fresh random secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0_u8; Self::LEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Reconstructs a secret from its stored hex form.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseFieldError::InvalidHex`] if `raw` is not 64 hex
    /// characters.
    pub fn from_hex(raw: &str) -> Result<Self, LeaseFieldError> {
        let decoded = hex::decode(raw).map_err(|_| LeaseFieldError::InvalidHex {
            field: "lease secret",
            expected_bytes: Self::LEN_BYTES,
        })?;
        if decoded.len() != Self::LEN_BYTES {
            return Err(LeaseFieldError::InvalidHex {
                field: "lease secret",
                expected_bytes: Self::LEN_BYTES,
            });
        }
        Ok(Self(decoded))
    }

    /// Hex form for persistence.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Raw key bytes for MAC computation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for LeaseSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LeaseSecret(<redacted>)")
    }
}

/// Exclusive write ownership of one repository subtree.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The leased subtree, canonical form. Primary key in the store.
    pub path: LeasePath,
    /// Key ID of the acquirer, for audit.
    pub user_id: String,
    /// Random public handle, unique across live leases.
    pub public: PublicId,
    /// Token-signing key for this lease.
    pub secret: LeaseSecret,
    /// Acquisition time, milliseconds since the Unix epoch.
    pub acquired_at_ms: u64,
}

impl Lease {
    /// Creates a fresh lease grant with generated identifiers.
    #[must_use]
    pub fn grant(path: LeasePath, user_id: impl Into<String>, now_ms: u64) -> Self {
        Self {
            path,
            user_id: user_id.into(),
            public: PublicId::generate(),
            secret: LeaseSecret::generate(),
            acquired_at_ms: now_ms,
        }
    }

    /// The lease's age at `now_ms`, saturating at zero for clock skew.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.acquired_at_ms)
    }

    /// Derived expiry predicate: a lease aged `max_lease_time_ms` or more
    /// is expired and must never be surfaced to clients.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64, max_lease_time_ms: u64) -> bool {
        self.age_ms(now_ms) >= max_lease_time_ms
    }

    /// Milliseconds until this lease expires, zero if already expired.
    #[must_use]
    pub fn remaining_ms(&self, now_ms: u64, max_lease_time_ms: u64) -> u64 {
        max_lease_time_ms.saturating_sub(self.age_ms(now_ms))
    }

    /// The identity handed to payload sinks and audit logs. Carries no
    /// secret material.
    #[must_use]
    pub fn context(&self) -> LeaseContext {
        LeaseContext {
            path: self.path.clone(),
            user_id: self.user_id.clone(),
            public: self.public.clone(),
        }
    }
}

/// Secret-free view of a live lease, passed to external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseContext {
    /// The leased subtree.
    pub path: LeasePath,
    /// Key ID of the lease holder.
    pub user_id: String,
    /// The lease's public handle.
    pub public: PublicId,
}
