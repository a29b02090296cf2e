//! The lease arbitrator: lifecycle and overlap enforcement.
//!
//! [`LeaseManager`] sits between the handlers and the store. It owns no
//! lease state itself — the store is the single synchronization point —
//! and composes three pure pieces: path overlap, token minting, and the
//! derived expiry predicate.
//!
//! ```text
//! ∅ ──acquire──▶ ACTIVE ──release/commit──▶ ∅
//!                  │
//!                  └─(age ≥ max lease time,
//!                     observed by check/acquire)──▶ EXPIRED ──reap──▶ ∅
//! ```
//!
//! `EXPIRED` is never stored; it is a predicate over `now`. Expired rows
//! linger physically until the next operation touches their path, at which
//! point they are reaped.

use std::sync::Arc;
use std::time::Duration;

use treegate_core::clock::Clock;
use treegate_core::error::GatewayError;
use treegate_core::lease::{Lease, LeaseContext, PublicId};
use treegate_core::path::LeasePath;
use treegate_core::token::{self, SessionToken, TokenError};

use crate::store::{LeaseStore, StoreError};

/// Rounds of scan → reap → insert before conceding to contention. One
/// round suffices when a single expired lease shares the path; the extra
/// rounds absorb insert races with concurrent acquirers.
const MAX_ACQUIRE_ROUNDS: usize = 3;

/// A successful acquisition.
#[derive(Debug, Clone)]
pub struct Acquired {
    /// The new lease's public handle.
    pub public: PublicId,
    /// The minted session token the client presents on follow-ups.
    pub session_token: String,
}

/// Arbitrates lease acquisition, validation, and termination.
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    max_lease_time: Duration,
}

impl LeaseManager {
    /// Creates a manager over `store` with the given lease-age ceiling.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, max_lease_time: Duration) -> Self {
        Self {
            store,
            clock,
            max_lease_time,
        }
    }

    /// The configured lease-age ceiling in milliseconds.
    #[must_use]
    pub fn max_lease_time_ms(&self) -> u64 {
        u64::try_from(self.max_lease_time.as_millis()).unwrap_or(u64::MAX)
    }

    /// Acquires an exclusive lease on `path` for `user_id`.
    ///
    /// Scans for overlapping leases, reaps every expired one, and inserts
    /// the new grant; the store serializes the decisive insert, so two
    /// concurrent acquisitions of overlapping paths cannot both succeed.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::PathBusy`] with the conflicting lease's remaining
    ///   lifetime when a live overlap exists.
    /// - [`GatewayError::BackendUnavailable`] on transient store faults or
    ///   unresolved insert contention (both retriable).
    /// - [`GatewayError::Internal`] if the store reports two leases at one
    ///   path; the handler must not continue serving from that state.
    pub async fn acquire(&self, user_id: &str, path: LeasePath) -> Result<Acquired, GatewayError> {
        let max_ms = self.max_lease_time_ms();

        for _ in 0..MAX_ACQUIRE_ROUNDS {
            let now = self.clock.now_ms();
            let overlapping = self
                .store
                .scan_overlapping(&path)
                .await
                .map_err(store_fault)?;
            assert_unique_paths(&overlapping)?;

            if let Some(conflict) = select_conflict(&overlapping, &path, now, max_ms) {
                return Err(GatewayError::PathBusy {
                    remaining_ms: conflict.remaining_ms(now, max_ms),
                });
            }

            // Everything that overlaps is expired; drain it all before
            // inserting, not just the first hit, so several stale leases
            // cannot wrongly starve a fresh acquisition. The guarded
            // delete spares any lease a concurrent acquirer has already
            // put at the same path.
            for stale in &overlapping {
                tracing::debug!(path = %stale.path, public = %stale.public, "reaping expired lease");
                self.store
                    .delete_exact(&stale.path, &stale.public)
                    .await
                    .map_err(store_fault)?;
            }

            let lease = Lease::grant(path.clone(), user_id, now);
            match self.store.insert(&lease).await {
                Ok(()) => {
                    let session_token = token::mint(&lease.public, &lease.secret, max_ms, now);
                    tracing::info!(
                        path = %lease.path,
                        public = %lease.public,
                        user_id,
                        "lease granted"
                    );
                    return Ok(Acquired {
                        public: lease.public,
                        session_token,
                    });
                }
                // A concurrent acquirer won the insert; rescan to report
                // their lease's remaining time.
                Err(StoreError::Collision) => {}
                Err(err) => return Err(store_fault(err)),
            }
        }

        // Contention persisted through every round; report whoever holds
        // the path now, or let the client retry if nobody visibly does.
        let now = self.clock.now_ms();
        let overlapping = self
            .store
            .scan_overlapping(&path)
            .await
            .map_err(store_fault)?;
        match select_conflict(&overlapping, &path, now, self.max_lease_time_ms()) {
            Some(conflict) => Err(GatewayError::PathBusy {
                remaining_ms: conflict.remaining_ms(now, self.max_lease_time_ms()),
            }),
            None => Err(GatewayError::BackendUnavailable {
                reason: "acquire contention, retry".to_string(),
            }),
        }
    }

    /// Validates a session token and returns the live lease it binds to.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidLease`] for malformed tokens, MAC
    ///   mismatches, and tokens whose lease no longer exists.
    /// - [`GatewayError::LeaseExpired`] when the lease has aged out; the
    ///   row is reaped before reporting.
    /// - [`GatewayError::BackendUnavailable`] on transient store faults.
    pub async fn check(&self, raw_token: &str) -> Result<LeaseContext, GatewayError> {
        let session = SessionToken::decode(raw_token).map_err(|_| GatewayError::InvalidLease)?;
        let Some(lease) = self
            .store
            .get_by_public(session.lease_id())
            .await
            .map_err(store_fault)?
        else {
            return Err(GatewayError::InvalidLease);
        };

        let now = self.clock.now_ms();
        match session.verify(&lease.secret, now) {
            Ok(()) => {}
            Err(TokenError::Expired { .. }) => {
                self.reap(&lease).await?;
                return Err(GatewayError::LeaseExpired);
            }
            Err(_) => return Err(GatewayError::InvalidLease),
        }

        if lease.is_expired(now, self.max_lease_time_ms()) {
            self.reap(&lease).await?;
            return Err(GatewayError::LeaseExpired);
        }
        Ok(lease.context())
    }

    /// Drops the lease the token binds to. Idempotent: a token whose lease
    /// is already gone reports success.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidLease`] when the token itself does not
    ///   verify against the stored lease.
    /// - [`GatewayError::BackendUnavailable`] on transient store faults.
    pub async fn release(&self, raw_token: &str) -> Result<(), GatewayError> {
        let session = SessionToken::decode(raw_token).map_err(|_| GatewayError::InvalidLease)?;
        let Some(lease) = self
            .store
            .get_by_public(session.lease_id())
            .await
            .map_err(store_fault)?
        else {
            return Ok(());
        };

        session
            .verify(&lease.secret, self.clock.now_ms())
            .map_err(|_| GatewayError::InvalidLease)?;

        self.store
            .delete_exact(&lease.path, &lease.public)
            .await
            .map_err(store_fault)?;
        tracing::info!(path = %lease.path, public = %lease.public, "lease dropped");
        Ok(())
    }

    /// Finalizes a lease: the token must verify against a live lease,
    /// which is then removed.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`LeaseManager::check`].
    pub async fn commit(&self, raw_token: &str) -> Result<LeaseContext, GatewayError> {
        let context = self.check(raw_token).await?;
        self.store
            .delete_exact(&context.path, &context.public)
            .await
            .map_err(store_fault)?;
        tracing::info!(path = %context.path, public = %context.public, "lease committed");
        Ok(context)
    }

    /// Snapshot of all live leases. Expired rows that still exist
    /// physically are filtered out, never surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] on transient store
    /// faults.
    pub async fn list(&self) -> Result<Vec<LeaseContext>, GatewayError> {
        let now = self.clock.now_ms();
        let max_ms = self.max_lease_time_ms();
        let leases = self.store.list().await.map_err(store_fault)?;
        Ok(leases
            .iter()
            .filter(|lease| !lease.is_expired(now, max_ms))
            .map(Lease::context)
            .collect())
    }

    /// Removes all leases.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] on transient store
    /// faults.
    pub async fn clear(&self) -> Result<(), GatewayError> {
        self.store.clear().await.map_err(store_fault)
    }

    async fn reap(&self, lease: &Lease) -> Result<(), GatewayError> {
        tracing::warn!(path = %lease.path, public = %lease.public, "lease expired, reaping");
        self.store
            .delete_exact(&lease.path, &lease.public)
            .await
            .map_err(store_fault)
    }
}

/// Picks the lease a conflict is reported against: a live lease at exactly
/// the requested path wins, otherwise the first live overlap in the
/// store's deterministic order. Returns `None` when every overlap has
/// expired.
fn select_conflict<'a>(
    overlapping: &'a [Lease],
    path: &LeasePath,
    now_ms: u64,
    max_lease_time_ms: u64,
) -> Option<&'a Lease> {
    let mut live = overlapping
        .iter()
        .filter(|lease| !lease.is_expired(now_ms, max_lease_time_ms));
    let first = live.next()?;
    if first.path == *path {
        return Some(first);
    }
    live.find(|lease| lease.path == *path).or(Some(first))
}

/// The path column is the primary key, so two rows at one path mean the
/// backend has lost its constraints; refusing to continue is the only
/// safe answer.
fn assert_unique_paths(leases: &[Lease]) -> Result<(), GatewayError> {
    for pair in leases.windows(2) {
        if pair[0].path == pair[1].path {
            tracing::error!(path = %pair[0].path, "two leases stored at one path");
            return Err(GatewayError::Internal {
                reason: format!("two leases stored at path {}", pair[0].path),
            });
        }
    }
    Ok(())
}

fn store_fault(err: StoreError) -> GatewayError {
    match err {
        StoreError::Unavailable { reason } => GatewayError::BackendUnavailable { reason },
        StoreError::Collision => GatewayError::Internal {
            reason: "unexpected lease collision".to_string(),
        },
    }
}
