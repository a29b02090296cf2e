//! The transactional lease store.
//!
//! A mapping `path → Lease` with a secondary lookup by public ID, behind
//! one trait so the embedded ([`SqliteLeaseStore`]) and replicated
//! ([`HiqliteLeaseStore`]) backends are interchangeable via a
//! configuration toggle.
//!
//! Every operation is atomic; failures leave no partial state. The
//! decisive guarantee is on [`LeaseStore::insert`]: the overlap guard and
//! the row insertion execute as one statement, so two concurrent
//! acquisitions of overlapping paths serialize — exactly one insert
//! succeeds and the other observes a [`StoreError::Collision`]. This is
//! the gateway's only synchronization point; everything above it is
//! stateless or a pure wrapper.
//!
//! Both backends share the same SQL shape. The overlap predicate is spelled
//! with `substr`/`length` instead of `LIKE` so paths containing `%` or `_`
//! cannot defeat it, with explicit clauses for the root path `/` (which
//! overlaps everything).

mod hiqlite;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use treegate_core::lease::{Lease, LeaseSecret, PublicId};
use treegate_core::path::LeasePath;

pub use self::hiqlite::HiqliteLeaseStore;
pub use self::sqlite::SqliteLeaseStore;

/// Errors surfaced by store operations.
///
/// `Collision` and absent rows (`Option::None` on lookups) are
/// deterministic; only [`StoreError::Unavailable`] is retriable.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The insert conflicted with a live lease (overlapping path or
    /// colliding public ID).
    #[error("lease collides with an existing lease")]
    Collision,

    /// The backend is temporarily unreachable or returned a transient
    /// fault. The caller may retry.
    #[error("lease store unavailable: {reason}")]
    Unavailable {
        /// Backend-specific detail, for logs.
        reason: String,
    },
}

/// Transactional persistence of active leases.
///
/// Implementations must make every method atomic and linearizable per
/// path key space; see the module docs for the insert guarantee.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Returns the lease at exactly `path`, if any.
    async fn get_by_path(&self, path: &LeasePath) -> Result<Option<Lease>, StoreError>;

    /// Returns the lease with the given public ID, if any.
    async fn get_by_public(&self, public: &PublicId) -> Result<Option<Lease>, StoreError>;

    /// Returns every lease whose path overlaps `path`, ordered by path
    /// then acquisition time so conflict selection is deterministic.
    async fn scan_overlapping(&self, path: &LeasePath) -> Result<Vec<Lease>, StoreError>;

    /// Inserts `lease` iff no stored lease overlaps its path and the
    /// public ID is unused; the check and the insert are one transaction.
    async fn insert(&self, lease: &Lease) -> Result<(), StoreError>;

    /// Deletes the lease at `path`. Idempotent: deleting an absent path
    /// succeeds.
    async fn delete(&self, path: &LeasePath) -> Result<(), StoreError>;

    /// Deletes the lease at `path` only if it still carries `public`.
    /// Idempotent. Callers acting on a previously observed lease use this
    /// so a concurrent reap-and-regrant at the same path is left alone.
    async fn delete_exact(
        &self,
        path: &LeasePath,
        public: &PublicId,
    ) -> Result<(), StoreError>;

    /// Removes all leases.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Returns a snapshot of all leases.
    async fn list(&self) -> Result<Vec<Lease>, StoreError>;
}

/// Shared SQL fragments so both backends enforce the identical predicate.
/// `{p}` is the parameter holding the probe path.
pub(crate) mod sql {
    /// Schema for the single `leases` table. Primary key `path`, unique
    /// secondary index on `public_id`.
    pub const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS leases (
        path TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        public_id TEXT NOT NULL UNIQUE,
        secret TEXT NOT NULL,
        acquired_at_ms INTEGER NOT NULL
    )";

    /// Component-wise overlap between the stored `path` column and one
    /// bound parameter. Callers substitute the placeholder name.
    pub fn overlap_predicate(param: &str) -> String {
        format!(
            "path = {param}
             OR {param} = '/'
             OR path = '/'
             OR substr({param}, 1, length(path) + 1) = path || '/'
             OR substr(path, 1, length({param}) + 1) = {param} || '/'"
        )
    }

    /// Conditional insert: succeeds only when no stored lease overlaps.
    pub fn insert_if_free(param_path: &str, params_rest: [&str; 4]) -> String {
        let [user, public, secret, acquired] = params_rest;
        format!(
            "INSERT INTO leases (path, user_id, public_id, secret, acquired_at_ms)
             SELECT {param_path}, {user}, {public}, {secret}, {acquired}
             WHERE NOT EXISTS (
                 SELECT 1 FROM leases WHERE {}
             )",
            overlap_predicate(param_path)
        )
    }
}

/// Rebuilds a [`Lease`] from its stored column values.
///
/// Stored rows are always written from canonical values, so decode
/// failures indicate backend corruption and map to
/// [`StoreError::Unavailable`].
pub(crate) fn lease_from_columns(
    path: &str,
    user_id: String,
    public_id: &str,
    secret_hex: &str,
    acquired_at_ms: i64,
) -> Result<Lease, StoreError> {
    let corrupt = |what: &str| StoreError::Unavailable {
        reason: format!("corrupt lease row: {what}"),
    };
    Ok(Lease {
        path: LeasePath::parse(path).map_err(|_| corrupt("path"))?,
        user_id,
        public: PublicId::parse(public_id).map_err(|_| corrupt("public id"))?,
        secret: LeaseSecret::from_hex(secret_hex).map_err(|_| corrupt("secret"))?,
        acquired_at_ms: u64::try_from(acquired_at_ms).map_err(|_| corrupt("acquired_at_ms"))?,
    })
}

#[cfg(test)]
pub(crate) mod contract {
    //! Backend-independent contract suite. Each backend's tests call these
    //! against a fresh store so both uphold the same guarantees.

    use treegate_core::lease::Lease;
    use treegate_core::path::LeasePath;

    use super::{LeaseStore, StoreError};

    fn p(raw: &str) -> LeasePath {
        LeasePath::parse(raw).unwrap()
    }

    fn lease(path: &str, user: &str, at: u64) -> Lease {
        Lease::grant(p(path), user, at)
    }

    pub async fn lookups_round_trip(store: &dyn LeaseStore) {
        let granted = lease("/repo/a", "alice", 100);
        store.insert(&granted).await.unwrap();

        let by_path = store.get_by_path(&p("/repo/a")).await.unwrap().unwrap();
        assert_eq!(by_path.public, granted.public);
        assert_eq!(by_path.user_id, "alice");
        assert_eq!(by_path.acquired_at_ms, 100);
        assert_eq!(by_path.secret, granted.secret);

        let by_public = store.get_by_public(&granted.public).await.unwrap().unwrap();
        assert_eq!(by_public.path, granted.path);

        assert!(store.get_by_path(&p("/repo/b")).await.unwrap().is_none());
    }

    pub async fn insert_rejects_overlap(store: &dyn LeaseStore) {
        store.insert(&lease("/repo/a", "alice", 0)).await.unwrap();

        for conflicting in ["/repo/a", "/repo/a/b", "/repo", "/"] {
            let err = store
                .insert(&lease(conflicting, "bob", 1))
                .await
                .unwrap_err();
            assert!(
                matches!(err, StoreError::Collision),
                "expected collision for {conflicting}"
            );
        }

        // Disjoint paths and lookalike components are fine.
        store.insert(&lease("/repo/ab", "bob", 1)).await.unwrap();
        store.insert(&lease("/other", "bob", 1)).await.unwrap();
    }

    pub async fn root_lease_blocks_everything(store: &dyn LeaseStore) {
        store.insert(&lease("/", "alice", 0)).await.unwrap();
        let err = store.insert(&lease("/x", "bob", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Collision));
    }

    pub async fn scan_returns_overlaps_in_order(store: &dyn LeaseStore) {
        store.insert(&lease("/a/b", "u", 30)).await.unwrap();
        store.insert(&lease("/a/c", "u", 10)).await.unwrap();
        store.insert(&lease("/d", "u", 20)).await.unwrap();

        let hits = store.scan_overlapping(&p("/a")).await.unwrap();
        let paths: Vec<_> = hits.iter().map(|l| l.path.as_str().to_string()).collect();
        assert_eq!(paths, vec!["/a/b", "/a/c"]);

        let all = store.scan_overlapping(&p("/")).await.unwrap();
        assert_eq!(all.len(), 3);

        assert!(store.scan_overlapping(&p("/zzz")).await.unwrap().is_empty());
    }

    pub async fn delete_is_idempotent(store: &dyn LeaseStore) {
        store.insert(&lease("/a", "u", 0)).await.unwrap();
        store.delete(&p("/a")).await.unwrap();
        assert!(store.get_by_path(&p("/a")).await.unwrap().is_none());
        // Deleting again is fine.
        store.delete(&p("/a")).await.unwrap();
        // And the path can be leased again.
        store.insert(&lease("/a", "u", 1)).await.unwrap();
    }

    pub async fn delete_exact_spares_a_regranted_path(store: &dyn LeaseStore) {
        let old = lease("/a", "u", 0);
        store.insert(&old).await.unwrap();
        store.delete(&p("/a")).await.unwrap();
        let fresh = lease("/a", "v", 5);
        store.insert(&fresh).await.unwrap();

        // A deleter still holding the old lease must not touch the new one.
        store.delete_exact(&p("/a"), &old.public).await.unwrap();
        let current = store.get_by_path(&p("/a")).await.unwrap().unwrap();
        assert_eq!(current.public, fresh.public);

        // With the matching public the delete goes through.
        store.delete_exact(&p("/a"), &fresh.public).await.unwrap();
        assert!(store.get_by_path(&p("/a")).await.unwrap().is_none());
    }

    pub async fn clear_empties_the_store(store: &dyn LeaseStore) {
        store.insert(&lease("/a", "u", 0)).await.unwrap();
        store.insert(&lease("/b", "u", 0)).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
