//! Replicated lease store backed by a `hiqlite` (Raft-replicated `SQLite`)
//! cluster.
//!
//! Several gateway nodes can point at the same cluster; Raft consensus
//! makes each statement linearizable, so the conditional insert behaves
//! exactly as in the embedded backend. The SQL shape is shared with
//! [`super::SqliteLeaseStore`] — only placeholders and the driver differ.

use async_trait::async_trait;
use hiqlite::{Client, NodeConfig, params};
use treegate_core::lease::{Lease, PublicId};
use treegate_core::path::LeasePath;

use super::{LeaseStore, StoreError, lease_from_columns, sql};

const LEASE_COLUMNS: &str = "path, user_id, public_id, secret, acquired_at_ms";

/// Raw row shape coming back from the cluster.
#[derive(Debug, serde::Deserialize)]
struct LeaseRow {
    path: String,
    user_id: String,
    public_id: String,
    secret: String,
    acquired_at_ms: i64,
}

impl From<hiqlite::Row<'static>> for LeaseRow {
    fn from(mut row: hiqlite::Row<'static>) -> Self {
        Self {
            path: row.get("path"),
            user_id: row.get("user_id"),
            public_id: row.get("public_id"),
            secret: row.get("secret"),
            acquired_at_ms: row.get("acquired_at_ms"),
        }
    }
}

impl LeaseRow {
    fn into_lease(self) -> Result<Lease, StoreError> {
        lease_from_columns(
            &self.path,
            self.user_id,
            &self.public_id,
            &self.secret,
            self.acquired_at_ms,
        )
    }
}

/// Lease store on a Raft-replicated `SQLite` cluster.
#[derive(Clone)]
pub struct HiqliteLeaseStore {
    client: Client,
}

impl std::fmt::Debug for HiqliteLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiqliteLeaseStore").finish_non_exhaustive()
    }
}

impl HiqliteLeaseStore {
    /// Wraps an already-started cluster client and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the schema cannot be
    /// initialized.
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    /// Starts a cluster node from `HQL_*` environment configuration and
    /// joins (or forms) the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the node cannot start.
    pub async fn start_from_env() -> Result<Self, StoreError> {
        let config = NodeConfig::from_env();
        tracing::info!(
            node_id = config.node_id,
            nodes = config.nodes.len(),
            "starting replicated lease store node"
        );
        let client = hiqlite::start_node(config)
            .await
            .map_err(map_hiqlite_err)?;
        Self::new(client).await
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.client
            .execute(sql::CREATE_TABLE, params!())
            .await
            .map_err(map_hiqlite_err)?;
        Ok(())
    }

    /// Leaves the cluster gracefully. Skipping this forces a full Raft
    /// log replay on the next start.
    pub async fn shutdown(&self) {
        if let Err(err) = self.client.shutdown().await {
            tracing::warn!(error = %err, "replicated lease store shutdown failed");
        }
    }

    async fn query_leases(
        &self,
        query: String,
        params: Vec<hiqlite::Param>,
    ) -> Result<Vec<Lease>, StoreError> {
        let rows: Vec<LeaseRow> = self
            .client
            .query_as(query, params)
            .await
            .map_err(map_hiqlite_err)?;
        rows.into_iter().map(LeaseRow::into_lease).collect()
    }
}

#[async_trait]
impl LeaseStore for HiqliteLeaseStore {
    async fn get_by_path(&self, path: &LeasePath) -> Result<Option<Lease>, StoreError> {
        let query = format!("SELECT {LEASE_COLUMNS} FROM leases WHERE path = $1");
        Ok(self
            .query_leases(query, params!(path.as_str().to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn get_by_public(&self, public: &PublicId) -> Result<Option<Lease>, StoreError> {
        let query = format!("SELECT {LEASE_COLUMNS} FROM leases WHERE public_id = $1");
        Ok(self
            .query_leases(query, params!(public.as_str().to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn scan_overlapping(&self, path: &LeasePath) -> Result<Vec<Lease>, StoreError> {
        let query = format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE {}
             ORDER BY path ASC, acquired_at_ms ASC",
            sql::overlap_predicate("$1")
        );
        self.query_leases(query, params!(path.as_str().to_string()))
            .await
    }

    async fn insert(&self, lease: &Lease) -> Result<(), StoreError> {
        let statement = sql::insert_if_free("$1", ["$2", "$3", "$4", "$5"]);
        let acquired = i64::try_from(lease.acquired_at_ms).map_err(|_| {
            StoreError::Unavailable {
                reason: "acquisition timestamp out of range".to_string(),
            }
        })?;
        let changed = self
            .client
            .execute(
                statement,
                params!(
                    lease.path.as_str().to_string(),
                    lease.user_id.clone(),
                    lease.public.as_str().to_string(),
                    lease.secret.to_hex(),
                    acquired
                ),
            )
            .await
            .map_err(map_hiqlite_err)?;
        if changed == 0 {
            return Err(StoreError::Collision);
        }
        Ok(())
    }

    async fn delete(&self, path: &LeasePath) -> Result<(), StoreError> {
        self.client
            .execute(
                "DELETE FROM leases WHERE path = $1",
                params!(path.as_str().to_string()),
            )
            .await
            .map_err(map_hiqlite_err)?;
        Ok(())
    }

    async fn delete_exact(
        &self,
        path: &LeasePath,
        public: &PublicId,
    ) -> Result<(), StoreError> {
        self.client
            .execute(
                "DELETE FROM leases WHERE path = $1 AND public_id = $2",
                params!(path.as_str().to_string(), public.as_str().to_string()),
            )
            .await
            .map_err(map_hiqlite_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM leases", params!())
            .await
            .map_err(map_hiqlite_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Lease>, StoreError> {
        let query =
            format!("SELECT {LEASE_COLUMNS} FROM leases ORDER BY path ASC, acquired_at_ms ASC");
        self.query_leases(query, params!()).await
    }
}

/// The unique `public_id` index is the only constraint that can fire on a
/// well-formed insert; anything else is a cluster fault and retriable.
fn map_hiqlite_err(err: hiqlite::Error) -> StoreError {
    let reason = err.to_string();
    if reason.contains("UNIQUE constraint") {
        StoreError::Collision
    } else {
        StoreError::Unavailable { reason }
    }
}
