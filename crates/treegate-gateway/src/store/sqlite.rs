//! Embedded lease store backed by a local `SQLite` file.
//!
//! Single-process, on-disk, crash-durable. WAL journaling keeps readers
//! cheap; `SQLite`'s own statement atomicity provides the one-writer
//! guarantee the contract requires. Statement execution is serialized
//! through an `Arc<Mutex<Connection>>`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, params};
use treegate_core::lease::{Lease, PublicId};
use treegate_core::path::LeasePath;

use super::{LeaseStore, StoreError, lease_from_columns, sql};

const LEASE_COLUMNS: &str = "path, user_id, public_id, secret, acquired_at_ms";

/// Lease store on a single local `SQLite` database.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLeaseStore").finish_non_exhaustive()
    }
}

impl SqliteLeaseStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened or
    /// the schema cannot be initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite_err)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(map_sqlite_err)?;
        Self::init_schema(&conn).map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a transient in-memory database; used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be
    /// created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::init_schema(&conn).map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates the `leases` table.
    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(sql::CREATE_TABLE, [])?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Unavailable {
            reason: "connection lock poisoned".to_string(),
        })
    }

    fn query_leases(
        conn: &Connection,
        query: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Lease>, StoreError> {
        let mut stmt = conn.prepare(query).map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(map_sqlite_err)?;

        let mut leases = Vec::new();
        for row in rows {
            let (path, user_id, public_id, secret, acquired_at_ms) =
                row.map_err(map_sqlite_err)?;
            leases.push(lease_from_columns(
                &path,
                user_id,
                &public_id,
                &secret,
                acquired_at_ms,
            )?);
        }
        Ok(leases)
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn get_by_path(&self, path: &LeasePath) -> Result<Option<Lease>, StoreError> {
        let conn = self.lock()?;
        let query = format!("SELECT {LEASE_COLUMNS} FROM leases WHERE path = ?1");
        Ok(Self::query_leases(&conn, &query, params![path.as_str()])?
            .into_iter()
            .next())
    }

    async fn get_by_public(&self, public: &PublicId) -> Result<Option<Lease>, StoreError> {
        let conn = self.lock()?;
        let query = format!("SELECT {LEASE_COLUMNS} FROM leases WHERE public_id = ?1");
        Ok(Self::query_leases(&conn, &query, params![public.as_str()])?
            .into_iter()
            .next())
    }

    async fn scan_overlapping(&self, path: &LeasePath) -> Result<Vec<Lease>, StoreError> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {LEASE_COLUMNS} FROM leases WHERE {}
             ORDER BY path ASC, acquired_at_ms ASC",
            sql::overlap_predicate("?1")
        );
        Self::query_leases(&conn, &query, params![path.as_str()])
    }

    async fn insert(&self, lease: &Lease) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let statement = sql::insert_if_free("?1", ["?2", "?3", "?4", "?5"]);
        let acquired = i64::try_from(lease.acquired_at_ms).map_err(|_| {
            StoreError::Unavailable {
                reason: "acquisition timestamp out of range".to_string(),
            }
        })?;
        let changed = conn
            .execute(
                &statement,
                params![
                    lease.path.as_str(),
                    lease.user_id,
                    lease.public.as_str(),
                    lease.secret.to_hex(),
                    acquired,
                ],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::Collision);
        }
        Ok(())
    }

    async fn delete(&self, path: &LeasePath) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM leases WHERE path = ?1", params![path.as_str()])
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn delete_exact(
        &self,
        path: &LeasePath,
        public: &PublicId,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM leases WHERE path = ?1 AND public_id = ?2",
            params![path.as_str(), public.as_str()],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM leases", [])
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Lease>, StoreError> {
        let conn = self.lock()?;
        let query =
            format!("SELECT {LEASE_COLUMNS} FROM leases ORDER BY path ASC, acquired_at_ms ASC");
        Self::query_leases(&conn, &query, [])
    }
}

/// Constraint violations (the unique `public_id` index) are collisions;
/// everything else is a transient backend fault.
fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Collision
        }
        _ => StoreError::Unavailable {
            reason: err.to_string(),
        },
    }
}
