//! Advisory Lock Primitive (C8): a named cross-process mutex backed by
//! Postgres advisory locks, independent of row locks (spec.md §4.8).

use nova_core::{NovaError, Result, advisory_lock_key};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

/// Acquires a transaction-scoped advisory lock on `name` against an
/// already-open transaction. The lock is held until the transaction commits
/// or rolls back — used by the Schema Manager and by destructive
/// multi-statement operations (e.g. tenant/namespace delete) that need to
/// serialize against concurrent mutators of the same name without holding
/// a session connection open past the transaction's lifetime.
pub async fn acquire_tx_lock(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<()> {
    let key = advisory_lock_key(name);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(|e| NovaError::from_sqlx("acquire_tx_lock", "lock", e))?;
    debug!(lock = name, key, "transaction-scoped advisory lock acquired");
    Ok(())
}

/// A session-scoped advisory lock: held across statements until explicitly
/// released. Used by marketplace install/uninstall serialization
/// (spec.md §4.3 `AcquireInstallLock`/`ReleaseInstallLock`).
///
/// Holds a single pooled connection for the lifetime of the lock — the
/// underlying Postgres advisory lock is session-scoped, so the same
/// physical connection must be used to acquire and release it.
///
/// `conn` is `Some` until [`SessionLock::release`] or `Drop` takes it; both
/// paths issue `pg_advisory_unlock` on the same connection before letting it
/// return to the pool, so the lock can never outlive this value.
pub struct SessionLock {
    conn: Option<sqlx::pool::PoolConnection<Postgres>>,
    key: i64,
    name: String,
}

impl SessionLock {
    /// Block until the named lock is acquired.
    pub async fn acquire(pool: &PgPool, name: &str) -> Result<Self> {
        let key = advisory_lock_key(name);
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| NovaError::from_sqlx("session lock: acquire connection", "lock", e))?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(|e| NovaError::from_sqlx("session lock: acquire", "lock", e))?;

        debug!(lock = name, key, "session-scoped advisory lock acquired");
        Ok(Self {
            conn: Some(conn),
            key,
            name: name.to_string(),
        })
    }

    /// Attempt to acquire the named lock without blocking. Returns
    /// [`NovaError::LockUnavailable`] if another session already holds it.
    pub async fn try_acquire(pool: &PgPool, name: &str) -> Result<Self> {
        let key = advisory_lock_key(name);
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| NovaError::from_sqlx("session lock: acquire connection", "lock", e))?;

        let got: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| NovaError::from_sqlx("session lock: try acquire", "lock", e))?;

        if !got {
            return Err(NovaError::lock_unavailable(name));
        }

        Ok(Self {
            conn: Some(conn),
            key,
            name: name.to_string(),
        })
    }

    /// Explicitly release the lock. Also runs, best-effort, on `Drop` if the
    /// caller never calls this — see the [`Drop`] impl below.
    pub async fn release(mut self) -> Result<()> {
        let mut conn = self
            .conn
            .take()
            .expect("conn is only taken by release/drop, both of which consume the lock");
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *conn)
            .await
            .map_err(|e| NovaError::from_sqlx("session lock: release", "lock", e))?;
        debug!(lock = %self.name, key = self.key, "session-scoped advisory lock released");
        Ok(())
    }
}

impl Drop for SessionLock {
    /// If the lock was never explicitly released (an error path between
    /// `acquire`/`try_acquire` and `release`, or the caller simply forgetting
    /// it), spawn a task to unlock on the same connection before it returns to
    /// the pool. `sqlx`'s own connection `Drop` only recycles the connection —
    /// it never issues `pg_advisory_unlock` — so without this the session
    /// keeps the lock for the rest of that connection's life in the pool.
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let key = self.key;
        let name = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .execute(&mut *conn)
                .await
            {
                warn!(lock = %name, key, error = %e, "failed to release advisory lock on drop");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_lock_and_schema_lock_keys_differ() {
        let install_key = advisory_lock_key("install:t1:ns1");
        assert_ne!(install_key, crate::schema::SCHEMA_LOCK_KEY);
    }
}
