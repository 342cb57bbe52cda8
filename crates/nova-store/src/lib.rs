//! # Nova Store
//!
//! The transactional metadata store (C3) plus the coordination primitives
//! built atop it: the Schema Manager (C2), the token-bucket rate limiter
//! (C4), the DAG workflow engine (C5), RBAC (C7), and the advisory lock
//! primitive (C8). Every operation resolves a [`nova_core::TenantScope`]
//! (C1) and uses it as an implicit filter — the only isolation mechanism
//! in this core.

pub mod lock;
pub mod schema;

mod api_key;
mod cluster_node;
mod function;
mod marketplace;
mod notification;
mod ratelimit;
mod rbac;
mod secret;
mod tenant;
mod types;
mod workflow;

pub use types::*;
pub use workflow::{AcquireReadyNode, DependencyPropagation, RunCreation};

use std::sync::Arc;

use nova_core::{Clock, NovaError, Result, SystemClock};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// The metadata store handle. Cheap to clone (wraps a connection pool and
/// a clock behind `Arc`), shared across request handlers and workers.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Connect to the backing store, sizing the pool to
    /// `max_connections` (spec.md §6.4's `database_dsn` configuration
    /// surface).
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| NovaError::from_sqlx("connect", "store", e))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an already-constructed pool, using the system wall clock.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Wrap an already-constructed pool with an injected clock, for tests
    /// that need to control TTL/lease expiry without sleeping.
    #[must_use]
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Install (or re-validate) the schema. Safe to call from every
    /// concurrently starting process (spec.md §4.2).
    pub async fn install_schema(&self) -> Result<()> {
        schema::install(&self.pool).await
    }

    /// Borrow the underlying pool, for callers (tests, other crates) that
    /// need direct access.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The clock this store resolves `now()` from.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Shut the pool down. Further calls through this handle (or any
    /// clone) fail with [`NovaError::Transient`] — spec.md §5's
    /// "close shuts the pool and refuses further calls".
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// `true` once [`Store::close`] has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
