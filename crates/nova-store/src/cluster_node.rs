//! Cluster node CRUD (Metadata Store C3, spec.md §4.3). Cluster nodes are
//! not tenant-owned — they describe the platform's own worker fleet.

use nova_core::{NovaError, Result};
use tracing::instrument;

use crate::{ClusterNode, Store};

impl Store {
    /// Merge a cluster node record into place.
    #[instrument(skip(self))]
    pub async fn upsert_cluster_node(
        &self,
        id: &str,
        state: &str,
        active_vms: i32,
        queue_depth: i32,
    ) -> Result<ClusterNode> {
        sqlx::query_as(
            "INSERT INTO cluster_nodes (id, state, active_vms, queue_depth, last_heartbeat, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                active_vms = EXCLUDED.active_vms,
                queue_depth = EXCLUDED.queue_depth,
                last_heartbeat = now(),
                updated_at = now()
             RETURNING id, state, active_vms, queue_depth, last_heartbeat, created_at, updated_at",
        )
        .bind(id)
        .bind(state)
        .bind(active_vms)
        .bind(queue_depth)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("upsert_cluster_node", "cluster_node", e))
    }

    /// Touch just liveness fields, leaving `state` untouched.
    #[instrument(skip(self))]
    pub async fn update_cluster_node_heartbeat(
        &self,
        id: &str,
        active_vms: i32,
        queue_depth: i32,
    ) -> Result<ClusterNode> {
        sqlx::query_as(
            "UPDATE cluster_nodes SET active_vms = $2, queue_depth = $3, last_heartbeat = now(), updated_at = now()
             WHERE id = $1
             RETURNING id, state, active_vms, queue_depth, last_heartbeat, created_at, updated_at",
        )
        .bind(id)
        .bind(active_vms)
        .bind(queue_depth)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("update_cluster_node_heartbeat", "cluster_node", e))?
        .ok_or_else(|| NovaError::not_found("cluster_node", id))
    }

    /// List nodes with `state = 'active'`, most recently seen first.
    #[instrument(skip(self))]
    pub async fn list_active_cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        sqlx::query_as(
            "SELECT id, state, active_vms, queue_depth, last_heartbeat, created_at, updated_at
             FROM cluster_nodes WHERE state = 'active' ORDER BY last_heartbeat DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_active_cluster_nodes", "cluster_node", e))
    }
}
