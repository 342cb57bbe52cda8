//! DAG Workflow Engine (C5, spec.md §4.5): version/node/edge definitions
//! with cycle detection, run creation, ready-node leasing, dependency
//! propagation, and attempt bookkeeping.

use std::collections::HashMap;

use chrono::Duration as ChronoDuration;
use nova_core::{NovaError, Result, TenantScope};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value as Json;
use tracing::instrument;

use crate::{DagEdge, DagNode, DagRun, DagRunNode, DagWorkflow, DagWorkflowVersion, Store};

/// One node in a version's definition, as supplied by the caller before
/// ids are assigned.
#[derive(Debug, Clone)]
pub struct NodeDef {
    pub node_key: String,
    pub function_name: String,
    pub input_mapping: Json,
    pub retry_policy: Json,
    pub timeout_s: i32,
}

/// One directed edge between two `node_key`s in the same version.
#[derive(Debug, Clone)]
pub struct EdgeDef {
    pub from_key: String,
    pub to_key: String,
}

/// Result of creating a run: the run row plus its initial run-node rows,
/// already reflecting indegree-derived `pending`/`ready` status (spec.md
/// §4.5 "Run creation").
#[derive(Debug, Clone)]
pub struct RunCreation {
    pub run: DagRun,
    pub nodes: Vec<DagRunNode>,
}

/// Outcome of one [`Store::acquire_ready_node`] call. `node` is `None`
/// when no ready or lease-expired node was available — a normal outcome,
/// never an error (spec.md §7).
#[derive(Debug, Clone)]
pub struct AcquireReadyNode {
    pub node: Option<DagRunNode>,
}

/// Outcome of [`Store::decrement_deps`]: the `node_key`s that transitioned
/// from `pending` to `ready` as a result.
#[derive(Debug, Clone)]
pub struct DependencyPropagation {
    pub promoted: Vec<String>,
}

/// Checks a node/edge set for cycles before it is persisted (spec.md §9:
/// "cycle detection is a pre-check at version-creation time"). Returns
/// the nodes in a valid topological order.
fn check_acyclic(nodes: &[NodeDef], edges: &[EdgeDef]) -> Result<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index_of = HashMap::new();

    for n in nodes {
        let idx = graph.add_node(n.node_key.as_str());
        index_of.insert(n.node_key.as_str(), idx);
    }

    for e in edges {
        let from = *index_of
            .get(e.from_key.as_str())
            .ok_or_else(|| NovaError::validation(format!("unknown edge endpoint: {}", e.from_key)))?;
        let to = *index_of
            .get(e.to_key.as_str())
            .ok_or_else(|| NovaError::validation(format!("unknown edge endpoint: {}", e.to_key)))?;
        graph.add_edge(from, to, ());
    }

    let order = toposort(&graph, None)
        .map_err(|_| NovaError::validation("workflow graph contains a cycle"))?;

    Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect())
}

impl Store {
    /// Create a workflow definition shell (no version yet).
    #[instrument(skip(self))]
    pub async fn create_workflow(
        &self,
        scope: &TenantScope,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<DagWorkflow> {
        sqlx::query_as(
            "INSERT INTO dag_workflows (id, tenant_id, namespace, name, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, tenant_id, namespace, name, description, status, current_version, created_at, updated_at",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .bind(description)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_workflow", "dag_workflow", e))
    }

    /// Define a new version: validates the graph is acyclic, then persists
    /// the version, its nodes, and its edges in one transaction, and bumps
    /// `dag_workflows.current_version` (spec.md §4.5 "Definition model").
    #[instrument(skip(self, nodes, edges))]
    pub async fn define_workflow_version(
        &self,
        workflow_id: &str,
        version: i32,
        nodes: Vec<NodeDef>,
        edges: Vec<EdgeDef>,
    ) -> Result<DagWorkflowVersion> {
        check_acyclic(&nodes, &edges)?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("define_workflow_version: begin", "dag_workflow_version", e))?;

        let version_row: DagWorkflowVersion = sqlx::query_as(
            "INSERT INTO dag_workflow_versions (id, workflow_id, version, definition_json)
             VALUES ($1, $2, $3, $4)
             RETURNING id, workflow_id, version, definition_json, created_at",
        )
        .bind(format!("{workflow_id}/v{version}"))
        .bind(workflow_id)
        .bind(version)
        .bind(Json::Null)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("define_workflow_version: insert version", "dag_workflow_version", e))?;

        let mut node_ids: HashMap<String, String> = HashMap::new();
        for (position, node) in nodes.iter().enumerate() {
            let node_id = format!("{}/{}", version_row.id, node.node_key);
            sqlx::query(
                "INSERT INTO dag_nodes
                    (id, version_id, node_key, function_name, input_mapping, retry_policy, timeout_s, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&node_id)
            .bind(&version_row.id)
            .bind(&node.node_key)
            .bind(&node.function_name)
            .bind(&node.input_mapping)
            .bind(&node.retry_policy)
            .bind(node.timeout_s)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("define_workflow_version: insert node", "dag_node", e))?;
            node_ids.insert(node.node_key.clone(), node_id);
        }

        for edge in &edges {
            let from_id = node_ids
                .get(&edge.from_key)
                .ok_or_else(|| NovaError::validation(format!("unknown edge endpoint: {}", edge.from_key)))?;
            let to_id = node_ids
                .get(&edge.to_key)
                .ok_or_else(|| NovaError::validation(format!("unknown edge endpoint: {}", edge.to_key)))?;
            sqlx::query(
                "INSERT INTO dag_edges (id, version_id, from_node_id, to_node_id) VALUES ($1, $2, $3, $4)",
            )
            .bind(format!("{}/{}->{}", version_row.id, edge.from_key, edge.to_key))
            .bind(&version_row.id)
            .bind(from_id)
            .bind(to_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("define_workflow_version: insert edge", "dag_edge", e))?;
        }

        sqlx::query("UPDATE dag_workflows SET current_version = $2, updated_at = now() WHERE id = $1")
            .bind(workflow_id)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("define_workflow_version: bump current_version", "dag_workflow", e))?;

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("define_workflow_version: commit", "dag_workflow_version", e))?;

        Ok(version_row)
    }

    /// Create a run of a version: a `dag_runs` row plus one `dag_run_nodes`
    /// row per node, `unresolved_deps` seeded from graph indegree (spec.md
    /// §4.5 "Run creation", exercised by scenario 6).
    #[instrument(skip(self, input))]
    pub async fn create_run(
        &self,
        id: &str,
        workflow_id: &str,
        version_id: &str,
        trigger_type: &str,
        input: &Json,
    ) -> Result<RunCreation> {
        let nodes: Vec<DagNode> = sqlx::query_as(
            "SELECT id, version_id, node_key, function_name, input_mapping, retry_policy, timeout_s, position
             FROM dag_nodes WHERE version_id = $1",
        )
        .bind(version_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_run: load nodes", "dag_node", e))?;

        let edges: Vec<DagEdge> = sqlx::query_as(
            "SELECT id, version_id, from_node_id, to_node_id FROM dag_edges WHERE version_id = $1",
        )
        .bind(version_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_run: load edges", "dag_edge", e))?;

        let mut indegree: HashMap<&str, i32> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &edges {
            if let Some(d) = indegree.get_mut(edge.to_node_id.as_str()) {
                *d += 1;
            }
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("create_run: begin", "dag_run", e))?;

        let run: DagRun = sqlx::query_as(
            "INSERT INTO dag_runs (id, workflow_id, version_id, status, trigger_type, input, started_at)
             VALUES ($1, $2, $3, 'running', $4, $5, now())
             RETURNING id, workflow_id, version_id, status, trigger_type, input, output,
                       error_message, started_at, finished_at, created_at",
        )
        .bind(id)
        .bind(workflow_id)
        .bind(version_id)
        .bind(trigger_type)
        .bind(input)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("create_run: insert run", "dag_run", e))?;

        let mut run_nodes = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let deps = *indegree.get(node.id.as_str()).unwrap_or(&0);
            let status = if deps > 0 { "pending" } else { "ready" };
            let run_node: DagRunNode = sqlx::query_as(
                "INSERT INTO dag_run_nodes
                    (id, run_id, node_id, node_key, function_name, status, unresolved_deps, attempt)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
                 RETURNING id, run_id, node_id, node_key, function_name, status, unresolved_deps,
                           attempt, input, output, error_message, lease_owner, lease_expires_at,
                           started_at, finished_at, created_at",
            )
            .bind(format!("{}/{}", run.id, node.node_key))
            .bind(&run.id)
            .bind(&node.id)
            .bind(&node.node_key)
            .bind(&node.function_name)
            .bind(status)
            .bind(deps)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("create_run: insert run node", "dag_run_node", e))?;
            run_nodes.push(run_node);
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("create_run: commit", "dag_run", e))?;

        Ok(RunCreation { run, nodes: run_nodes })
    }

    /// The ready-node leasing hot path (spec.md §4.5): one round trip,
    /// `SELECT ... FOR UPDATE SKIP LOCKED` over nodes that are `ready` or
    /// `running` with an expired lease, claiming at most one. Exercised by
    /// P2 (claim atomicity) and scenario 4 (8 concurrent workers, exactly
    /// one wins).
    #[instrument(skip(self))]
    pub async fn acquire_ready_node(&self, owner: &str, lease_duration_secs: i64) -> Result<AcquireReadyNode> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("acquire_ready_node: begin", "dag_run_node", e))?;

        let now = self.clock().now();
        let lease_expires_at = now + ChronoDuration::seconds(lease_duration_secs);

        let node: Option<DagRunNode> = sqlx::query_as(
            "WITH candidate AS (
                SELECT rn.id
                FROM dag_run_nodes rn
                WHERE rn.status = 'ready'
                   OR (rn.status = 'running' AND rn.lease_expires_at < $1)
                ORDER BY rn.created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
             ),
             updated AS (
                UPDATE dag_run_nodes
                SET status = 'running',
                    lease_owner = $2,
                    lease_expires_at = $3,
                    started_at = $1,
                    attempt = attempt + 1
                WHERE id IN (SELECT id FROM candidate)
                RETURNING id, run_id, node_id, node_key, function_name, status, unresolved_deps,
                          attempt, input, output, error_message, lease_owner, lease_expires_at,
                          started_at, finished_at, created_at
             )
             SELECT * FROM updated",
        )
        .bind(now)
        .bind(owner)
        .bind(lease_expires_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("acquire_ready_node", "dag_run_node", e))?;

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("acquire_ready_node: commit", "dag_run_node", e))?;

        Ok(AcquireReadyNode { node })
    }

    /// Record one execution attempt of a run node.
    #[instrument(skip(self, input, output))]
    pub async fn record_node_attempt(
        &self,
        run_node_id: &str,
        attempt: i32,
        status: &str,
        input: Option<&Json>,
        output: Option<&Json>,
        error: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO dag_node_attempts
                (id, run_node_id, attempt, status, input, output, error, duration_ms, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now())
             ON CONFLICT (run_node_id, attempt) DO UPDATE SET
                status = EXCLUDED.status, output = EXCLUDED.output, error = EXCLUDED.error,
                duration_ms = EXCLUDED.duration_ms, finished_at = now()",
        )
        .bind(format!("{run_node_id}/{attempt}"))
        .bind(run_node_id)
        .bind(attempt)
        .bind(status)
        .bind(input)
        .bind(output)
        .bind(error)
        .bind(duration_ms)
        .execute(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("record_node_attempt", "dag_node_attempt", e))?;
        Ok(())
    }

    /// Mark a run node `succeeded` and set its output (spec.md §4.5 "Node
    /// completion", success branch). Never regresses a terminal status
    /// (I4): the `WHERE status NOT IN (...)` guard makes this a no-op if
    /// the node already reached a terminal state.
    #[instrument(skip(self, output))]
    pub async fn complete_run_node_success(&self, run_node_id: &str, output: &Json) -> Result<DagRunNode> {
        sqlx::query_as(
            "UPDATE dag_run_nodes
             SET status = 'succeeded', output = $2, finished_at = now(), lease_owner = NULL, lease_expires_at = NULL
             WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
             RETURNING id, run_id, node_id, node_key, function_name, status, unresolved_deps,
                       attempt, input, output, error_message, lease_owner, lease_expires_at,
                       started_at, finished_at, created_at",
        )
        .bind(run_node_id)
        .bind(output)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("complete_run_node_success", "dag_run_node", e))?
        .ok_or_else(|| NovaError::not_found("dag_run_node", run_node_id))
    }

    /// Release a run node back to `ready` after a failed attempt that is
    /// still within its retry budget (spec.md §4.5 "Node completion",
    /// retry branch).
    #[instrument(skip(self))]
    pub async fn retry_run_node(&self, run_node_id: &str, error_message: &str) -> Result<DagRunNode> {
        sqlx::query_as(
            "UPDATE dag_run_nodes
             SET status = 'ready', lease_owner = NULL, lease_expires_at = NULL, error_message = $2
             WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
             RETURNING id, run_id, node_id, node_key, function_name, status, unresolved_deps,
                       attempt, input, output, error_message, lease_owner, lease_expires_at,
                       started_at, finished_at, created_at",
        )
        .bind(run_node_id)
        .bind(error_message)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("retry_run_node", "dag_run_node", e))?
        .ok_or_else(|| NovaError::not_found("dag_run_node", run_node_id))
    }

    /// Mark a run node `failed` terminally, past its retry budget (spec.md
    /// §4.5 "Node completion", terminal-failure branch). Caller follows up
    /// with [`Store::update_run_status`] to fail the run.
    #[instrument(skip(self))]
    pub async fn fail_run_node(&self, run_node_id: &str, error_message: &str) -> Result<DagRunNode> {
        sqlx::query_as(
            "UPDATE dag_run_nodes
             SET status = 'failed', error_message = $2, finished_at = now(), lease_owner = NULL, lease_expires_at = NULL
             WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
             RETURNING id, run_id, node_id, node_key, function_name, status, unresolved_deps,
                       attempt, input, output, error_message, lease_owner, lease_expires_at,
                       started_at, finished_at, created_at",
        )
        .bind(run_node_id)
        .bind(error_message)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("fail_run_node", "dag_run_node", e))?
        .ok_or_else(|| NovaError::not_found("dag_run_node", run_node_id))
    }

    /// Decrement `unresolved_deps` for each successor `node_key`,
    /// promoting `pending → ready` when it reaches zero, in a single
    /// statement per key executed inside one transaction (spec.md §4.5
    /// "Node completion", `DecrementDeps`; scenario 6).
    #[instrument(skip(self, successor_keys))]
    pub async fn decrement_deps(&self, run_id: &str, successor_keys: &[String]) -> Result<DependencyPropagation> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("decrement_deps: begin", "dag_run_node", e))?;

        let mut promoted = Vec::new();
        for key in successor_keys {
            let row: Option<(String, i32)> = sqlx::query_as(
                "UPDATE dag_run_nodes
                 SET unresolved_deps = unresolved_deps - 1,
                     status = CASE WHEN unresolved_deps - 1 <= 0 AND status = 'pending' THEN 'ready' ELSE status END
                 WHERE run_id = $1 AND node_key = $2
                 RETURNING node_key, unresolved_deps",
            )
            .bind(run_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("decrement_deps: update", "dag_run_node", e))?;

            if let Some((node_key, remaining)) = row {
                if remaining <= 0 {
                    promoted.push(node_key);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("decrement_deps: commit", "dag_run_node", e))?;

        Ok(DependencyPropagation { promoted })
    }

    /// Advance a run's status. Only ever moves a run out of `running`
    /// (spec.md §4.5 "Run completion": "only advances from running").
    #[instrument(skip(self, error_message))]
    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<DagRun> {
        sqlx::query_as(
            "UPDATE dag_runs
             SET status = $2, error_message = COALESCE($3, error_message), finished_at = now()
             WHERE id = $1 AND status = 'running'
             RETURNING id, workflow_id, version_id, status, trigger_type, input, output,
                       error_message, started_at, finished_at, created_at",
        )
        .bind(run_id)
        .bind(status)
        .bind(error_message)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("update_run_status", "dag_run", e))?
        .ok_or_else(|| NovaError::not_found("dag_run", run_id))
    }

    /// `true` once every run node of `run_id` has reached `succeeded`.
    #[instrument(skip(self))]
    pub async fn run_is_complete(&self, run_id: &str) -> Result<bool> {
        let remaining: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM dag_run_nodes WHERE run_id = $1 AND status <> 'succeeded'",
        )
        .bind(run_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("run_is_complete", "dag_run_node", e))?;
        Ok(remaining == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str) -> NodeDef {
        NodeDef {
            node_key: key.to_string(),
            function_name: format!("fn-{key}"),
            input_mapping: Json::Null,
            retry_policy: Json::Null,
            timeout_s: 30,
        }
    }

    fn edge(from: &str, to: &str) -> EdgeDef {
        EdgeDef {
            from_key: from.to_string(),
            to_key: to.to_string(),
        }
    }

    #[test]
    fn accepts_a_linear_chain() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let order = check_acyclic(&nodes, &edges).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_a_cycle() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b"), edge("b", "a")];
        assert!(check_acyclic(&nodes, &edges).is_err());
    }

    #[test]
    fn rejects_an_edge_to_an_unknown_node() {
        let nodes = vec![node("a")];
        let edges = vec![edge("a", "ghost")];
        assert!(check_acyclic(&nodes, &edges).is_err());
    }

    #[test]
    fn accepts_a_diamond() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        assert!(check_acyclic(&nodes, &edges).is_ok());
    }
}
