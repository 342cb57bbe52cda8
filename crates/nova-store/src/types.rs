//! Row types for every entity in the data model (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;

// --- Tenant / Namespace --------------------------------------------------

/// A top-level multi-tenancy boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub status: String,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A child namespace of exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Namespace {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// --- Function and children ------------------------------------------------

/// A deployed function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Function {
    pub id: String,
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    pub handler: String,
    pub runtime: String,
    pub memory_mb: i32,
    pub timeout_s: i32,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub mode: String,
    pub limits: Json,
    pub env_vars: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sparse patch applied by `UpdateFunction`. `None` fields are left
/// unchanged; `Some(None)` is not representable for scalar fields (they
/// simply aren't patched when absent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionPatch {
    pub handler: Option<String>,
    pub runtime: Option<String>,
    pub memory_mb: Option<i32>,
    pub timeout_s: Option<i32>,
    pub min_replicas: Option<i32>,
    pub max_replicas: Option<i32>,
    pub mode: Option<String>,
    pub limits: Option<Json>,
    /// New env vars. Combined with `merge_env_vars` (spec.md §4.3).
    pub env_vars: Option<Json>,
    /// When `true` and `env_vars` is `Some`, merge key-by-key into the
    /// existing map instead of replacing it wholesale.
    pub merge_env_vars: bool,
}

/// A published, immutable version of a function's definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FunctionVersion {
    pub id: String,
    pub function_id: String,
    pub version: i32,
    pub definition_blob: Json,
    pub created_at: DateTime<Utc>,
}

/// A named, mutable pointer at a function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FunctionAlias {
    pub function_id: String,
    pub name: String,
    pub definition_blob: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compilation status of a function's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileStatus {
    Pending,
    Success,
    Failed,
}

impl CompileStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CompileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// A function's source, compiled artifact, and compilation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FunctionCode {
    pub function_id: String,
    pub source: Option<Vec<u8>>,
    pub compiled_binary: Option<Vec<u8>>,
    pub source_hash: Option<String>,
    pub binary_hash: Option<String>,
    pub compile_status: String,
    pub compile_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single file in a function's fileset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FunctionFile {
    pub function_id: String,
    pub path: String,
    pub content: Vec<u8>,
    pub is_binary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Detects whether `content` looks binary: any zero byte in the first 512
/// bytes (spec.md §4.3, design note §9).
#[must_use]
pub fn is_binary_content(content: &[u8]) -> bool {
    content.iter().take(512).any(|&b| b == 0)
}

// --- API keys / secrets ---------------------------------------------------

/// A scoped API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    pub key_hash: String,
    pub tier: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions_json: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tenant-scoped secret. `value` is opaque ciphertext to this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Secret {
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Notifications ----------------------------------------------------------

/// Lifecycle status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }
}

/// A status filter for `ListNotifications`. `All` is a query-only value —
/// spec.md §9 notes it must never be persisted; [`NotificationStatus`]
/// (the persisted enum) has no `All` variant, so a write path can never
/// accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatusFilter {
    All,
    Only(NotificationStatus),
}

/// A platform notification surfaced to tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub tenant_id: String,
    pub namespace: String,
    pub r#type: String,
    pub severity: String,
    pub source: Option<String>,
    pub function_id: Option<String>,
    pub function_name: Option<String>,
    pub title: String,
    pub message: String,
    pub data_json: Json,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

// --- RBAC --------------------------------------------------------------

/// A tenant-scoped role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub is_system: bool,
}

/// A global permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: String,
    pub code: String,
    pub resource_type: String,
    pub action: String,
}

/// A principal's role grant at a given scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub id: String,
    pub tenant_id: String,
    pub principal_type: String,
    pub principal_id: String,
    pub role_id: String,
    pub scope_type: String,
    pub scope_id: String,
}

// --- Cluster nodes ------------------------------------------------------

/// A worker/executor node in the platform's cluster (global, not
/// tenant-scoped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClusterNode {
    pub id: String,
    pub state: String,
    pub active_vms: i32,
    pub queue_depth: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Marketplace ------------------------------------------------------

/// A marketplace application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MarketplaceApp {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A published release of a marketplace application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MarketplaceRelease {
    pub id: String,
    pub app_id: String,
    pub version: String,
    pub manifest_json: Json,
    pub created_at: DateTime<Utc>,
}

/// An installed marketplace application, keyed by
/// `(tenant_id, namespace, install_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MarketplaceInstallation {
    pub tenant_id: String,
    pub namespace: String,
    pub install_name: String,
    pub app_id: String,
    pub release_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A resource created as part of a marketplace installation. Carries a
/// `resource_type` discriminator plus an opaque JSON payload (design
/// note §9's polymorphism-by-tag pattern).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MarketplaceInstallationResource {
    pub tenant_id: String,
    pub namespace: String,
    pub install_name: String,
    pub resource_type: String,
    pub resource_id: String,
    pub data_json: Json,
}

/// An async install/uninstall job for a marketplace installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MarketplaceInstallJob {
    pub id: String,
    pub tenant_id: String,
    pub namespace: String,
    pub install_name: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Workflow definitions ------------------------------------------------

/// A workflow definition's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagWorkflow {
    pub id: String,
    pub tenant_id: String,
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub current_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable, versioned DAG definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagWorkflowVersion {
    pub id: String,
    pub workflow_id: String,
    pub version: i32,
    pub definition_json: Json,
    pub created_at: DateTime<Utc>,
}

/// A node in a workflow version's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagNode {
    pub id: String,
    pub version_id: String,
    pub node_key: String,
    pub function_name: String,
    pub input_mapping: Json,
    pub retry_policy: Json,
    pub timeout_s: i32,
    pub position: i32,
}

/// A directed edge between two nodes in the same version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagEdge {
    pub id: String,
    pub version_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
}

// --- Runs ------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for `succeeded`, `failed`, `cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A single execution of a workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagRun {
    pub id: String,
    pub workflow_id: String,
    pub version_id: String,
    pub status: String,
    pub trigger_type: String,
    pub input: Json,
    pub output: Option<Json>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a run node (spec.md §4.5's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunNodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
}

impl RunNodeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// `true` for `succeeded`, `failed` — never regressed from (I4).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One node's execution state within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagRunNode {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_key: String,
    pub function_name: String,
    pub status: String,
    pub unresolved_deps: i32,
    pub attempt: i32,
    pub input: Option<Json>,
    pub output: Option<Json>,
    pub error_message: Option<String>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A single attempt at executing a run node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DagNodeAttempt {
    pub id: String,
    pub run_node_id: String,
    pub attempt: i32,
    pub status: String,
    pub input: Option<Json>,
    pub output: Option<Json>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_binary_content_detects_zero_byte() {
        assert!(!is_binary_content(b"hello world"));
        assert!(is_binary_content(b"hello\0world"));
    }

    #[test]
    fn is_binary_content_only_checks_first_512_bytes() {
        let mut content = vec![b'a'; 600];
        content[550] = 0;
        assert!(!is_binary_content(&content));
    }

    #[test]
    fn compile_status_round_trips_through_str() {
        assert_eq!(CompileStatus::Pending.as_str(), "pending");
        assert_eq!(
            "success".parse::<CompileStatus>().unwrap(),
            CompileStatus::Success
        );
        assert!("bogus".parse::<CompileStatus>().is_err());
    }

    #[test]
    fn run_status_terminal() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn run_node_status_terminal() {
        assert!(RunNodeStatus::Succeeded.is_terminal());
        assert!(RunNodeStatus::Failed.is_terminal());
        assert!(!RunNodeStatus::Ready.is_terminal());
    }
}
