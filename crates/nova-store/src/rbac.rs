//! RBAC (C7, spec.md §4.7): roles, permissions, role-permission mappings,
//! and scoped role assignments.

use nova_core::{NovaError, Result};
use tracing::instrument;

use crate::{Permission, Role, RoleAssignment, Store};

impl Store {
    /// Create a tenant-scoped role.
    #[instrument(skip(self))]
    pub async fn create_role(&self, id: &str, tenant_id: &str, name: &str, is_system: bool) -> Result<Role> {
        sqlx::query_as(
            "INSERT INTO roles (id, tenant_id, name, is_system) VALUES ($1, $2, $3, $4)
             RETURNING id, tenant_id, name, is_system",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(name)
        .bind(is_system)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_role", "role", e))
    }

    /// Delete a role, refusing if it is a system role.
    #[instrument(skip(self))]
    pub async fn delete_role(&self, tenant_id: &str, id: &str) -> Result<()> {
        let is_system: Option<bool> =
            sqlx::query_scalar("SELECT is_system FROM roles WHERE id = $1 AND tenant_id = $2")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(self.pool())
                .await
                .map_err(|e| NovaError::from_sqlx("delete_role: lookup", "role", e))?;

        match is_system {
            None => return Err(NovaError::not_found("role", id)),
            Some(true) => return Err(NovaError::in_use("role", "system roles cannot be deleted")),
            Some(false) => {}
        }

        sqlx::query("DELETE FROM roles WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_role", "role", e))?;
        Ok(())
    }

    /// List every role owned by a tenant.
    #[instrument(skip(self))]
    pub async fn list_roles(&self, tenant_id: &str) -> Result<Vec<Role>> {
        sqlx::query_as("SELECT id, tenant_id, name, is_system FROM roles WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("list_roles", "role", e))
    }

    /// Register a global permission, by unique `code`.
    #[instrument(skip(self))]
    pub async fn create_permission(
        &self,
        id: &str,
        code: &str,
        resource_type: &str,
        action: &str,
    ) -> Result<Permission> {
        sqlx::query_as(
            "INSERT INTO permissions (id, code, resource_type, action) VALUES ($1, $2, $3, $4)
             RETURNING id, code, resource_type, action",
        )
        .bind(id)
        .bind(code)
        .bind(resource_type)
        .bind(action)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_permission", "permission", e))
    }

    /// Idempotently grant a permission to a role.
    #[instrument(skip(self))]
    pub async fn grant_permission(&self, role_id: &str, permission_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
             ON CONFLICT (role_id, permission_id) DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("grant_permission", "role_permission", e))?;
        Ok(())
    }

    /// Revoke a permission from a role.
    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, role_id: &str, permission_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id)
            .bind(permission_id)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("revoke_permission", "role_permission", e))?;
        Ok(())
    }

    /// Assign a role to a principal at a given scope.
    #[instrument(skip(self))]
    pub async fn assign_role(
        &self,
        id: &str,
        tenant_id: &str,
        principal_type: &str,
        principal_id: &str,
        role_id: &str,
        scope_type: &str,
        scope_id: &str,
    ) -> Result<RoleAssignment> {
        sqlx::query_as(
            "INSERT INTO role_assignments
                (id, tenant_id, principal_type, principal_id, role_id, scope_type, scope_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant_id, principal_type, principal_id, role_id, scope_type, scope_id)
             DO UPDATE SET id = role_assignments.id
             RETURNING id, tenant_id, principal_type, principal_id, role_id, scope_type, scope_id",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(principal_type)
        .bind(principal_id)
        .bind(role_id)
        .bind(scope_type)
        .bind(scope_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("assign_role", "role_assignment", e))
    }

    /// The set of effective permission codes for a principal at a scope:
    /// assignments joined through role-permissions to permissions.
    #[instrument(skip(self))]
    pub async fn effective_permissions(
        &self,
        tenant_id: &str,
        principal_type: &str,
        principal_id: &str,
        scope_type: &str,
        scope_id: &str,
    ) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT p.code
             FROM role_assignments ra
             JOIN role_permissions rp ON rp.role_id = ra.role_id
             JOIN permissions p ON p.id = rp.permission_id
             WHERE ra.tenant_id = $1 AND ra.principal_type = $2 AND ra.principal_id = $3
               AND ra.scope_type = $4 AND ra.scope_id = $5
             ORDER BY p.code",
        )
        .bind(tenant_id)
        .bind(principal_type)
        .bind(principal_id)
        .bind(scope_type)
        .bind(scope_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("effective_permissions", "role_assignment", e))
    }
}
