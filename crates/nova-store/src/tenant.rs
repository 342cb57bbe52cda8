//! Tenant and namespace CRUD, part of the Metadata Store (C3, spec.md §4.3).

use nova_core::{DEFAULT_NAMESPACE, DEFAULT_TENANT, NovaError, Result};
use tracing::instrument;

use crate::{Namespace, Store, Tenant};

/// Entity kinds checked before a tenant/namespace delete is permitted
/// (spec.md §4.3: "refuses when any of `{functions, ... schedules}` still
/// has rows in that scope"). `async_invocations`, `event_topics`, and
/// `schedules` have no corresponding table in this core — out of scope
/// per §1 — so only the tables this core owns are checked.
const DEPENDENT_TABLES: &[&str] = &[
    "functions",
    "dag_workflows",
    "api_keys",
    "secrets",
];

impl Store {
    /// Create a tenant and seed its default namespace in one transaction
    /// (spec.md §4.3 `CreateTenant`).
    #[instrument(skip(self))]
    pub async fn create_tenant(&self, id: &str, name: &str, tier: &str) -> Result<Tenant> {
        if !nova_core::is_valid_scope_part(id) {
            return Err(NovaError::validation(format!("invalid tenant id: {id}")));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("create_tenant: begin", "tenant", e))?;

        let tenant: Tenant = sqlx::query_as(
            "INSERT INTO tenants (id, name, status, tier) VALUES ($1, $2, 'active', $3)
             RETURNING id, name, status, tier, created_at, updated_at",
        )
        .bind(id)
        .bind(name)
        .bind(tier)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("create_tenant: insert", "tenant", e))?;

        sqlx::query("INSERT INTO namespaces (id, tenant_id, name) VALUES ($1, $2, $3)")
            .bind(format!("{id}/{DEFAULT_NAMESPACE}"))
            .bind(id)
            .bind(DEFAULT_NAMESPACE)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("create_tenant: seed namespace", "namespace", e))?;

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("create_tenant: commit", "tenant", e))?;

        Ok(tenant)
    }

    /// Fetch a tenant by id.
    #[instrument(skip(self))]
    pub async fn get_tenant(&self, id: &str) -> Result<Tenant> {
        sqlx::query_as("SELECT id, name, status, tier, created_at, updated_at FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("get_tenant", "tenant", e))?
            .ok_or_else(|| NovaError::not_found("tenant", id))
    }

    /// Create a namespace under an existing tenant.
    #[instrument(skip(self))]
    pub async fn create_namespace(&self, tenant_id: &str, name: &str) -> Result<Namespace> {
        if !nova_core::is_valid_scope_part(name) {
            return Err(NovaError::validation(format!("invalid namespace name: {name}")));
        }
        sqlx::query_as(
            "INSERT INTO namespaces (id, tenant_id, name) VALUES ($1, $2, $3)
             RETURNING id, tenant_id, name, created_at",
        )
        .bind(format!("{tenant_id}/{name}"))
        .bind(tenant_id)
        .bind(name)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_namespace", "namespace", e))
    }

    /// List every namespace owned by `tenant_id`.
    #[instrument(skip(self))]
    pub async fn list_namespaces(&self, tenant_id: &str) -> Result<Vec<Namespace>> {
        sqlx::query_as("SELECT id, tenant_id, name, created_at FROM namespaces WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("list_namespaces", "namespace", e))
    }

    /// Delete a tenant, refusing if it is `default` or owns dependent
    /// resources in any namespace.
    #[instrument(skip(self))]
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        if id == DEFAULT_TENANT {
            return Err(NovaError::in_use("tenant", "the default tenant cannot be deleted"));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("delete_tenant: begin", "tenant", e))?;

        crate::lock::acquire_tx_lock(&mut tx, &format!("tenant-delete:{id}")).await?;

        for table in DEPENDENT_TABLES {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT count(*) FROM {table} WHERE tenant_id = $1"
            ))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_tenant: dependency check", "tenant", e))?;

            if count > 0 {
                return Err(NovaError::in_use(
                    "tenant",
                    format!("{count} row(s) remain in {table}"),
                ));
            }
        }

        sqlx::query("DELETE FROM namespaces WHERE tenant_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_tenant: namespaces", "tenant", e))?;

        let deleted = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_tenant: tenant row", "tenant", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("tenant", id));
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("delete_tenant: commit", "tenant", e))?;
        Ok(())
    }

    /// Delete a namespace, refusing if it is the tenant's last namespace or
    /// owns dependent resources.
    #[instrument(skip(self))]
    pub async fn delete_namespace(&self, tenant_id: &str, name: &str) -> Result<()> {
        if tenant_id == DEFAULT_TENANT && name == DEFAULT_NAMESPACE {
            return Err(NovaError::in_use(
                "namespace",
                "the default namespace cannot be deleted",
            ));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("delete_namespace: begin", "namespace", e))?;

        crate::lock::acquire_tx_lock(&mut tx, &format!("namespace-delete:{tenant_id}:{name}")).await?;

        let namespace_count: i64 = sqlx::query_scalar("SELECT count(*) FROM namespaces WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_namespace: count", "namespace", e))?;

        if namespace_count <= 1 {
            return Err(NovaError::in_use(
                "namespace",
                "cannot delete a tenant's last namespace",
            ));
        }

        for table in DEPENDENT_TABLES {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT count(*) FROM {table} WHERE tenant_id = $1 AND namespace = $2"
            ))
            .bind(tenant_id)
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_namespace: dependency check", "namespace", e))?;

            if count > 0 {
                return Err(NovaError::in_use(
                    "namespace",
                    format!("{count} row(s) remain in {table}"),
                ));
            }
        }

        let deleted = sqlx::query("DELETE FROM namespaces WHERE tenant_id = $1 AND name = $2")
            .bind(tenant_id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("delete_namespace: row", "namespace", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("namespace", name));
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("delete_namespace: commit", "namespace", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependent_tables_cover_core_owned_entities() {
        assert!(DEPENDENT_TABLES.contains(&"functions"));
        assert!(DEPENDENT_TABLES.contains(&"dag_workflows"));
    }
}
