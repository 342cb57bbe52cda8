//! Secret CRUD (Metadata Store C3, spec.md §3). Values are opaque
//! ciphertext to this layer — no encryption or decryption happens here.

use nova_core::{NovaError, Result, TenantScope};
use tracing::instrument;

use crate::{Secret, Store};

impl Store {
    /// Upsert a secret on `(tenant_id, namespace, name)`.
    #[instrument(skip(self, value))]
    pub async fn save_secret(&self, scope: &TenantScope, name: &str, value: &str) -> Result<Secret> {
        if name.is_empty() {
            return Err(NovaError::validation("secret name must not be empty"));
        }
        sqlx::query_as(
            "INSERT INTO secrets (tenant_id, namespace, name, value)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tenant_id, namespace, name) DO UPDATE SET
                value = EXCLUDED.value, updated_at = now()
             RETURNING tenant_id, namespace, name, value, created_at, updated_at",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .bind(value)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("save_secret", "secret", e))
    }

    /// Fetch a secret by name, scoped.
    #[instrument(skip(self))]
    pub async fn get_secret(&self, scope: &TenantScope, name: &str) -> Result<Secret> {
        sqlx::query_as(
            "SELECT tenant_id, namespace, name, value, created_at, updated_at
             FROM secrets WHERE tenant_id = $1 AND namespace = $2 AND name = $3",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_secret", "secret", e))?
        .ok_or_else(|| NovaError::not_found("secret", name))
    }

    /// List every secret in scope, ordered by name.
    #[instrument(skip(self))]
    pub async fn list_secrets(&self, scope: &TenantScope) -> Result<Vec<Secret>> {
        sqlx::query_as(
            "SELECT tenant_id, namespace, name, value, created_at, updated_at
             FROM secrets WHERE tenant_id = $1 AND namespace = $2 ORDER BY name",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_secrets", "secret", e))
    }

    /// Delete a secret, scoped.
    #[instrument(skip(self))]
    pub async fn delete_secret(&self, scope: &TenantScope, name: &str) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM secrets WHERE tenant_id = $1 AND namespace = $2 AND name = $3",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("delete_secret", "secret", e))?
        .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("secret", name));
        }
        Ok(())
    }
}
