//! API key CRUD (Metadata Store C3, spec.md §3). `key_hash` is globally
//! unique — callers hash the raw key with [`nova_core::sha256_hex`] before
//! it ever reaches this layer.

use chrono::{DateTime, Utc};
use nova_core::{NovaError, Result, TenantScope};
use serde_json::Value as Json;
use tracing::instrument;

use crate::{ApiKey, Store};

impl Store {
    /// Upsert an API key on `(tenant_id, namespace, name)`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, key_hash, permissions_json))]
    pub async fn save_api_key(
        &self,
        scope: &TenantScope,
        name: &str,
        key_hash: &str,
        tier: &str,
        expires_at: Option<DateTime<Utc>>,
        permissions_json: &Json,
    ) -> Result<ApiKey> {
        sqlx::query_as(
            "INSERT INTO api_keys (tenant_id, namespace, name, key_hash, tier, expires_at, permissions_json)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant_id, namespace, name) DO UPDATE SET
                key_hash = EXCLUDED.key_hash,
                tier = EXCLUDED.tier,
                expires_at = EXCLUDED.expires_at,
                permissions_json = EXCLUDED.permissions_json,
                updated_at = now()
             RETURNING tenant_id, namespace, name, key_hash, tier, enabled, expires_at,
                       permissions_json, created_at, updated_at",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .bind(key_hash)
        .bind(tier)
        .bind(expires_at)
        .bind(permissions_json)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("save_api_key", "api_key", e))
    }

    /// Look up an API key by its globally-unique hash, unscoped (the hash
    /// alone identifies the key; the caller resolves scope from the
    /// returned row).
    #[instrument(skip(self, key_hash))]
    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<ApiKey> {
        sqlx::query_as(
            "SELECT tenant_id, namespace, name, key_hash, tier, enabled, expires_at,
                    permissions_json, created_at, updated_at
             FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_api_key_by_hash", "api_key", e))?
        .ok_or_else(|| NovaError::not_found("api_key", key_hash))
    }

    /// Disable an API key without deleting it.
    #[instrument(skip(self))]
    pub async fn disable_api_key(&self, scope: &TenantScope, name: &str) -> Result<ApiKey> {
        sqlx::query_as(
            "UPDATE api_keys SET enabled = false, updated_at = now()
             WHERE tenant_id = $1 AND namespace = $2 AND name = $3
             RETURNING tenant_id, namespace, name, key_hash, tier, enabled, expires_at,
                       permissions_json, created_at, updated_at",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("disable_api_key", "api_key", e))?
        .ok_or_else(|| NovaError::not_found("api_key", name))
    }

    /// List every API key in scope.
    #[instrument(skip(self))]
    pub async fn list_api_keys(&self, scope: &TenantScope) -> Result<Vec<ApiKey>> {
        sqlx::query_as(
            "SELECT tenant_id, namespace, name, key_hash, tier, enabled, expires_at,
                    permissions_json, created_at, updated_at
             FROM api_keys WHERE tenant_id = $1 AND namespace = $2 ORDER BY name",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_api_keys", "api_key", e))
    }

    /// Delete an API key, scoped.
    #[instrument(skip(self))]
    pub async fn delete_api_key(&self, scope: &TenantScope, name: &str) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM api_keys WHERE tenant_id = $1 AND namespace = $2 AND name = $3",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(name)
        .execute(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("delete_api_key", "api_key", e))?
        .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("api_key", name));
        }
        Ok(())
    }
}
