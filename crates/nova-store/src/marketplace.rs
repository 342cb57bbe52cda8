//! Marketplace apps, releases, installations, installation resources, and
//! install jobs (Metadata Store C3, spec.md §4.3).

use nova_core::{NovaError, Result};
use serde_json::Value as Json;
use tracing::instrument;

use crate::lock::SessionLock;
use crate::{
    MarketplaceApp, MarketplaceInstallJob, MarketplaceInstallation, MarketplaceInstallationResource,
    MarketplaceRelease, Store,
};

impl Store {
    /// Register a marketplace app.
    #[instrument(skip(self))]
    pub async fn create_marketplace_app(&self, id: &str, name: &str, description: &str) -> Result<MarketplaceApp> {
        sqlx::query_as(
            "INSERT INTO marketplace_apps (id, name, description) VALUES ($1, $2, $3)
             RETURNING id, name, description, created_at, updated_at",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_marketplace_app", "marketplace_app", e))
    }

    /// Publish a release, unique per `(app_id, version)`.
    #[instrument(skip(self, manifest_json))]
    pub async fn publish_marketplace_release(
        &self,
        id: &str,
        app_id: &str,
        version: &str,
        manifest_json: &Json,
    ) -> Result<MarketplaceRelease> {
        sqlx::query_as(
            "INSERT INTO marketplace_releases (id, app_id, version, manifest_json)
             VALUES ($1, $2, $3, $4)
             RETURNING id, app_id, version, manifest_json, created_at",
        )
        .bind(id)
        .bind(app_id)
        .bind(version)
        .bind(manifest_json)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("publish_marketplace_release", "marketplace_release", e))
    }

    /// Acquire the install/uninstall serialization lock for
    /// `(tenant, namespace)`. Keyed by 64-bit truncated SHA-256 of
    /// `"install:{tenant}:{namespace}"` (spec.md §4.3).
    #[instrument(skip(self))]
    pub async fn acquire_install_lock(&self, tenant: &str, namespace: &str) -> Result<SessionLock> {
        SessionLock::acquire(self.pool(), &format!("install:{tenant}:{namespace}")).await
    }

    /// Release a lock obtained from [`Store::acquire_install_lock`].
    #[instrument(skip(self, lock))]
    pub async fn release_install_lock(&self, lock: SessionLock) -> Result<()> {
        lock.release().await
    }

    /// Upsert an installation, keyed by `(tenant_id, namespace, install_name)`.
    #[instrument(skip(self))]
    pub async fn upsert_installation(
        &self,
        tenant_id: &str,
        namespace: &str,
        install_name: &str,
        app_id: &str,
        release_id: &str,
        status: &str,
    ) -> Result<MarketplaceInstallation> {
        sqlx::query_as(
            "INSERT INTO marketplace_installations
                (tenant_id, namespace, install_name, app_id, release_id, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (tenant_id, namespace, install_name) DO UPDATE SET
                app_id = EXCLUDED.app_id,
                release_id = EXCLUDED.release_id,
                status = EXCLUDED.status,
                updated_at = now()
             RETURNING tenant_id, namespace, install_name, app_id, release_id, status, created_at, updated_at",
        )
        .bind(tenant_id)
        .bind(namespace)
        .bind(install_name)
        .bind(app_id)
        .bind(release_id)
        .bind(status)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("upsert_installation", "marketplace_installation", e))
    }

    /// Record a resource created by an installation.
    #[instrument(skip(self, data_json))]
    pub async fn add_installation_resource(
        &self,
        tenant_id: &str,
        namespace: &str,
        install_name: &str,
        resource_type: &str,
        resource_id: &str,
        data_json: &Json,
    ) -> Result<MarketplaceInstallationResource> {
        sqlx::query_as(
            "INSERT INTO marketplace_installation_resources
                (tenant_id, namespace, install_name, resource_type, resource_id, data_json)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING tenant_id, namespace, install_name, resource_type, resource_id, data_json",
        )
        .bind(tenant_id)
        .bind(namespace)
        .bind(install_name)
        .bind(resource_type)
        .bind(resource_id)
        .bind(data_json)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("add_installation_resource", "marketplace_installation_resource", e))
    }

    /// List every resource an installation created.
    #[instrument(skip(self))]
    pub async fn list_installation_resources(
        &self,
        tenant_id: &str,
        namespace: &str,
        install_name: &str,
    ) -> Result<Vec<MarketplaceInstallationResource>> {
        sqlx::query_as(
            "SELECT tenant_id, namespace, install_name, resource_type, resource_id, data_json
             FROM marketplace_installation_resources
             WHERE tenant_id = $1 AND namespace = $2 AND install_name = $3",
        )
        .bind(tenant_id)
        .bind(namespace)
        .bind(install_name)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_installation_resources", "marketplace_installation_resource", e))
    }

    /// Create an async install/uninstall job.
    #[instrument(skip(self))]
    pub async fn create_install_job(
        &self,
        id: &str,
        tenant_id: &str,
        namespace: &str,
        install_name: &str,
    ) -> Result<MarketplaceInstallJob> {
        sqlx::query_as(
            "INSERT INTO marketplace_install_jobs (id, tenant_id, namespace, install_name, status)
             VALUES ($1, $2, $3, $4, 'pending')
             RETURNING id, tenant_id, namespace, install_name, status, error, created_at, updated_at",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(namespace)
        .bind(install_name)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_install_job", "marketplace_install_job", e))
    }

    /// Update a job's status and optional error.
    #[instrument(skip(self))]
    pub async fn update_install_job_status(
        &self,
        id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<MarketplaceInstallJob> {
        sqlx::query_as(
            "UPDATE marketplace_install_jobs SET status = $2, error = $3, updated_at = now()
             WHERE id = $1
             RETURNING id, tenant_id, namespace, install_name, status, error, created_at, updated_at",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("update_install_job_status", "marketplace_install_job", e))?
        .ok_or_else(|| NovaError::not_found("marketplace_install_job", id))
    }
}
