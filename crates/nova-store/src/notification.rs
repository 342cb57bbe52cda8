//! Notification CRUD (Metadata Store C3, spec.md §3, P5 idempotence).

use nova_core::{NovaError, Result, TenantScope};
use serde_json::Value as Json;
use tracing::instrument;

use crate::types::{Notification, NotificationStatus, NotificationStatusFilter};
use crate::Store;

impl Store {
    /// Insert a notification, idempotent on `id` (P5: calling this twice
    /// with the same `id` yields a single row — a second call is a no-op
    /// returning the existing row).
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, data_json))]
    pub async fn create_notification(
        &self,
        scope: &TenantScope,
        id: &str,
        r#type: &str,
        severity: &str,
        title: &str,
        message: &str,
        data_json: &Json,
    ) -> Result<Notification> {
        sqlx::query_as(
            "INSERT INTO notifications
                (id, tenant_id, namespace, type, severity, title, message, data_json)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET id = notifications.id
             RETURNING id, tenant_id, namespace, type, severity, source, function_id,
                       function_name, title, message, data_json, status, created_at, read_at",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(r#type)
        .bind(severity)
        .bind(title)
        .bind(message)
        .bind(data_json)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("create_notification", "notification", e))
    }

    /// List notifications in scope, optionally filtered by status.
    /// `NotificationStatusFilter::All` is query-only and can never be
    /// persisted — there is no write path that accepts it (spec.md §9
    /// open question, resolved: reject `NotificationStatusAll` at write
    /// time by construction, since [`NotificationStatus`] has no such
    /// variant).
    #[instrument(skip(self))]
    pub async fn list_notifications(
        &self,
        scope: &TenantScope,
        filter: NotificationStatusFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>> {
        match filter {
            NotificationStatusFilter::All => sqlx::query_as(
                "SELECT id, tenant_id, namespace, type, severity, source, function_id,
                        function_name, title, message, data_json, status, created_at, read_at
                 FROM notifications WHERE tenant_id = $1 AND namespace = $2
                 ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            )
            .bind(scope.tenant_id())
            .bind(scope.namespace())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("list_notifications", "notification", e)),

            NotificationStatusFilter::Only(status) => sqlx::query_as(
                "SELECT id, tenant_id, namespace, type, severity, source, function_id,
                        function_name, title, message, data_json, status, created_at, read_at
                 FROM notifications WHERE tenant_id = $1 AND namespace = $2 AND status = $3
                 ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            )
            .bind(scope.tenant_id())
            .bind(scope.namespace())
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("list_notifications", "notification", e)),
        }
    }

    /// Mark a notification read, stamping `read_at`.
    #[instrument(skip(self))]
    pub async fn mark_notification_read(&self, scope: &TenantScope, id: &str) -> Result<Notification> {
        sqlx::query_as(
            "UPDATE notifications SET status = $4, read_at = now()
             WHERE id = $1 AND tenant_id = $2 AND namespace = $3
             RETURNING id, tenant_id, namespace, type, severity, source, function_id,
                       function_name, title, message, data_json, status, created_at, read_at",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(NotificationStatus::Read.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("mark_notification_read", "notification", e))?
        .ok_or_else(|| NovaError::not_found("notification", id))
    }

    /// Delete a notification, scoped.
    #[instrument(skip(self))]
    pub async fn delete_notification(&self, scope: &TenantScope, id: &str) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM notifications WHERE id = $1 AND tenant_id = $2 AND namespace = $3",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .execute(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("delete_notification", "notification", e))?
        .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("notification", id));
        }
        Ok(())
    }
}
