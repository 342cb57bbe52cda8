//! Function CRUD and its child entities: versions, aliases, code, files,
//! and layer associations (Metadata Store C3, spec.md §4.3).

use std::collections::HashMap;

use nova_core::{NovaError, Result, TenantScope};
use serde_json::Value as Json;
use tracing::instrument;

use crate::types::is_binary_content;
use crate::{Function, FunctionAlias, FunctionCode, FunctionFile, FunctionPatch, FunctionVersion, Store};

impl Store {
    /// Upsert a function on `id`, setting `created_at` on first insert and
    /// always refreshing `updated_at` (spec.md §4.3 `SaveFunction`).
    #[instrument(skip(self, f))]
    pub async fn save_function(&self, scope: &TenantScope, f: &Function) -> Result<Function> {
        if f.id.is_empty() || f.name.is_empty() {
            return Err(NovaError::validation("function requires id and name"));
        }

        sqlx::query_as(
            "INSERT INTO functions
                (id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                 min_replicas, max_replicas, mode, limits, env_vars, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                handler = EXCLUDED.handler,
                runtime = EXCLUDED.runtime,
                memory_mb = EXCLUDED.memory_mb,
                timeout_s = EXCLUDED.timeout_s,
                min_replicas = EXCLUDED.min_replicas,
                max_replicas = EXCLUDED.max_replicas,
                mode = EXCLUDED.mode,
                limits = EXCLUDED.limits,
                env_vars = EXCLUDED.env_vars,
                updated_at = now()
             RETURNING id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                       min_replicas, max_replicas, mode, limits, env_vars, created_at, updated_at",
        )
        .bind(&f.id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(&f.name)
        .bind(&f.handler)
        .bind(&f.runtime)
        .bind(f.memory_mb)
        .bind(f.timeout_s)
        .bind(f.min_replicas)
        .bind(f.max_replicas)
        .bind(&f.mode)
        .bind(&f.limits)
        .bind(&f.env_vars)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("save_function", "function", e))
    }

    /// Fetch a function by id, scoped.
    #[instrument(skip(self))]
    pub async fn get_function(&self, scope: &TenantScope, id: &str) -> Result<Function> {
        sqlx::query_as(
            "SELECT id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                    min_replicas, max_replicas, mode, limits, env_vars, created_at, updated_at
             FROM functions WHERE id = $1 AND tenant_id = $2 AND namespace = $3",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_function", "function", e))?
        .ok_or_else(|| NovaError::not_found("function", id))
    }

    /// Fetch a function by name, scoped (spec.md §4.3 `GetFunctionByName`,
    /// exercised by P6 tenant isolation).
    #[instrument(skip(self))]
    pub async fn get_function_by_name(&self, scope: &TenantScope, name: &str) -> Result<Function> {
        sqlx::query_as(
            "SELECT id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                    min_replicas, max_replicas, mode, limits, env_vars, created_at, updated_at
             FROM functions WHERE name = $1 AND tenant_id = $2 AND namespace = $3",
        )
        .bind(name)
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_function_by_name", "function", e))?
        .ok_or_else(|| NovaError::not_found("function", name))
    }

    /// Load-then-merge update, applying only the patch's present fields,
    /// then persisting through [`Store::save_function`] (spec.md §4.3
    /// `UpdateFunction`).
    #[instrument(skip(self, patch))]
    pub async fn update_function(
        &self,
        scope: &TenantScope,
        name: &str,
        patch: FunctionPatch,
    ) -> Result<Function> {
        let mut f = self.get_function_by_name(scope, name).await?;

        if let Some(v) = patch.handler {
            f.handler = v;
        }
        if let Some(v) = patch.runtime {
            f.runtime = v;
        }
        if let Some(v) = patch.memory_mb {
            f.memory_mb = v;
        }
        if let Some(v) = patch.timeout_s {
            f.timeout_s = v;
        }
        if let Some(v) = patch.min_replicas {
            f.min_replicas = v;
        }
        if let Some(v) = patch.max_replicas {
            f.max_replicas = v;
        }
        if let Some(v) = patch.mode {
            f.mode = v;
        }
        if let Some(v) = patch.limits {
            f.limits = v;
        }
        if let Some(new_vars) = patch.env_vars {
            f.env_vars = if patch.merge_env_vars {
                merge_env_vars(&f.env_vars, &new_vars)
            } else {
                new_vars
            };
        }

        self.save_function(scope, &f).await
    }

    /// Scoped delete, cascading versions/aliases/code/files/layers (DB
    /// `ON DELETE CASCADE` does the cascade; this just fails `NotFound` on
    /// zero rows per spec.md §4.3 `DeleteFunction`).
    #[instrument(skip(self))]
    pub async fn delete_function(&self, scope: &TenantScope, id: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM functions WHERE id = $1 AND tenant_id = $2 AND namespace = $3")
            .bind(id)
            .bind(scope.tenant_id())
            .bind(scope.namespace())
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_function", "function", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("function", id));
        }
        Ok(())
    }

    /// Paginated, name-ascending listing (spec.md §4.3 `ListFunctions`).
    #[instrument(skip(self))]
    pub async fn list_functions(&self, scope: &TenantScope, limit: i64, offset: i64) -> Result<Vec<Function>> {
        sqlx::query_as(
            "SELECT id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                    min_replicas, max_replicas, mode, limits, env_vars, created_at, updated_at
             FROM functions WHERE tenant_id = $1 AND namespace = $2
             ORDER BY name ASC LIMIT $3 OFFSET $4",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_functions", "function", e))
    }

    /// Case-insensitive substring search over `name`, paginated (spec.md
    /// §4.3 `SearchFunctions`).
    #[instrument(skip(self))]
    pub async fn search_functions(
        &self,
        scope: &TenantScope,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Function>> {
        sqlx::query_as(
            "SELECT id, tenant_id, namespace, name, handler, runtime, memory_mb, timeout_s,
                    min_replicas, max_replicas, mode, limits, env_vars, created_at, updated_at
             FROM functions
             WHERE tenant_id = $1 AND namespace = $2 AND name ILIKE $3
             ORDER BY name ASC LIMIT $4 OFFSET $5",
        )
        .bind(scope.tenant_id())
        .bind(scope.namespace())
        .bind(format!("%{query}%"))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("search_functions", "function", e))
    }

    // --- versions ---------------------------------------------------

    /// Upsert on `(function_id, version)` (spec.md §4.3 `PublishVersion`).
    #[instrument(skip(self, definition_blob))]
    pub async fn publish_version(
        &self,
        function_id: &str,
        version: i32,
        definition_blob: &Json,
    ) -> Result<FunctionVersion> {
        sqlx::query_as(
            "INSERT INTO function_versions (id, function_id, version, definition_blob)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (function_id, version) DO UPDATE SET definition_blob = EXCLUDED.definition_blob
             RETURNING id, function_id, version, definition_blob, created_at",
        )
        .bind(format!("{function_id}/v{version}"))
        .bind(function_id)
        .bind(version)
        .bind(definition_blob)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("publish_version", "function_version", e))
    }

    /// Fetch one published version.
    #[instrument(skip(self))]
    pub async fn get_version(&self, function_id: &str, version: i32) -> Result<FunctionVersion> {
        sqlx::query_as(
            "SELECT id, function_id, version, definition_blob, created_at
             FROM function_versions WHERE function_id = $1 AND version = $2",
        )
        .bind(function_id)
        .bind(version)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_version", "function_version", e))?
        .ok_or_else(|| NovaError::not_found("function_version", version.to_string()))
    }

    /// List every published version, newest first.
    #[instrument(skip(self))]
    pub async fn list_versions(&self, function_id: &str) -> Result<Vec<FunctionVersion>> {
        sqlx::query_as(
            "SELECT id, function_id, version, definition_blob, created_at
             FROM function_versions WHERE function_id = $1 ORDER BY version DESC",
        )
        .bind(function_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_versions", "function_version", e))
    }

    /// Delete one published version.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, function_id: &str, version: i32) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM function_versions WHERE function_id = $1 AND version = $2")
            .bind(function_id)
            .bind(version)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_version", "function_version", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("function_version", version.to_string()));
        }
        Ok(())
    }

    // --- aliases -----------------------------------------------------

    /// Upsert a named alias pointing at a definition blob.
    #[instrument(skip(self, definition_blob))]
    pub async fn save_alias(
        &self,
        function_id: &str,
        name: &str,
        definition_blob: &Json,
    ) -> Result<FunctionAlias> {
        sqlx::query_as(
            "INSERT INTO function_aliases (function_id, name, definition_blob)
             VALUES ($1, $2, $3)
             ON CONFLICT (function_id, name) DO UPDATE SET
                definition_blob = EXCLUDED.definition_blob, updated_at = now()
             RETURNING function_id, name, definition_blob, created_at, updated_at",
        )
        .bind(function_id)
        .bind(name)
        .bind(definition_blob)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("save_alias", "function_alias", e))
    }

    /// List every alias of a function.
    #[instrument(skip(self))]
    pub async fn list_aliases(&self, function_id: &str) -> Result<Vec<FunctionAlias>> {
        sqlx::query_as(
            "SELECT function_id, name, definition_blob, created_at, updated_at
             FROM function_aliases WHERE function_id = $1 ORDER BY name",
        )
        .bind(function_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("list_aliases", "function_alias", e))
    }

    /// Delete a named alias.
    #[instrument(skip(self))]
    pub async fn delete_alias(&self, function_id: &str, name: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM function_aliases WHERE function_id = $1 AND name = $2")
            .bind(function_id)
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_alias", "function_alias", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(NovaError::not_found("function_alias", name));
        }
        Ok(())
    }

    // --- code ----------------------------------------------------------

    /// Save source, resetting `compile_status → pending` and clearing any
    /// previous compiled artifact or error (spec.md §4.3 `SaveFunctionCode`).
    #[instrument(skip(self, source))]
    pub async fn save_function_code(
        &self,
        function_id: &str,
        source: &[u8],
        source_hash: &str,
    ) -> Result<FunctionCode> {
        sqlx::query_as(
            "INSERT INTO function_code
                (function_id, source, source_hash, compile_status, compiled_binary, binary_hash, compile_error, updated_at)
             VALUES ($1, $2, $3, 'pending', NULL, NULL, NULL, now())
             ON CONFLICT (function_id) DO UPDATE SET
                source = EXCLUDED.source,
                source_hash = EXCLUDED.source_hash,
                compile_status = 'pending',
                compiled_binary = NULL,
                binary_hash = NULL,
                compile_error = NULL,
                updated_at = now()
             RETURNING function_id, source, compiled_binary, source_hash, binary_hash,
                       compile_status, compile_error, created_at, updated_at",
        )
        .bind(function_id)
        .bind(source)
        .bind(source_hash)
        .fetch_one(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("save_function_code", "function_code", e))
    }

    /// Record a compilation outcome (spec.md §4.3 `UpdateCompileResult`).
    #[instrument(skip(self, compiled_binary))]
    pub async fn update_compile_result(
        &self,
        function_id: &str,
        compiled_binary: Option<&[u8]>,
        binary_hash: Option<&str>,
        status: &str,
        compile_error: Option<&str>,
    ) -> Result<FunctionCode> {
        sqlx::query_as(
            "UPDATE function_code SET
                compiled_binary = $2, binary_hash = $3, compile_status = $4,
                compile_error = $5, updated_at = now()
             WHERE function_id = $1
             RETURNING function_id, source, compiled_binary, source_hash, binary_hash,
                       compile_status, compile_error, created_at, updated_at",
        )
        .bind(function_id)
        .bind(compiled_binary)
        .bind(binary_hash)
        .bind(status)
        .bind(compile_error)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("update_compile_result", "function_code", e))?
        .ok_or_else(|| NovaError::not_found("function_code", function_id))
    }

    /// Fetch compiled state, absent (not an error) when no source has ever
    /// been saved (spec.md §4.3 `GetFunctionCode`).
    #[instrument(skip(self))]
    pub async fn get_function_code(&self, function_id: &str) -> Result<Option<FunctionCode>> {
        sqlx::query_as(
            "SELECT function_id, source, compiled_binary, source_hash, binary_hash,
                    compile_status, compile_error, created_at, updated_at
             FROM function_code WHERE function_id = $1",
        )
        .bind(function_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_function_code", "function_code", e))
    }

    /// Delete all compiled state for a function.
    #[instrument(skip(self))]
    pub async fn delete_function_code(&self, function_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM function_code WHERE function_id = $1")
            .bind(function_id)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_function_code", "function_code", e))?;
        Ok(())
    }

    // --- files -----------------------------------------------------------

    /// Replace the entire fileset transactionally: delete-all then
    /// insert-all (spec.md §4.3 `SaveFunctionFiles`, P4's round-trip
    /// invariant including the empty-fileset case).
    #[instrument(skip(self, files))]
    pub async fn save_function_files(
        &self,
        function_id: &str,
        files: &HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("save_function_files: begin", "function_file", e))?;

        sqlx::query("DELETE FROM function_files WHERE function_id = $1")
            .bind(function_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("save_function_files: clear", "function_file", e))?;

        for (path, content) in files {
            let is_binary = is_binary_content(content);
            sqlx::query(
                "INSERT INTO function_files (function_id, path, content, is_binary)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(function_id)
            .bind(path)
            .bind(content)
            .bind(is_binary)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("save_function_files: insert", "function_file", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("save_function_files: commit", "function_file", e))?;
        Ok(())
    }

    /// Fetch the full fileset.
    #[instrument(skip(self))]
    pub async fn get_function_files(&self, function_id: &str) -> Result<Vec<FunctionFile>> {
        sqlx::query_as(
            "SELECT function_id, path, content, is_binary, created_at, updated_at
             FROM function_files WHERE function_id = $1 ORDER BY path",
        )
        .bind(function_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_function_files", "function_file", e))
    }

    /// `true` if the function has at least one file.
    #[instrument(skip(self))]
    pub async fn has_function_files(&self, function_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM function_files WHERE function_id = $1")
            .bind(function_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("has_function_files", "function_file", e))?;
        Ok(count > 0)
    }

    /// Delete the entire fileset.
    #[instrument(skip(self))]
    pub async fn delete_function_files(&self, function_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM function_files WHERE function_id = $1")
            .bind(function_id)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("delete_function_files", "function_file", e))?;
        Ok(())
    }

    // --- layers ----------------------------------------------------------

    /// Replace a function's layer associations.
    #[instrument(skip(self, layer_ids))]
    pub async fn set_function_layers(&self, function_id: &str, layer_ids: &[String]) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("set_function_layers: begin", "function_layer", e))?;

        sqlx::query("DELETE FROM function_layers WHERE function_id = $1")
            .bind(function_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("set_function_layers: clear", "function_layer", e))?;

        for (position, layer_id) in layer_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO function_layers (function_id, layer_id, position) VALUES ($1, $2, $3)",
            )
            .bind(function_id)
            .bind(layer_id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(|e| NovaError::from_sqlx("set_function_layers: insert", "function_layer", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("set_function_layers: commit", "function_layer", e))?;
        Ok(())
    }

    /// List a function's layer ids, in position order.
    #[instrument(skip(self))]
    pub async fn get_function_layers(&self, function_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT layer_id FROM function_layers WHERE function_id = $1 ORDER BY position",
        )
        .bind(function_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| NovaError::from_sqlx("get_function_layers", "function_layer", e))
    }
}

/// Merge `incoming` into `existing` key-by-key, as objects. Non-object
/// inputs fall back to wholesale replacement.
fn merge_env_vars(existing: &Json, incoming: &Json) -> Json {
    match (existing.as_object(), incoming.as_object()) {
        (Some(base), Some(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Json::Object(merged)
        }
        _ => incoming.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_env_vars_overlays_keys() {
        let base = json!({"A": "1", "B": "2"});
        let patch = json!({"B": "3", "C": "4"});
        let merged = merge_env_vars(&base, &patch);
        assert_eq!(merged, json!({"A": "1", "B": "3", "C": "4"}));
    }

    #[test]
    fn merge_env_vars_falls_back_on_non_object() {
        let base = json!({"A": "1"});
        let patch = json!("not an object");
        assert_eq!(merge_env_vars(&base, &patch), json!("not an object"));
    }
}
