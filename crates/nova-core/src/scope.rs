//! Tenant scope (C1): the `(tenant_id, namespace)` pair carried through
//! every operation exposed by the metadata core.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The default tenant. Always present after schema installation and cannot
/// be deleted or renamed.
pub const DEFAULT_TENANT: &str = "default";
/// The default namespace of the default tenant.
pub const DEFAULT_NAMESPACE: &str = "default";

static SCOPE_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("static regex"));

/// Checks an identifier against the scope-part grammar
/// `^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$` used for tenant ids and namespace
/// names alike.
#[must_use]
pub fn is_valid_scope_part(s: &str) -> bool {
    SCOPE_PART_RE.is_match(s)
}

/// The `(tenant_id, namespace)` isolation boundary of an operation.
///
/// This is the only isolation mechanism in the core: every read/write in
/// the metadata store, cache, and workflow engine resolves a `TenantScope`
/// and uses it as an implicit filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    tenant_id: String,
    namespace: String,
}

impl TenantScope {
    /// Build a scope, coercing non-conforming identifiers to `default`.
    ///
    /// This mirrors `with_scope(op_context, tenant_id, namespace)`: callers
    /// never get a `Result` here, malformed parts silently fall back so
    /// that a bad caller can't widen its own blast radius to every tenant.
    #[must_use]
    pub fn new(tenant_id: impl AsRef<str>, namespace: impl AsRef<str>) -> Self {
        let tenant_id = tenant_id.as_ref();
        let namespace = namespace.as_ref();
        Self {
            tenant_id: if is_valid_scope_part(tenant_id) {
                tenant_id.to_string()
            } else {
                DEFAULT_TENANT.to_string()
            },
            namespace: if is_valid_scope_part(namespace) {
                namespace.to_string()
            } else {
                DEFAULT_NAMESPACE.to_string()
            },
        }
    }

    /// The `(default, default)` scope.
    #[must_use]
    pub fn default_scope() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Build a scope without coercion, for callers that have already
    /// validated their parts (e.g. loading a row back out of storage).
    ///
    /// # Errors
    /// Returns `Err` with the offending part if either fails
    /// [`is_valid_scope_part`].
    pub fn strict(
        tenant_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, String> {
        let tenant_id = tenant_id.into();
        let namespace = namespace.into();
        if !is_valid_scope_part(&tenant_id) {
            return Err(tenant_id);
        }
        if !is_valid_scope_part(&namespace) {
            return Err(namespace);
        }
        Ok(Self {
            tenant_id,
            namespace,
        })
    }

    /// The tenant id half of the scope.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The namespace half of the scope.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `true` if this is the `(default, default)` scope.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.tenant_id == DEFAULT_TENANT && self.namespace == DEFAULT_NAMESPACE
    }
}

impl Default for TenantScope {
    fn default() -> Self {
        Self::default_scope()
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.namespace)
    }
}

/// An operation context carrying an optional [`TenantScope`].
///
/// `with_scope` attaches a scope to a fresh or existing context;
/// `scope_of` resolves it, falling back to `(default, default)` when
/// absent — mirrors spec.md §4.1.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    scope: Option<TenantScope>,
}

impl OpContext {
    /// A fresh, scope-less context.
    #[must_use]
    pub fn new() -> Self {
        Self { scope: None }
    }

    /// Attach a scope, coercing malformed parts to `default` as
    /// [`TenantScope::new`] does.
    #[must_use]
    pub fn with_scope(self, tenant_id: impl AsRef<str>, namespace: impl AsRef<str>) -> Self {
        Self {
            scope: Some(TenantScope::new(tenant_id, namespace)),
        }
    }

    /// Resolve the scope, defaulting to `(default, default)` when absent.
    #[must_use]
    pub fn scope_of(&self) -> TenantScope {
        self.scope.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_scope_parts() {
        assert!(is_valid_scope_part("default"));
        assert!(is_valid_scope_part("acme-corp.prod_1"));
        assert!(is_valid_scope_part("a"));
        assert!(!is_valid_scope_part(""));
        assert!(!is_valid_scope_part("-leading-dash"));
        assert!(!is_valid_scope_part("has space"));
        assert!(!is_valid_scope_part(&"x".repeat(65)));
    }

    #[test]
    fn coerces_bad_parts_to_default() {
        let scope = TenantScope::new("bad scope!", "ok-ns");
        assert_eq!(scope.tenant_id(), DEFAULT_TENANT);
        assert_eq!(scope.namespace(), "ok-ns");
    }

    #[test]
    fn strict_rejects_bad_parts() {
        assert!(TenantScope::strict("bad scope!", "ns").is_err());
        assert!(TenantScope::strict("t1", "ns1").is_ok());
    }

    #[test]
    fn op_context_defaults_to_default_scope() {
        let ctx = OpContext::new();
        assert!(ctx.scope_of().is_default());
    }

    #[test]
    fn op_context_with_scope_round_trips() {
        let ctx = OpContext::new().with_scope("t1", "ns1");
        let scope = ctx.scope_of();
        assert_eq!(scope.tenant_id(), "t1");
        assert_eq!(scope.namespace(), "ns1");
    }

    #[test]
    fn display_format() {
        let scope = TenantScope::new("t1", "ns1");
        assert_eq!(scope.to_string(), "t1/ns1");
    }
}
