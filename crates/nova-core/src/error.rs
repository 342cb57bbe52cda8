//! Error kinds surfaced by the Nova metadata core (spec.md §7).

use thiserror::Error;

/// Result type used throughout the Nova metadata core.
pub type Result<T> = std::result::Result<T, NovaError>;

/// Structured error kinds surfaced by the core. The core does not catch
/// errors internally: it wraps backing-store errors with operation context
/// and returns them to the caller. `AcquireReadyNode` returning "no work
/// available" is a normal `None`, never an error, and cache misses are
/// never surfaced.
#[derive(Error, Debug)]
pub enum NovaError {
    /// A keyed lookup returned zero rows.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// The kind of entity that was looked up (e.g. `"function"`).
        entity: &'static str,
        /// The key that was not found.
        key: String,
    },

    /// A unique or foreign-key constraint was violated.
    #[error("conflict on {entity}: {reason}")]
    Conflict {
        /// The kind of entity involved in the conflict.
        entity: &'static str,
        /// Human-readable description of the conflicting constraint.
        reason: String,
    },

    /// A caller-supplied identifier is malformed or a required field is
    /// empty.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable description of what failed validation.
        reason: String,
    },

    /// A delete was refused because dependent resources exist.
    #[error("{entity} is in use: {reason}")]
    InUse {
        /// The kind of entity the caller tried to delete.
        entity: &'static str,
        /// Human-readable description of what is still depending on it.
        reason: String,
    },

    /// An advisory lock could not be acquired by a `try_lock` variant.
    #[error("lock unavailable: {name}")]
    LockUnavailable {
        /// The name of the advisory lock that could not be acquired.
        name: String,
    },

    /// Any other backing-store error. The caller may retry with backoff.
    #[error("transient error during {operation}: {source}")]
    Transient {
        /// The operation that was being performed when the error occurred.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl NovaError {
    /// Build a [`NovaError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Build a [`NovaError::Conflict`].
    pub fn conflict(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            reason: reason.into(),
        }
    }

    /// Build a [`NovaError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Build a [`NovaError::InUse`].
    pub fn in_use(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::InUse {
            entity,
            reason: reason.into(),
        }
    }

    /// Build a [`NovaError::LockUnavailable`].
    pub fn lock_unavailable(name: impl Into<String>) -> Self {
        Self::LockUnavailable { name: name.into() }
    }

    /// Wrap an arbitrary error as [`NovaError::Transient`], tagging it with
    /// the operation that was in flight.
    pub fn transient(
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            operation,
            source: Box::new(source),
        }
    }
}

#[cfg(feature = "sqlx")]
impl NovaError {
    /// Convert a [`sqlx::Error`] into the right [`NovaError`] kind for the
    /// given operation: row-not-found maps to [`NovaError::NotFound`],
    /// unique-violation maps to [`NovaError::Conflict`], anything else
    /// becomes [`NovaError::Transient`].
    pub fn from_sqlx(operation: &'static str, entity: &'static str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found(entity, operation),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::conflict(entity, db_err.message().to_string())
            }
            _ => Self::transient(operation, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_shape_messages() {
        let err = NovaError::not_found("function", "f1");
        assert_eq!(err.to_string(), "function not found: f1");

        let err = NovaError::conflict("function", "name already taken");
        assert_eq!(err.to_string(), "conflict on function: name already taken");

        let err = NovaError::validation("empty name");
        assert_eq!(err.to_string(), "validation failed: empty name");

        let err = NovaError::in_use("tenant", "functions still exist");
        assert_eq!(err.to_string(), "tenant is in use: functions still exist");

        let err = NovaError::lock_unavailable("install:t1:ns1");
        assert_eq!(err.to_string(), "lock unavailable: install:t1:ns1");
    }
}
