//! # Nova Config
//!
//! The configuration surface enumerated in spec.md §6.4: cache TTL, lease
//! duration, rate-limit bucket GC threshold, and the backing-store DSN —
//! plus the ambient pool/log knobs every crate in the corpus exposes
//! (`pg_pool_max_connections`, `log_level`, `log_format`).
//!
//! Loading is a small env-then-file layering, deliberately without the
//! hot-reload/watcher machinery of the teacher's full `nebula-config`
//! crate: this core has no watchers (spec.md §9).

use std::path::Path;
use std::time::Duration;

use nova_core::NovaError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating [`NovaConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed as TOML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A loaded configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for NovaError {
    fn from(err: ConfigError) -> Self {
        NovaError::validation(err.to_string())
    }
}

/// The Nova metadata core's configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NovaConfig {
    /// Backing-store connection descriptor. Opaque to the core.
    pub database_dsn: String,

    /// Cache entry lifetime, seconds. Applied when a caller passes `0` to
    /// a cache operation requesting "use the default".
    pub cache_default_ttl_secs: u64,

    /// Workflow-node lease horizon, seconds.
    pub lease_duration_secs: u64,

    /// GC threshold for idle rate-limit buckets, seconds.
    pub rate_limit_bucket_ttl_secs: u64,

    /// Maximum Postgres connection pool size.
    pub pg_pool_max_connections: u32,

    /// `tracing` `EnvFilter` string, e.g. `"info"`.
    pub log_level: String,

    /// `"pretty"` or `"json"`.
    pub log_format: String,
}

impl Default for NovaConfig {
    fn default() -> Self {
        Self {
            database_dsn: "postgres://localhost/nova".to_string(),
            cache_default_ttl_secs: 30,
            lease_duration_secs: 60,
            rate_limit_bucket_ttl_secs: 3600,
            pg_pool_max_connections: 10,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl NovaConfig {
    /// `cache_default_ttl` as a [`Duration`].
    #[must_use]
    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }

    /// `lease_duration` as a [`Duration`].
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// `rate_limit_bucket_ttl` as a [`Duration`].
    #[must_use]
    pub fn rate_limit_bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_limit_bucket_ttl_secs)
    }

    /// Layer environment variables (prefixed `NOVA_`) on top of
    /// [`NovaConfig::default`]. Unset variables keep the default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("NOVA_DATABASE_DSN") {
            cfg.database_dsn = v;
        }
        if let Some(v) = env_u64("NOVA_CACHE_DEFAULT_TTL_SECS") {
            cfg.cache_default_ttl_secs = v;
        }
        if let Some(v) = env_u64("NOVA_LEASE_DURATION_SECS") {
            cfg.lease_duration_secs = v;
        }
        if let Some(v) = env_u64("NOVA_RATE_LIMIT_BUCKET_TTL_SECS") {
            cfg.rate_limit_bucket_ttl_secs = v;
        }
        if let Some(v) = std::env::var("NOVA_PG_POOL_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            cfg.pg_pool_max_connections = v;
        }
        if let Ok(v) = std::env::var("NOVA_LOG_LEVEL") {
            cfg.log_level = v;
        }
        if let Ok(v) = std::env::var("NOVA_LOG_FORMAT") {
            cfg.log_format = v;
        }
        cfg
    }

    /// Load a TOML file, falling back to [`NovaConfig::default`] values for
    /// any field the file doesn't set.
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] on failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    /// Validate the configuration, returning [`ConfigError::Invalid`] with a
    /// description of the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_dsn.trim().is_empty() {
            return Err(ConfigError::Invalid("database_dsn must not be empty".into()));
        }
        if self.pg_pool_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pg_pool_max_connections must be > 0".into(),
            ));
        }
        if self.lease_duration_secs == 0 {
            return Err(ConfigError::Invalid("lease_duration_secs must be > 0".into()));
        }
        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(NovaConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_dsn_fails_validation() {
        let mut cfg = NovaConfig::default();
        cfg.database_dsn = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nova.toml");
        std::fs::write(&path, "database_dsn = \"postgres://x/y\"\n").expect("write");

        let cfg = NovaConfig::load(&path).expect("load");
        assert_eq!(cfg.database_dsn, "postgres://x/y");
        assert_eq!(cfg.cache_default_ttl_secs, 30);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = NovaConfig::load("/does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
