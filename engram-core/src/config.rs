//! Store construction configuration.

use serde::{Deserialize, Serialize};

use crate::{EngramError, EngramResult};

/// Which backend a store is built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Embedded SQLite, pure in-memory. Default.
    SqliteMemory,
    /// Embedded SQLite backed by a single file.
    SqliteFile,
    /// Remote MySQL-compatible server.
    Mysql,
    /// Remote Postgres-compatible server.
    Postgres,
}

/// Connection pool bounds for remote backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 8,
        }
    }
}

/// Master store configuration. Built once at store construction; no
/// environment variables are consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// File path for `sqlite-file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Server DSN for `mysql` / `postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    /// Database (schema) name for remote backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Per-operation deadline applied by the async dispatcher, milliseconds.
    #[serde(default = "default_op_deadline_ms")]
    pub op_deadline_ms: u64,
    /// Aggregate byte cap for STM values. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stm_bytes: Option<usize>,
    /// Capacity of the per-scope lock map before idle locks are evicted.
    #[serde(default = "default_scope_lock_capacity")]
    pub scope_lock_capacity: usize,
    /// Worker pool width. `None` selects `max(4, 2 * cpus)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
}

fn default_op_deadline_ms() -> u64 {
    5_000
}

fn default_scope_lock_capacity() -> usize {
    10_000
}

impl StoreConfig {
    /// In-memory SQLite store, the default for demos and tests.
    pub fn sqlite_memory() -> Self {
        Self {
            backend: BackendKind::SqliteMemory,
            path: None,
            dsn: None,
            database: None,
            pool: PoolConfig::default(),
            op_deadline_ms: default_op_deadline_ms(),
            max_stm_bytes: None,
            scope_lock_capacity: default_scope_lock_capacity(),
            worker_threads: None,
        }
    }

    /// File-backed SQLite store.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::SqliteFile,
            path: Some(path.into()),
            ..Self::sqlite_memory()
        }
    }

    /// Remote backend from a DSN.
    pub fn remote(backend: BackendKind, dsn: impl Into<String>, database: Option<String>) -> Self {
        Self {
            backend,
            dsn: Some(dsn.into()),
            database,
            ..Self::sqlite_memory()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EngramResult<()> {
        match self.backend {
            BackendKind::SqliteFile if self.path.is_none() => {
                return Err(EngramError::InvalidArgument {
                    field: "path".to_string(),
                    reason: "sqlite-file backend requires a path".to_string(),
                });
            }
            BackendKind::Mysql | BackendKind::Postgres if self.dsn.is_none() => {
                return Err(EngramError::InvalidArgument {
                    field: "dsn".to_string(),
                    reason: "remote backends require a dsn".to_string(),
                });
            }
            _ => {}
        }

        if self.pool.max_connections == 0 {
            return Err(EngramError::InvalidArgument {
                field: "pool.max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(EngramError::InvalidArgument {
                field: "pool.min_connections".to_string(),
                reason: "must not exceed max_connections".to_string(),
            });
        }
        if self.op_deadline_ms == 0 {
            return Err(EngramError::InvalidArgument {
                field: "op_deadline_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.scope_lock_capacity == 0 {
            return Err(EngramError::InvalidArgument {
                field: "scope_lock_capacity".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_memory_default_validates() {
        assert!(StoreConfig::sqlite_memory().validate().is_ok());
    }

    #[test]
    fn test_sqlite_file_requires_path() {
        let mut cfg = StoreConfig::sqlite_file("/tmp/engram.db");
        assert!(cfg.validate().is_ok());
        cfg.path = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_remote_requires_dsn() {
        let cfg = StoreConfig {
            backend: BackendKind::Mysql,
            ..StoreConfig::sqlite_memory()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_pool_bounds_checked() {
        let mut cfg = StoreConfig::remote(BackendKind::Postgres, "host=localhost", None);
        cfg.pool = PoolConfig {
            min_connections: 9,
            max_connections: 4,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_backend_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&BackendKind::SqliteMemory).unwrap(),
            "\"sqlite-memory\""
        );
        assert_eq!(
            serde_json::to_string(&BackendKind::Postgres).unwrap(),
            "\"postgres\""
        );
    }
}
