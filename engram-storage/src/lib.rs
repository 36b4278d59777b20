//! Engram Storage - Backend Trait and SQL Implementations
//!
//! Defines the capability set every backend provides and the SQL-backed
//! implementations: embedded SQLite (default, file or in-memory) and the
//! optional MySQL / Postgres remote backends.
//!
//! Backends are synchronous by contract; concurrency is imposed above by the
//! dispatcher. Every list operation pushes its sort order and limit into the
//! backing query so hot paths stay bounded regardless of stored volume.

mod sqlite;

#[cfg(feature = "mysql")]
mod mysql_backend;

#[cfg(feature = "postgres")]
mod postgres_backend;

pub use sqlite::SqliteBackend;

#[cfg(feature = "mysql")]
pub use mysql_backend::MysqlBackend;

#[cfg(feature = "postgres")]
pub use postgres_backend::PostgresBackend;

use std::sync::Arc;

use engram_core::{
    BackendKind, ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event, Fact,
    FactFilter, Insight, InsightFilter, Procedure, Scope, StoreConfig, TimeRange, WorkingState,
};
use serde_json::Value;

// ============================================================================
// STORAGE BACKEND TRAIT
// ============================================================================

/// Capability set every backend must provide.
///
/// Contracts the composer depends on:
/// - `append_*` fails with `Conflict` on a duplicate `(scope, id)`.
/// - `upsert_*` replaces by id, preserving `created_ms` and bumping
///   `updated_ms` monotonically.
/// - `patch_working_state` is an atomic read-merge-write; a supplied
///   `state_version` below the stored one fails with `Conflict`.
/// - List operations return in their category's recall order (events and
///   context builds newest-first, facts by confidence, episodes by start,
///   procedures by success, insights by confidence) and apply `limit` at
///   query time.
/// - All operations validate the scope and reject empty components.
pub trait StorageBackend: Send + Sync {
    // === Events ===

    fn append_event(&self, event: &Event) -> EngramResult<()>;

    fn list_events(
        &self,
        scope: &Scope,
        time_range: Option<&TimeRange>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Event>>;

    // === Working state & STM ===

    fn get_working_state(&self, scope: &Scope) -> EngramResult<Option<WorkingState>>;

    fn patch_working_state(&self, scope: &Scope, patch: &Value) -> EngramResult<WorkingState>;

    fn get_stm(&self, scope: &Scope) -> EngramResult<Option<Value>>;

    fn update_stm(&self, scope: &Scope, stm: &Value) -> EngramResult<()>;

    // === Facts ===

    fn list_facts(
        &self,
        scope: &Scope,
        filter: Option<&FactFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Fact>>;

    fn upsert_fact(&self, scope: &Scope, fact: &Fact) -> EngramResult<()>;

    // === Episodes ===

    fn list_episodes(
        &self,
        scope: &Scope,
        filter: Option<&EpisodeFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Episode>>;

    fn append_episode(&self, scope: &Scope, episode: &Episode) -> EngramResult<()>;

    // === Procedures ===

    fn list_procedures(
        &self,
        scope: &Scope,
        task_type: Option<&str>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Procedure>>;

    fn upsert_procedure(&self, scope: &Scope, procedure: &Procedure) -> EngramResult<()>;

    // === Insights ===

    fn list_insights(
        &self,
        scope: &Scope,
        filter: Option<&InsightFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Insight>>;

    fn append_insight(&self, scope: &Scope, insight: &Insight) -> EngramResult<()>;

    // === Context-build audit log ===

    fn write_context_build(&self, scope: &Scope, build: &ContextBuild) -> EngramResult<()>;

    fn list_context_builds(
        &self,
        scope: &Scope,
        limit: Option<u32>,
    ) -> EngramResult<Vec<ContextBuild>>;
}

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn StorageBackend")
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Build the backend named by the configuration.
///
/// Remote kinds require their cargo feature; requesting one without it is a
/// configuration error, not a compile break, so a single binary can ship
/// with embedded-only support.
pub fn open_backend(config: &StoreConfig) -> EngramResult<Arc<dyn StorageBackend>> {
    config.validate()?;
    match config.backend {
        BackendKind::SqliteMemory => Ok(Arc::new(SqliteBackend::in_memory()?)),
        BackendKind::SqliteFile => {
            // validate() guarantees the path is present.
            let path = config.path.as_deref().ok_or_else(|| EngramError::Internal {
                reason: "validated config lost its path".to_string(),
            })?;
            Ok(Arc::new(SqliteBackend::open(path)?))
        }
        #[cfg(feature = "mysql")]
        BackendKind::Mysql => Ok(Arc::new(MysqlBackend::connect(config)?)),
        #[cfg(feature = "postgres")]
        BackendKind::Postgres => Ok(Arc::new(PostgresBackend::connect(config)?)),
        #[cfg(not(feature = "mysql"))]
        BackendKind::Mysql => Err(EngramError::InvalidArgument {
            field: "backend".to_string(),
            reason: "mysql support is not compiled in (enable the `mysql` feature)".to_string(),
        }),
        #[cfg(not(feature = "postgres"))]
        BackendKind::Postgres => Err(EngramError::InvalidArgument {
            field: "backend".to_string(),
            reason: "postgres support is not compiled in (enable the `postgres` feature)"
                .to_string(),
        }),
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Decode a stored JSON body into a record, mapping failures to the
/// corruption taxonomy: a row we wrote that no longer parses is on-disk
/// damage, not caller error.
pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    entity: &str,
    json: &str,
) -> EngramResult<T> {
    serde_json::from_str(json).map_err(|e| EngramError::Corruption {
        entity: entity.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a record to its canonical JSON body.
pub(crate) fn encode_record<T: serde::Serialize>(entity: &str, record: &T) -> EngramResult<String> {
    serde_json::to_string(record).map_err(|e| EngramError::Internal {
        reason: format!("failed to serialise {entity}: {e}"),
    })
}

/// Conjunctive tag intersection used by the in-process leg of tag filters.
pub(crate) fn shares_tag(record_tags: &[String], wanted: &[String]) -> bool {
    wanted.is_empty() || record_tags.iter().any(|t| wanted.contains(t))
}

/// Resolve the working-state version transition for a patch.
///
/// A supplied version below the stored one is a stale write; an omitted
/// version advances the stored one by a single step.
pub(crate) fn next_state_version(
    stored: u64,
    supplied: Option<u64>,
    scope: &Scope,
) -> EngramResult<u64> {
    match supplied {
        Some(v) if v < stored => Err(EngramError::Conflict {
            entity: "working_state".to_string(),
            id: scope.hash().to_string(),
            reason: format!("stale state_version {v} < stored {stored}"),
        }),
        Some(v) => Ok(v),
        None => Ok(stored + 1),
    }
}
