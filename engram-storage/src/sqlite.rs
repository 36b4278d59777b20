//! Embedded SQLite backend: single file or pure in-memory, identical schema.

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tracing::info;

use engram_core::{
    merge_values, now_ms, ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event,
    Fact, FactFilter, Insight, InsightFilter, Procedure, Scope, TimeRange, WorkingState,
};

use crate::{decode_record, encode_record, next_state_version, shares_tag, StorageBackend};

/// One table per record kind, keyed by `(scope_hash, entity_id)`, with the
/// sort/filter columns the list pushdowns need extracted alongside the
/// canonical JSON body.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        scope_hash  TEXT NOT NULL,
        event_id    TEXT NOT NULL,
        ts_ms       INTEGER NOT NULL,
        kind        TEXT NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  INTEGER NOT NULL,
        PRIMARY KEY (scope_hash, event_id)
    );
    CREATE INDEX IF NOT EXISTS idx_events_scope_ts
        ON events(scope_hash, ts_ms DESC);

    CREATE TABLE IF NOT EXISTS working_state (
        scope_hash    TEXT PRIMARY KEY,
        record_json   TEXT NOT NULL,
        state_version INTEGER NOT NULL,
        updated_ms    INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS stm (
        scope_hash  TEXT PRIMARY KEY,
        record_json TEXT NOT NULL,
        updated_ms  INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS facts (
        scope_hash  TEXT NOT NULL,
        fact_id     TEXT NOT NULL,
        fact_key    TEXT NOT NULL,
        status      TEXT NOT NULL,
        confidence  REAL NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  INTEGER NOT NULL,
        updated_ms  INTEGER NOT NULL,
        PRIMARY KEY (scope_hash, fact_id)
    );
    CREATE INDEX IF NOT EXISTS idx_facts_scope_key
        ON facts(scope_hash, fact_key);

    CREATE TABLE IF NOT EXISTS episodes (
        scope_hash  TEXT NOT NULL,
        episode_id  TEXT NOT NULL,
        start_ms    INTEGER NOT NULL,
        end_ms      INTEGER,
        record_json TEXT NOT NULL,
        created_ms  INTEGER NOT NULL,
        PRIMARY KEY (scope_hash, episode_id)
    );

    CREATE TABLE IF NOT EXISTS procedures (
        scope_hash    TEXT NOT NULL,
        procedure_id  TEXT NOT NULL,
        task_type     TEXT NOT NULL,
        success_count INTEGER NOT NULL,
        record_json   TEXT NOT NULL,
        created_ms    INTEGER NOT NULL,
        updated_ms    INTEGER NOT NULL,
        PRIMARY KEY (scope_hash, procedure_id)
    );
    CREATE INDEX IF NOT EXISTS idx_procedures_scope_task
        ON procedures(scope_hash, task_type);

    CREATE TABLE IF NOT EXISTS insights (
        scope_hash  TEXT NOT NULL,
        insight_id  TEXT NOT NULL,
        confidence  REAL NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  INTEGER NOT NULL,
        PRIMARY KEY (scope_hash, insight_id)
    );

    CREATE TABLE IF NOT EXISTS context_builds (
        scope_hash  TEXT NOT NULL,
        created_ms  INTEGER NOT NULL,
        packet_json TEXT NOT NULL,
        PRIMARY KEY (scope_hash, created_ms)
    );
";

/// Embedded relational backend. The default store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Pure in-memory store sharing the file-store schema.
    pub fn in_memory() -> EngramResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| open_error("sqlite-memory", e))?;
        Self::bootstrap(conn, ":memory:")
    }

    /// Single-file store. Creates the file and schema on first open.
    pub fn open(path: &str) -> EngramResult<Self> {
        let conn = Connection::open(path).map_err(|e| open_error(path, e))?;
        // WAL keeps readers unblocked during the per-scope write bursts the
        // dispatcher produces.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| open_error(path, e))?;
        Self::bootstrap(conn, path)
    }

    fn bootstrap(conn: Connection, label: &str) -> EngramResult<Self> {
        conn.execute_batch(SCHEMA).map_err(|e| EngramError::Corruption {
            entity: "schema".to_string(),
            reason: e.to_string(),
        })?;
        info!(store = label, "sqlite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn open_error(target: &str, e: rusqlite::Error) -> EngramError {
    EngramError::BackendUnavailable {
        reason: format!("cannot open sqlite store {target}: {e}"),
    }
}

/// Translate driver failures into the error taxonomy. Constraint hits are
/// conflicts; busy/lock/IO conditions are availability; corrupt databases
/// are corruption.
fn map_db_err(entity: &str, id: &str, e: rusqlite::Error) -> EngramError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => EngramError::Conflict {
                entity: entity.to_string(),
                id: id.to_string(),
                reason: "duplicate id".to_string(),
            },
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => EngramError::Corruption {
                entity: entity.to_string(),
                reason: e.to_string(),
            },
            _ => EngramError::BackendUnavailable {
                reason: e.to_string(),
            },
        },
        _ => EngramError::Internal {
            reason: e.to_string(),
        },
    }
}

impl StorageBackend for SqliteBackend {
    // === Events ===

    fn append_event(&self, event: &Event) -> EngramResult<()> {
        event.scope.validate()?;
        let mut stamped = event.clone();
        let now = now_ms();
        let ts_ms = *stamped.ts_ms.get_or_insert(now);
        stamped.created_ms.get_or_insert(now);
        let body = encode_record("event", &stamped)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (scope_hash, event_id, ts_ms, kind, record_json, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stamped.scope.hash().as_str(),
                stamped.event_id,
                ts_ms,
                stamped.kind.as_db_str(),
                body,
                stamped.created_ms,
            ],
        )
        .map_err(|e| map_db_err("event", &stamped.event_id, e))?;
        Ok(())
    }

    fn list_events(
        &self,
        scope: &Scope,
        time_range: Option<&TimeRange>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Event>> {
        scope.validate()?;
        let start = time_range.map(|r| r.start).unwrap_or(i64::MIN);
        let end = time_range.and_then(|r| r.end).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT record_json FROM events
                 WHERE scope_hash = ?1 AND ts_ms >= ?2 AND ts_ms <= ?3
                 ORDER BY ts_ms DESC, event_id DESC
                 LIMIT ?4",
            )
            .map_err(|e| map_db_err("event", "", e))?;
        let rows = stmt
            .query_map(
                params![scope.hash().as_str(), start, end, sql_limit(limit)],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| map_db_err("event", "", e))?;

        let mut events = Vec::new();
        for row in rows {
            let body = row.map_err(|e| map_db_err("event", "", e))?;
            events.push(decode_record("event", &body)?);
        }
        Ok(events)
    }

    // === Working state & STM ===

    fn get_working_state(&self, scope: &Scope) -> EngramResult<Option<WorkingState>> {
        scope.validate()?;
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT record_json FROM working_state WHERE scope_hash = ?1",
                params![scope.hash().as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_db_err("working_state", "", e))?;
        body.map(|b| decode_record("working_state", &b)).transpose()
    }

    fn patch_working_state(&self, scope: &Scope, patch: &Value) -> EngramResult<WorkingState> {
        scope.validate()?;
        if !patch.is_object() {
            return Err(EngramError::InvalidArgument {
                field: "patch".to_string(),
                reason: "working-state patch must be a mapping".to_string(),
            });
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_err("working_state", "", e))?;

        let stored_body: Option<String> = tx
            .query_row(
                "SELECT record_json FROM working_state WHERE scope_hash = ?1",
                params![scope.hash().as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_db_err("working_state", "", e))?;
        let stored: Value = match stored_body {
            Some(body) => serde_json::from_str(&body).map_err(|e| EngramError::Corruption {
                entity: "working_state".to_string(),
                reason: e.to_string(),
            })?,
            None => Value::Object(Default::default()),
        };

        let stored_version = stored
            .get("state_version")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let supplied_version = patch.get("state_version").and_then(Value::as_u64);
        let version = next_state_version(stored_version, supplied_version, scope)?;

        let created_ms = stored
            .get("created_ms")
            .and_then(Value::as_i64)
            .unwrap_or_else(now_ms);
        let mut merged = merge_values(stored, patch.clone());
        merged["state_version"] = version.into();
        merged["created_ms"] = created_ms.into();
        merged["updated_ms"] = now_ms().into();

        let state: WorkingState =
            serde_json::from_value(merged).map_err(|e| EngramError::InvalidArgument {
                field: "patch".to_string(),
                reason: format!("merged working state is malformed: {e}"),
            })?;
        let body = encode_record("working_state", &state)?;

        tx.execute(
            "INSERT INTO working_state (scope_hash, record_json, state_version, updated_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope_hash) DO UPDATE SET
                 record_json = excluded.record_json,
                 state_version = excluded.state_version,
                 updated_ms = excluded.updated_ms",
            params![
                scope.hash().as_str(),
                body,
                version as i64,
                state.updated_ms,
            ],
        )
        .map_err(|e| map_db_err("working_state", "", e))?;
        tx.commit().map_err(|e| map_db_err("working_state", "", e))?;
        Ok(state)
    }

    fn get_stm(&self, scope: &Scope) -> EngramResult<Option<Value>> {
        scope.validate()?;
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT record_json FROM stm WHERE scope_hash = ?1",
                params![scope.hash().as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_db_err("stm", "", e))?;
        body.map(|b| decode_record("stm", &b)).transpose()
    }

    fn update_stm(&self, scope: &Scope, stm: &Value) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("stm", stm)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO stm (scope_hash, record_json, updated_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_hash) DO UPDATE SET
                 record_json = excluded.record_json,
                 updated_ms = excluded.updated_ms",
            params![scope.hash().as_str(), body, now_ms()],
        )
        .map_err(|e| map_db_err("stm", "", e))?;
        Ok(())
    }

    // === Facts ===

    fn list_facts(
        &self,
        scope: &Scope,
        filter: Option<&FactFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Fact>> {
        scope.validate()?;
        let fact_key = filter.and_then(|f| f.fact_key.as_deref());
        let status = filter.and_then(|f| f.status).map(|s| s.as_db_str());
        let min_confidence = filter.and_then(|f| f.min_confidence);
        let tags = filter.map(|f| f.tags.as_slice()).unwrap_or(&[]);
        // Tag membership lives in the JSON body, so the limit moves after
        // the in-process tag leg to keep the k-of-n contract exact.
        let sql_lim = if tags.is_empty() { sql_limit(limit) } else { -1 };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT record_json FROM facts
                 WHERE scope_hash = ?1
                   AND (?2 IS NULL OR fact_key = ?2)
                   AND (?3 IS NULL OR status = ?3)
                   AND (?4 IS NULL OR confidence >= ?4)
                 ORDER BY confidence DESC, updated_ms DESC, fact_id ASC
                 LIMIT ?5",
            )
            .map_err(|e| map_db_err("fact", "", e))?;
        let rows = stmt
            .query_map(
                params![scope.hash().as_str(), fact_key, status, min_confidence, sql_lim],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| map_db_err("fact", "", e))?;

        let mut facts: Vec<Fact> = Vec::new();
        for row in rows {
            let body = row.map_err(|e| map_db_err("fact", "", e))?;
            let fact: Fact = decode_record("fact", &body)?;
            if shares_tag(&fact.tags, tags) {
                facts.push(fact);
            }
        }
        if !tags.is_empty() {
            if let Some(l) = limit {
                facts.truncate(l as usize);
            }
        }
        Ok(facts)
    }

    fn upsert_fact(&self, scope: &Scope, fact: &Fact) -> EngramResult<()> {
        scope.validate()?;
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_err("fact", &fact.fact_id, e))?;

        let existing_created: Option<i64> = tx
            .query_row(
                "SELECT created_ms FROM facts WHERE scope_hash = ?1 AND fact_id = ?2",
                params![scope.hash().as_str(), fact.fact_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_db_err("fact", &fact.fact_id, e))?;

        let now = now_ms();
        let mut stamped = fact.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("fact", &stamped)?;

        tx.execute(
            "INSERT INTO facts
                 (scope_hash, fact_id, fact_key, status, confidence, record_json, created_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(scope_hash, fact_id) DO UPDATE SET
                 fact_key = excluded.fact_key,
                 status = excluded.status,
                 confidence = excluded.confidence,
                 record_json = excluded.record_json,
                 updated_ms = excluded.updated_ms",
            params![
                scope.hash().as_str(),
                stamped.fact_id,
                stamped.fact_key,
                stamped.status.as_db_str(),
                stamped.confidence,
                body,
                stamped.created_ms,
                stamped.updated_ms,
            ],
        )
        .map_err(|e| map_db_err("fact", &stamped.fact_id, e))?;
        tx.commit().map_err(|e| map_db_err("fact", &stamped.fact_id, e))?;
        Ok(())
    }

    // === Episodes ===

    fn list_episodes(
        &self,
        scope: &Scope,
        filter: Option<&EpisodeFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Episode>> {
        scope.validate()?;
        let window = filter.and_then(|f| f.time_range);
        let window_start = window.map(|r| r.start);
        let window_end = window.and_then(|r| r.end);
        let tags = filter.map(|f| f.tags.as_slice()).unwrap_or(&[]);
        let sql_lim = if tags.is_empty() { sql_limit(limit) } else { -1 };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT record_json FROM episodes
                 WHERE scope_hash = ?1
                   AND (?2 IS NULL OR COALESCE(end_ms, 9223372036854775807) >= ?2)
                   AND (?3 IS NULL OR start_ms <= ?3)
                 ORDER BY start_ms DESC
                 LIMIT ?4",
            )
            .map_err(|e| map_db_err("episode", "", e))?;
        let rows = stmt
            .query_map(
                params![scope.hash().as_str(), window_start, window_end, sql_lim],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| map_db_err("episode", "", e))?;

        let mut episodes: Vec<Episode> = Vec::new();
        for row in rows {
            let body = row.map_err(|e| map_db_err("episode", "", e))?;
            let episode: Episode = decode_record("episode", &body)?;
            if shares_tag(&episode.tags, tags) {
                episodes.push(episode);
            }
        }
        if !tags.is_empty() {
            if let Some(l) = limit {
                episodes.truncate(l as usize);
            }
        }
        Ok(episodes)
    }

    fn append_episode(&self, scope: &Scope, episode: &Episode) -> EngramResult<()> {
        scope.validate()?;
        let now = now_ms();
        let mut stamped = episode.clone();
        stamped.created_ms.get_or_insert(now);
        stamped.updated_ms.get_or_insert(now);
        let body = encode_record("episode", &stamped)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO episodes (scope_hash, episode_id, start_ms, end_ms, record_json, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scope.hash().as_str(),
                stamped.episode_id,
                stamped.time_range.start,
                stamped.time_range.end,
                body,
                stamped.created_ms,
            ],
        )
        .map_err(|e| map_db_err("episode", &stamped.episode_id, e))?;
        Ok(())
    }

    // === Procedures ===

    fn list_procedures(
        &self,
        scope: &Scope,
        task_type: Option<&str>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Procedure>> {
        scope.validate()?;
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT record_json FROM procedures
                 WHERE scope_hash = ?1
                   AND (?2 IS NULL OR task_type = ?2)
                 ORDER BY success_count DESC, updated_ms DESC
                 LIMIT ?3",
            )
            .map_err(|e| map_db_err("procedure", "", e))?;
        let rows = stmt
            .query_map(
                params![scope.hash().as_str(), task_type, sql_limit(limit)],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| map_db_err("procedure", "", e))?;

        let mut procedures = Vec::new();
        for row in rows {
            let body = row.map_err(|e| map_db_err("procedure", "", e))?;
            procedures.push(decode_record("procedure", &body)?);
        }
        Ok(procedures)
    }

    fn upsert_procedure(&self, scope: &Scope, procedure: &Procedure) -> EngramResult<()> {
        scope.validate()?;
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_err("procedure", &procedure.procedure_id, e))?;

        let existing_created: Option<i64> = tx
            .query_row(
                "SELECT created_ms FROM procedures WHERE scope_hash = ?1 AND procedure_id = ?2",
                params![scope.hash().as_str(), procedure.procedure_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_db_err("procedure", &procedure.procedure_id, e))?;

        let now = now_ms();
        let mut stamped = procedure.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("procedure", &stamped)?;

        tx.execute(
            "INSERT INTO procedures
                 (scope_hash, procedure_id, task_type, success_count, record_json, created_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(scope_hash, procedure_id) DO UPDATE SET
                 task_type = excluded.task_type,
                 success_count = excluded.success_count,
                 record_json = excluded.record_json,
                 updated_ms = excluded.updated_ms",
            params![
                scope.hash().as_str(),
                stamped.procedure_id,
                stamped.task_type,
                stamped.success_count as i64,
                body,
                stamped.created_ms,
                stamped.updated_ms,
            ],
        )
        .map_err(|e| map_db_err("procedure", &stamped.procedure_id, e))?;
        tx.commit()
            .map_err(|e| map_db_err("procedure", &stamped.procedure_id, e))?;
        Ok(())
    }

    // === Insights ===

    fn list_insights(
        &self,
        scope: &Scope,
        filter: Option<&InsightFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Insight>> {
        scope.validate()?;
        let min_confidence = filter.and_then(|f| f.min_confidence);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT record_json FROM insights
                 WHERE scope_hash = ?1
                   AND (?2 IS NULL OR confidence >= ?2)
                 ORDER BY confidence DESC, created_ms DESC
                 LIMIT ?3",
            )
            .map_err(|e| map_db_err("insight", "", e))?;
        let rows = stmt
            .query_map(
                params![scope.hash().as_str(), min_confidence, sql_limit(limit)],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| map_db_err("insight", "", e))?;

        let mut insights = Vec::new();
        for row in rows {
            let body = row.map_err(|e| map_db_err("insight", "", e))?;
            insights.push(decode_record("insight", &body)?);
        }
        Ok(insights)
    }

    fn append_insight(&self, scope: &Scope, insight: &Insight) -> EngramResult<()> {
        scope.validate()?;
        let mut stamped = insight.clone();
        stamped.created_ms.get_or_insert(now_ms());
        let body = encode_record("insight", &stamped)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO insights (scope_hash, insight_id, confidence, record_json, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                scope.hash().as_str(),
                stamped.insight_id,
                stamped.confidence,
                body,
                stamped.created_ms,
            ],
        )
        .map_err(|e| map_db_err("insight", &stamped.insight_id, e))?;
        Ok(())
    }

    // === Context-build audit log ===

    fn write_context_build(&self, scope: &Scope, build: &ContextBuild) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("context_build", &build.packet)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO context_builds (scope_hash, created_ms, packet_json)
             VALUES (?1, ?2, ?3)",
            params![scope.hash().as_str(), build.created_ms, body],
        )
        .map_err(|e| map_db_err("context_build", &build.created_ms.to_string(), e))?;
        Ok(())
    }

    fn list_context_builds(
        &self,
        scope: &Scope,
        limit: Option<u32>,
    ) -> EngramResult<Vec<ContextBuild>> {
        scope.validate()?;
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT created_ms, packet_json FROM context_builds
                 WHERE scope_hash = ?1
                 ORDER BY created_ms DESC
                 LIMIT ?2",
            )
            .map_err(|e| map_db_err("context_build", "", e))?;
        let rows = stmt
            .query_map(params![scope.hash().as_str(), sql_limit(limit)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| map_db_err("context_build", "", e))?;

        let mut builds = Vec::new();
        for row in rows {
            let (created_ms, body) = row.map_err(|e| map_db_err("context_build", "", e))?;
            builds.push(ContextBuild {
                scope: scope.clone(),
                created_ms,
                packet: decode_record("context_build", &body)?,
            });
        }
        Ok(builds)
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{EventKind, FactStatus};
    use engram_test_utils::{sample_episode, sample_event, sample_fact, sample_scope};
    use serde_json::json;

    fn backend() -> SqliteBackend {
        SqliteBackend::in_memory().unwrap()
    }

    #[test]
    fn test_append_and_list_events_newest_first() {
        let store = backend();
        let scope = sample_scope();
        for i in 0..10 {
            let mut event = sample_event(&scope, &format!("e-{i}"));
            event.ts_ms = Some(1_000 + i);
            store.append_event(&event).unwrap();
        }

        let events = store.list_events(&scope, None, None).unwrap();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].event_id, "e-9");
        assert_eq!(events[9].event_id, "e-0");
    }

    #[test]
    fn test_append_event_duplicate_conflicts() {
        let store = backend();
        let scope = sample_scope();
        let event = sample_event(&scope, "e-1");
        store.append_event(&event).unwrap();
        let err = store.append_event(&event).unwrap_err();
        assert_eq!(err.code(), "conflict");

        // The original row is untouched.
        assert_eq!(store.list_events(&scope, None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_event_payload_round_trips_byte_exact() {
        let store = backend();
        let scope = sample_scope();
        let mut event = sample_event(&scope, "e-1");
        event.payload = json!({"zeta": 1, "alpha": {"nested": [1, 2, 3]}, "text": "héllo"});
        store.append_event(&event).unwrap();

        let got = &store.list_events(&scope, None, None).unwrap()[0];
        assert_eq!(
            engram_core::canonical_bytes(&got.payload),
            engram_core::canonical_bytes(&event.payload)
        );
    }

    #[test]
    fn test_list_events_time_range_and_limit() {
        let store = backend();
        let scope = sample_scope();
        for i in 0..20 {
            let mut event = sample_event(&scope, &format!("e-{i:02}"));
            event.ts_ms = Some(i);
            store.append_event(&event).unwrap();
        }

        let windowed = store
            .list_events(&scope, Some(&TimeRange::new(5, Some(14))), None)
            .unwrap();
        assert_eq!(windowed.len(), 10);
        assert_eq!(windowed[0].ts_ms, Some(14));

        let limited = store.list_events(&scope, None, Some(3)).unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].ts_ms, Some(19));
    }

    #[test]
    fn test_scope_isolation() {
        let store = backend();
        let scope_a = sample_scope();
        let scope_b = sample_scope();
        store.append_event(&sample_event(&scope_a, "e-1")).unwrap();
        store.upsert_fact(&scope_a, &sample_fact("f-1", 0.9)).unwrap();
        store
            .append_episode(&scope_a, &sample_episode("ep-1", 0, Some(10)))
            .unwrap();

        assert!(store.list_events(&scope_b, None, None).unwrap().is_empty());
        assert!(store.list_facts(&scope_b, None, None).unwrap().is_empty());
        assert!(store.list_episodes(&scope_b, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_empty_scope_field() {
        let store = backend();
        let mut scope = sample_scope();
        scope.run_id = String::new();
        let err = store.list_events(&scope, None, None).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_patch_working_state_merge_and_versioning() {
        let store = backend();
        let scope = sample_scope();

        let first = store
            .patch_working_state(&scope, &json!({"goal": "trip", "plan": ["a", "b", "c"]}))
            .unwrap();
        assert_eq!(first.goal.as_deref(), Some("trip"));
        assert_eq!(first.state_version, 1);

        let second = store
            .patch_working_state(
                &scope,
                &json!({"plan": ["[done] a", "b", "c"], "decisions": ["picked hotel"]}),
            )
            .unwrap();
        assert_eq!(second.goal.as_deref(), Some("trip"));
        assert_eq!(second.plan, vec!["[done] a", "b", "c"]);
        assert_eq!(second.decisions, vec!["picked hotel"]);
        assert_eq!(second.state_version, 2);

        let read_back = store.get_working_state(&scope).unwrap().unwrap();
        assert_eq!(read_back, second);
    }

    #[test]
    fn test_patch_working_state_stale_version_conflicts() {
        let store = backend();
        let scope = sample_scope();
        store
            .patch_working_state(&scope, &json!({"goal": "x", "state_version": 5}))
            .unwrap();
        let err = store
            .patch_working_state(&scope, &json!({"goal": "y", "state_version": 4}))
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        // Stale patch left no trace.
        let state = store.get_working_state(&scope).unwrap().unwrap();
        assert_eq!(state.goal.as_deref(), Some("x"));
        assert_eq!(state.state_version, 5);
    }

    #[test]
    fn test_patch_working_state_rejects_non_mapping() {
        let store = backend();
        let scope = sample_scope();
        let err = store
            .patch_working_state(&scope, &json!(["not", "a", "mapping"]))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_stm_whole_value_replace() {
        let store = backend();
        let scope = sample_scope();
        assert!(store.get_stm(&scope).unwrap().is_none());

        store
            .update_stm(&scope, &json!({"recent": ["turn 1", "turn 2"]}))
            .unwrap();
        store.update_stm(&scope, &json!({"recent": ["turn 3"]})).unwrap();

        let stm = store.get_stm(&scope).unwrap().unwrap();
        assert_eq!(stm, json!({"recent": ["turn 3"]}));
    }

    #[test]
    fn test_upsert_fact_idempotent_and_updated_ms_monotonic() {
        let store = backend();
        let scope = sample_scope();
        let fact = sample_fact("f-1", 0.8);

        store.upsert_fact(&scope, &fact).unwrap();
        let first = store.list_facts(&scope, None, None).unwrap();
        store.upsert_fact(&scope, &fact).unwrap();
        let second = store.list_facts(&scope, None, None).unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(first[0].fact_id, second[0].fact_id);
        assert_eq!(first[0].value, second[0].value);
        assert_eq!(first[0].created_ms, second[0].created_ms);
        assert!(second[0].updated_ms >= first[0].updated_ms);
    }

    #[test]
    fn test_list_facts_filters_and_order() {
        let store = backend();
        let scope = sample_scope();
        for (id, confidence, status) in [
            ("f-low", 0.2, FactStatus::Active),
            ("f-high", 0.9, FactStatus::Active),
            ("f-dead", 0.95, FactStatus::Deprecated),
            ("f-mid", 0.5, FactStatus::Active),
        ] {
            let mut fact = sample_fact(id, confidence);
            fact.status = status;
            store.upsert_fact(&scope, &fact).unwrap();
        }

        let active = store
            .list_facts(&scope, Some(&FactFilter::active()), None)
            .unwrap();
        assert_eq!(
            active.iter().map(|f| f.fact_id.as_str()).collect::<Vec<_>>(),
            ["f-high", "f-mid", "f-low"]
        );

        let confident = store
            .list_facts(
                &scope,
                Some(&FactFilter {
                    min_confidence: Some(0.5),
                    ..FactFilter::default()
                }),
                None,
            )
            .unwrap();
        assert_eq!(confident.len(), 3);

        let limited = store
            .list_facts(&scope, Some(&FactFilter::active()), Some(2))
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].fact_id, "f-high");
    }

    #[test]
    fn test_list_facts_by_key_and_tags() {
        let store = backend();
        let scope = sample_scope();
        let mut tagged = sample_fact("f-tagged", 0.7);
        tagged.fact_key = "user.city".to_string();
        tagged.tags = vec!["travel".to_string()];
        store.upsert_fact(&scope, &tagged).unwrap();
        store.upsert_fact(&scope, &sample_fact("f-plain", 0.7)).unwrap();

        let by_key = store
            .list_facts(
                &scope,
                Some(&FactFilter {
                    fact_key: Some("user.city".to_string()),
                    ..FactFilter::default()
                }),
                None,
            )
            .unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].fact_id, "f-tagged");

        let by_tag = store
            .list_facts(
                &scope,
                Some(&FactFilter {
                    tags: vec!["travel".to_string()],
                    ..FactFilter::default()
                }),
                Some(5),
            )
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].fact_id, "f-tagged");
    }

    #[test]
    fn test_episode_overlap_and_tag_filter() {
        let store = backend();
        let scope = sample_scope();
        store
            .append_episode(&scope, &sample_episode("ep-early", 0, Some(10)))
            .unwrap();
        store
            .append_episode(&scope, &sample_episode("ep-late", 100, Some(110)))
            .unwrap();
        let mut open = sample_episode("ep-open", 50, None);
        open.tags = vec!["session".to_string()];
        store.append_episode(&scope, &open).unwrap();

        let overlapping = store
            .list_episodes(
                &scope,
                Some(&EpisodeFilter {
                    time_range: Some(TimeRange::new(60, Some(105))),
                    ..EpisodeFilter::default()
                }),
                None,
            )
            .unwrap();
        assert_eq!(
            overlapping
                .iter()
                .map(|e| e.episode_id.as_str())
                .collect::<Vec<_>>(),
            ["ep-late", "ep-open"]
        );

        let tagged = store
            .list_episodes(
                &scope,
                Some(&EpisodeFilter {
                    tags: vec!["session".to_string()],
                    ..EpisodeFilter::default()
                }),
                None,
            )
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].episode_id, "ep-open");
    }

    #[test]
    fn test_append_episode_duplicate_conflicts() {
        let store = backend();
        let scope = sample_scope();
        let episode = sample_episode("ep-1", 0, None);
        store.append_episode(&scope, &episode).unwrap();
        assert_eq!(
            store.append_episode(&scope, &episode).unwrap_err().code(),
            "conflict"
        );
    }

    #[test]
    fn test_procedures_ranked_and_filtered() {
        let store = backend();
        let scope = sample_scope();
        for (id, task, successes) in [
            ("p-best", "booking", 9),
            ("p-worst", "booking", 1),
            ("p-other", "search", 5),
        ] {
            let procedure = Procedure {
                procedure_id: id.to_string(),
                task_type: task.to_string(),
                steps: vec!["step".to_string()],
                preconditions: Vec::new(),
                postconditions: Vec::new(),
                success_count: successes,
                failure_count: 0,
                created_ms: None,
                updated_ms: None,
                extra: Default::default(),
            };
            store.upsert_procedure(&scope, &procedure).unwrap();
        }

        let booking = store
            .list_procedures(&scope, Some("booking"), None)
            .unwrap();
        assert_eq!(
            booking
                .iter()
                .map(|p| p.procedure_id.as_str())
                .collect::<Vec<_>>(),
            ["p-best", "p-worst"]
        );

        let all = store.list_procedures(&scope, None, Some(2)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].procedure_id, "p-best");
    }

    #[test]
    fn test_insights_ordered_by_confidence() {
        let store = backend();
        let scope = sample_scope();
        for (id, confidence) in [("i-weak", 0.3), ("i-strong", 0.95), ("i-mid", 0.6)] {
            let insight = Insight {
                insight_id: id.to_string(),
                statement: "observed".to_string(),
                confidence,
                evidence_refs: Vec::new(),
                created_ms: None,
                extra: Default::default(),
            };
            store.append_insight(&scope, &insight).unwrap();
        }

        let insights = store.list_insights(&scope, None, None).unwrap();
        assert_eq!(
            insights
                .iter()
                .map(|i| i.insight_id.as_str())
                .collect::<Vec<_>>(),
            ["i-strong", "i-mid", "i-weak"]
        );

        let confident = store
            .list_insights(
                &scope,
                Some(&InsightFilter {
                    min_confidence: Some(0.5),
                }),
                None,
            )
            .unwrap();
        assert_eq!(confident.len(), 2);
    }

    #[test]
    fn test_context_build_round_trip() {
        let store = backend();
        let scope = sample_scope();
        let build = ContextBuild {
            scope: scope.clone(),
            created_ms: 42,
            packet: json!({"meta": {"schema_version": "1"}}),
        };
        store.write_context_build(&scope, &build).unwrap();

        let builds = store.list_context_builds(&scope, Some(10)).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].created_ms, 42);
        assert_eq!(builds[0].packet["meta"]["schema_version"], "1");
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.db");
        let path = path.to_str().unwrap();
        let scope = sample_scope();

        {
            let store = SqliteBackend::open(path).unwrap();
            store.append_event(&sample_event(&scope, "e-1")).unwrap();
        }

        let reopened = SqliteBackend::open(path).unwrap();
        let events = reopened.list_events(&scope, None, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "e-1");
        assert_eq!(events[0].kind, EventKind::Message);
    }
}
