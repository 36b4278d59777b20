//! Postgres-compatible remote backend.
//!
//! Mirrors the embedded schema with Postgres types. Connections come from an
//! r2d2 pool sized by the configured min/max bounds and held for the
//! backend's lifetime.

use postgres::error::SqlState;
use postgres::{Config, NoTls};
use r2d2_postgres::PostgresConnectionManager;
use serde_json::Value;
use tracing::info;

use engram_core::{
    merge_values, now_ms, ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event,
    Fact, FactFilter, Insight, InsightFilter, Procedure, Scope, StoreConfig, TimeRange,
    WorkingState,
};

use crate::{decode_record, encode_record, next_state_version, shares_tag, StorageBackend};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        scope_hash  TEXT NOT NULL,
        event_id    TEXT NOT NULL,
        ts_ms       BIGINT NOT NULL,
        kind        TEXT NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, event_id)
    );
    CREATE INDEX IF NOT EXISTS idx_events_scope_ts
        ON events(scope_hash, ts_ms DESC);

    CREATE TABLE IF NOT EXISTS working_state (
        scope_hash    TEXT PRIMARY KEY,
        record_json   TEXT NOT NULL,
        state_version BIGINT NOT NULL,
        updated_ms    BIGINT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS stm (
        scope_hash  TEXT PRIMARY KEY,
        record_json TEXT NOT NULL,
        updated_ms  BIGINT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS facts (
        scope_hash  TEXT NOT NULL,
        fact_id     TEXT NOT NULL,
        fact_key    TEXT NOT NULL,
        status      TEXT NOT NULL,
        confidence  DOUBLE PRECISION NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        updated_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, fact_id)
    );
    CREATE INDEX IF NOT EXISTS idx_facts_scope_key
        ON facts(scope_hash, fact_key);

    CREATE TABLE IF NOT EXISTS episodes (
        scope_hash  TEXT NOT NULL,
        episode_id  TEXT NOT NULL,
        start_ms    BIGINT NOT NULL,
        end_ms      BIGINT,
        record_json TEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, episode_id)
    );

    CREATE TABLE IF NOT EXISTS procedures (
        scope_hash    TEXT NOT NULL,
        procedure_id  TEXT NOT NULL,
        task_type     TEXT NOT NULL,
        success_count BIGINT NOT NULL,
        record_json   TEXT NOT NULL,
        created_ms    BIGINT NOT NULL,
        updated_ms    BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, procedure_id)
    );
    CREATE INDEX IF NOT EXISTS idx_procedures_scope_task
        ON procedures(scope_hash, task_type);

    CREATE TABLE IF NOT EXISTS insights (
        scope_hash  TEXT NOT NULL,
        insight_id  TEXT NOT NULL,
        confidence  DOUBLE PRECISION NOT NULL,
        record_json TEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, insight_id)
    );

    CREATE TABLE IF NOT EXISTS context_builds (
        scope_hash  TEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        packet_json TEXT NOT NULL,
        PRIMARY KEY (scope_hash, created_ms)
    );
";

type PgPool = r2d2::Pool<PostgresConnectionManager<NoTls>>;

/// Remote Postgres-compatible backend.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect, size the pool, and run the idempotent schema bootstrap.
    pub fn connect(config: &StoreConfig) -> EngramResult<Self> {
        let dsn = config.dsn.as_deref().ok_or_else(|| EngramError::InvalidArgument {
            field: "dsn".to_string(),
            reason: "postgres backend requires a dsn".to_string(),
        })?;
        let mut pg_config: Config = dsn.parse().map_err(|e: postgres::Error| {
            EngramError::InvalidArgument {
                field: "dsn".to_string(),
                reason: e.to_string(),
            }
        })?;
        if let Some(db) = &config.database {
            pg_config.dbname(db);
        }

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = r2d2::Pool::builder()
            .min_idle(Some(config.pool.min_connections))
            .max_size(config.pool.max_connections)
            .build(manager)
            .map_err(|e| EngramError::BackendUnavailable {
                reason: format!("postgres pool: {e}"),
            })?;

        let backend = Self { pool };
        backend.conn()?.batch_execute(SCHEMA).map_err(map_db_err("schema", ""))?;
        info!("postgres schema ready");
        Ok(backend)
    }

    fn conn(&self) -> EngramResult<r2d2::PooledConnection<PostgresConnectionManager<NoTls>>> {
        self.pool.get().map_err(|e| EngramError::BackendUnavailable {
            reason: format!("postgres connection: {e}"),
        })
    }
}

/// Unique violations are conflicts; anything else from the driver is
/// availability.
fn map_db_err(entity: &str, id: &str) -> impl Fn(postgres::Error) -> EngramError {
    let entity = entity.to_string();
    let id = id.to_string();
    move |e| {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            EngramError::Conflict {
                entity: entity.clone(),
                id: id.clone(),
                reason: "duplicate id".to_string(),
            }
        } else {
            EngramError::BackendUnavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// Postgres treats `LIMIT NULL` as `LIMIT ALL`.
fn sql_limit(limit: Option<u32>) -> Option<i64> {
    limit.map(i64::from)
}

impl StorageBackend for PostgresBackend {
    // === Events ===

    fn append_event(&self, event: &Event) -> EngramResult<()> {
        event.scope.validate()?;
        let mut stamped = event.clone();
        let now = now_ms();
        let ts_ms = *stamped.ts_ms.get_or_insert(now);
        stamped.created_ms.get_or_insert(now);
        let body = encode_record("event", &stamped)?;

        self.conn()?
            .execute(
                "INSERT INTO events (scope_hash, event_id, ts_ms, kind, record_json, created_ms)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &stamped.scope.hash().as_str(),
                    &stamped.event_id,
                    &ts_ms,
                    &stamped.kind.as_db_str(),
                    &body,
                    &stamped.created_ms,
                ],
            )
            .map_err(map_db_err("event", &event.event_id))?;
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

        let rows = self
            .conn()?
            .query(
                "SELECT record_json FROM events
                 WHERE scope_hash = $1 AND ts_ms >= $2 AND ts_ms <= $3
                 ORDER BY ts_ms DESC, event_id DESC
                 LIMIT $4",
                &[&scope.hash().as_str(), &start, &end, &sql_limit(limit)],
            )
            .map_err(map_db_err("event", ""))?;
        rows.iter()
            .map(|row| decode_record("event", row.get(0)))
            .collect()
    }

    // === Working state & STM ===

    fn get_working_state(&self, scope: &Scope) -> EngramResult<Option<WorkingState>> {
        scope.validate()?;
        let row = self
            .conn()?
            .query_opt(
                "SELECT record_json FROM working_state WHERE scope_hash = $1",
                &[&scope.hash().as_str()],
            )
            .map_err(map_db_err("working_state", ""))?;
        row.map(|r| decode_record("working_state", r.get(0))).transpose()
    }

    fn patch_working_state(&self, scope: &Scope, patch: &Value) -> EngramResult<WorkingState> {
        scope.validate()?;
        if !patch.is_object() {
            return Err(EngramError::InvalidArgument {
                field: "patch".to_string(),
                reason: "working-state patch must be a mapping".to_string(),
            });
        }

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(map_db_err("working_state", ""))?;

        let stored_row = tx
            .query_opt(
                "SELECT record_json FROM working_state WHERE scope_hash = $1 FOR UPDATE",
                &[&scope.hash().as_str()],
            )
            .map_err(map_db_err("working_state", ""))?;
        let stored: Value = match stored_row {
            Some(row) => {
                serde_json::from_str(row.get(0)).map_err(|e| EngramError::Corruption {
                    entity: "working_state".to_string(),
                    reason: e.to_string(),
                })?
            }
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
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (scope_hash) DO UPDATE SET
                 record_json = EXCLUDED.record_json,
                 state_version = EXCLUDED.state_version,
                 updated_ms = EXCLUDED.updated_ms",
            &[
                &scope.hash().as_str(),
                &body,
                &(version as i64),
                &state.updated_ms,
            ],
        )
        .map_err(map_db_err("working_state", ""))?;
        tx.commit().map_err(map_db_err("working_state", ""))?;
        Ok(state)
    }

    fn get_stm(&self, scope: &Scope) -> EngramResult<Option<Value>> {
        scope.validate()?;
        let row = self
            .conn()?
            .query_opt(
                "SELECT record_json FROM stm WHERE scope_hash = $1",
                &[&scope.hash().as_str()],
            )
            .map_err(map_db_err("stm", ""))?;
        row.map(|r| decode_record("stm", r.get(0))).transpose()
    }

    fn update_stm(&self, scope: &Scope, stm: &Value) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("stm", stm)?;
        self.conn()?
            .execute(
                "INSERT INTO stm (scope_hash, record_json, updated_ms)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (scope_hash) DO UPDATE SET
                     record_json = EXCLUDED.record_json,
                     updated_ms = EXCLUDED.updated_ms",
                &[&scope.hash().as_str(), &body, &now_ms()],
            )
            .map_err(map_db_err("stm", ""))?;
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
        let sql_lim = if tags.is_empty() { sql_limit(limit) } else { None };

        let rows = self
            .conn()?
            .query(
                "SELECT record_json FROM facts
                 WHERE scope_hash = $1
                   AND ($2::TEXT IS NULL OR fact_key = $2)
                   AND ($3::TEXT IS NULL OR status = $3)
                   AND ($4::DOUBLE PRECISION IS NULL OR confidence >= $4)
                 ORDER BY confidence DESC, updated_ms DESC, fact_id ASC
                 LIMIT $5",
                &[
                    &scope.hash().as_str(),
                    &fact_key,
                    &status,
                    &min_confidence,
                    &sql_lim,
                ],
            )
            .map_err(map_db_err("fact", ""))?;

        let mut facts: Vec<Fact> = Vec::new();
        for row in &rows {
            let fact: Fact = decode_record("fact", row.get(0))?;
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
        let mut conn = self.conn()?;
        let mut tx = conn
            .transaction()
            .map_err(map_db_err("fact", &fact.fact_id))?;

        let existing_created: Option<i64> = tx
            .query_opt(
                "SELECT created_ms FROM facts WHERE scope_hash = $1 AND fact_id = $2 FOR UPDATE",
                &[&scope.hash().as_str(), &fact.fact_id],
            )
            .map_err(map_db_err("fact", &fact.fact_id))?
            .map(|row| row.get(0));

        let now = now_ms();
        let mut stamped = fact.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("fact", &stamped)?;

        tx.execute(
            "INSERT INTO facts
                 (scope_hash, fact_id, fact_key, status, confidence, record_json, created_ms, updated_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (scope_hash, fact_id) DO UPDATE SET
                 fact_key = EXCLUDED.fact_key,
                 status = EXCLUDED.status,
                 confidence = EXCLUDED.confidence,
                 record_json = EXCLUDED.record_json,
                 updated_ms = EXCLUDED.updated_ms",
            &[
                &scope.hash().as_str(),
                &stamped.fact_id,
                &stamped.fact_key,
                &stamped.status.as_db_str(),
                &stamped.confidence,
                &body,
                &stamped.created_ms,
                &stamped.updated_ms,
            ],
        )
        .map_err(map_db_err("fact", &stamped.fact_id))?;
        tx.commit().map_err(map_db_err("fact", &stamped.fact_id))?;
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
        let sql_lim = if tags.is_empty() { sql_limit(limit) } else { None };

        let rows = self
            .conn()?
            .query(
                "SELECT record_json FROM episodes
                 WHERE scope_hash = $1
                   AND ($2::BIGINT IS NULL OR COALESCE(end_ms, 9223372036854775807) >= $2)
                   AND ($3::BIGINT IS NULL OR start_ms <= $3)
                 ORDER BY start_ms DESC
                 LIMIT $4",
                &[&scope.hash().as_str(), &window_start, &window_end, &sql_lim],
            )
            .map_err(map_db_err("episode", ""))?;

        let mut episodes: Vec<Episode> = Vec::new();
        for row in &rows {
            let episode: Episode = decode_record("episode", row.get(0))?;
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

        self.conn()?
            .execute(
                "INSERT INTO episodes (scope_hash, episode_id, start_ms, end_ms, record_json, created_ms)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &scope.hash().as_str(),
                    &stamped.episode_id,
                    &stamped.time_range.start,
                    &stamped.time_range.end,
                    &body,
                    &stamped.created_ms,
                ],
            )
            .map_err(map_db_err("episode", &episode.episode_id))?;
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
        let rows = self
            .conn()?
            .query(
                "SELECT record_json FROM procedures
                 WHERE scope_hash = $1
                   AND ($2::TEXT IS NULL OR task_type = $2)
                 ORDER BY success_count DESC, updated_ms DESC
                 LIMIT $3",
                &[&scope.hash().as_str(), &task_type, &sql_limit(limit)],
            )
            .map_err(map_db_err("procedure", ""))?;
        rows.iter()
            .map(|row| decode_record("procedure", row.get(0)))
            .collect()
    }

    fn upsert_procedure(&self, scope: &Scope, procedure: &Procedure) -> EngramResult<()> {
        scope.validate()?;
        let mut conn = self.conn()?;
        let mut tx = conn
            .transaction()
            .map_err(map_db_err("procedure", &procedure.procedure_id))?;

        let existing_created: Option<i64> = tx
            .query_opt(
                "SELECT created_ms FROM procedures
                 WHERE scope_hash = $1 AND procedure_id = $2 FOR UPDATE",
                &[&scope.hash().as_str(), &procedure.procedure_id],
            )
            .map_err(map_db_err("procedure", &procedure.procedure_id))?
            .map(|row| row.get(0));

        let now = now_ms();
        let mut stamped = procedure.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("procedure", &stamped)?;

        tx.execute(
            "INSERT INTO procedures
                 (scope_hash, procedure_id, task_type, success_count, record_json, created_ms, updated_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (scope_hash, procedure_id) DO UPDATE SET
                 task_type = EXCLUDED.task_type,
                 success_count = EXCLUDED.success_count,
                 record_json = EXCLUDED.record_json,
                 updated_ms = EXCLUDED.updated_ms",
            &[
                &scope.hash().as_str(),
                &stamped.procedure_id,
                &stamped.task_type,
                &(stamped.success_count as i64),
                &body,
                &stamped.created_ms,
                &stamped.updated_ms,
            ],
        )
        .map_err(map_db_err("procedure", &stamped.procedure_id))?;
        tx.commit()
            .map_err(map_db_err("procedure", &stamped.procedure_id))?;
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
        let rows = self
            .conn()?
            .query(
                "SELECT record_json FROM insights
                 WHERE scope_hash = $1
                   AND ($2::DOUBLE PRECISION IS NULL OR confidence >= $2)
                 ORDER BY confidence DESC, created_ms DESC
                 LIMIT $3",
                &[&scope.hash().as_str(), &min_confidence, &sql_limit(limit)],
            )
            .map_err(map_db_err("insight", ""))?;
        rows.iter()
            .map(|row| decode_record("insight", row.get(0)))
            .collect()
    }

    fn append_insight(&self, scope: &Scope, insight: &Insight) -> EngramResult<()> {
        scope.validate()?;
        let mut stamped = insight.clone();
        stamped.created_ms.get_or_insert(now_ms());
        let body = encode_record("insight", &stamped)?;

        self.conn()?
            .execute(
                "INSERT INTO insights (scope_hash, insight_id, confidence, record_json, created_ms)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &scope.hash().as_str(),
                    &stamped.insight_id,
                    &stamped.confidence,
                    &body,
                    &stamped.created_ms,
                ],
            )
            .map_err(map_db_err("insight", &insight.insight_id))?;
        Ok(())
    }

    // === Context-build audit log ===

    fn write_context_build(&self, scope: &Scope, build: &ContextBuild) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("context_build", &build.packet)?;
        self.conn()?
            .execute(
                "INSERT INTO context_builds (scope_hash, created_ms, packet_json)
                 VALUES ($1, $2, $3)",
                &[&scope.hash().as_str(), &build.created_ms, &body],
            )
            .map_err(map_db_err("context_build", &build.created_ms.to_string()))?;
        Ok(())
    }

    fn list_context_builds(
        &self,
        scope: &Scope,
        limit: Option<u32>,
    ) -> EngramResult<Vec<ContextBuild>> {
        scope.validate()?;
        let rows = self
            .conn()?
            .query(
                "SELECT created_ms, packet_json FROM context_builds
                 WHERE scope_hash = $1
                 ORDER BY created_ms DESC
                 LIMIT $2",
                &[&scope.hash().as_str(), &sql_limit(limit)],
            )
            .map_err(map_db_err("context_build", ""))?;
        rows.iter()
            .map(|row| {
                Ok(ContextBuild {
                    scope: scope.clone(),
                    created_ms: row.get(0),
                    packet: decode_record("context_build", row.get(1))?,
                })
            })
            .collect()
    }
}
