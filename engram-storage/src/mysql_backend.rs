//! MySQL-compatible remote backend.
//!
//! Same logical schema as the embedded store, adjusted for the MySQL
//! dialect. A connection pool with the configured min/max bounds is held for
//! the backend's lifetime; each operation acquires a connection, executes,
//! and releases it back.

use mysql::prelude::Queryable;
use mysql::{params, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, TxOpts};
use serde_json::Value;
use tracing::info;

use engram_core::{
    merge_values, now_ms, ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event,
    Fact, FactFilter, Insight, InsightFilter, Procedure, Scope, StoreConfig, TimeRange,
    WorkingState,
};

use crate::{decode_record, encode_record, next_state_version, shares_tag, StorageBackend};

/// MySQL duplicate-key error number.
const ER_DUP_ENTRY: u16 = 1062;

/// Secondary indexes are declared inline because MySQL has no
/// `CREATE INDEX IF NOT EXISTS`.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        scope_hash  VARCHAR(64) NOT NULL,
        event_id    VARCHAR(255) NOT NULL,
        ts_ms       BIGINT NOT NULL,
        kind        VARCHAR(32) NOT NULL,
        record_json LONGTEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, event_id),
        KEY idx_events_scope_ts (scope_hash, ts_ms DESC)
    )",
    "CREATE TABLE IF NOT EXISTS working_state (
        scope_hash    VARCHAR(64) NOT NULL,
        record_json   LONGTEXT NOT NULL,
        state_version BIGINT NOT NULL,
        updated_ms    BIGINT NOT NULL,
        PRIMARY KEY (scope_hash)
    )",
    "CREATE TABLE IF NOT EXISTS stm (
        scope_hash  VARCHAR(64) NOT NULL,
        record_json LONGTEXT NOT NULL,
        updated_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash)
    )",
    "CREATE TABLE IF NOT EXISTS facts (
        scope_hash  VARCHAR(64) NOT NULL,
        fact_id     VARCHAR(255) NOT NULL,
        fact_key    VARCHAR(255) NOT NULL,
        status      VARCHAR(16) NOT NULL,
        confidence  DOUBLE NOT NULL,
        record_json LONGTEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        updated_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, fact_id),
        KEY idx_facts_scope_key (scope_hash, fact_key)
    )",
    "CREATE TABLE IF NOT EXISTS episodes (
        scope_hash  VARCHAR(64) NOT NULL,
        episode_id  VARCHAR(255) NOT NULL,
        start_ms    BIGINT NOT NULL,
        end_ms      BIGINT NULL,
        record_json LONGTEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, episode_id)
    )",
    "CREATE TABLE IF NOT EXISTS procedures (
        scope_hash    VARCHAR(64) NOT NULL,
        procedure_id  VARCHAR(255) NOT NULL,
        task_type     VARCHAR(255) NOT NULL,
        success_count BIGINT NOT NULL,
        record_json   LONGTEXT NOT NULL,
        created_ms    BIGINT NOT NULL,
        updated_ms    BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, procedure_id),
        KEY idx_procedures_scope_task (scope_hash, task_type)
    )",
    "CREATE TABLE IF NOT EXISTS insights (
        scope_hash  VARCHAR(64) NOT NULL,
        insight_id  VARCHAR(255) NOT NULL,
        confidence  DOUBLE NOT NULL,
        record_json LONGTEXT NOT NULL,
        created_ms  BIGINT NOT NULL,
        PRIMARY KEY (scope_hash, insight_id)
    )",
    "CREATE TABLE IF NOT EXISTS context_builds (
        scope_hash  VARCHAR(64) NOT NULL,
        created_ms  BIGINT NOT NULL,
        packet_json LONGTEXT NOT NULL,
        PRIMARY KEY (scope_hash, created_ms)
    )",
];

/// Remote MySQL-compatible backend.
pub struct MysqlBackend {
    pool: Pool,
}

impl MysqlBackend {
    /// Connect, size the pool, and run the idempotent schema bootstrap.
    pub fn connect(config: &StoreConfig) -> EngramResult<Self> {
        let dsn = config.dsn.as_deref().ok_or_else(|| EngramError::InvalidArgument {
            field: "dsn".to_string(),
            reason: "mysql backend requires a dsn".to_string(),
        })?;
        let opts = Opts::from_url(dsn).map_err(|e| EngramError::InvalidArgument {
            field: "dsn".to_string(),
            reason: e.to_string(),
        })?;
        let constraints = PoolConstraints::new(
            config.pool.min_connections as usize,
            config.pool.max_connections as usize,
        )
        .ok_or_else(|| EngramError::InvalidArgument {
            field: "pool".to_string(),
            reason: "min_connections must not exceed max_connections".to_string(),
        })?;
        let mut builder = OptsBuilder::from_opts(opts)
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        if let Some(db) = &config.database {
            builder = builder.db_name(Some(db));
        }

        let pool = Pool::new(builder).map_err(|e| EngramError::BackendUnavailable {
            reason: format!("mysql pool: {e}"),
        })?;

        let backend = Self { pool };
        let mut conn = backend.conn()?;
        for statement in SCHEMA {
            conn.query_drop(*statement).map_err(map_db_err("schema", ""))?;
        }
        info!("mysql schema ready");
        Ok(backend)
    }

    fn conn(&self) -> EngramResult<mysql::PooledConn> {
        self.pool.get_conn().map_err(|e| EngramError::BackendUnavailable {
            reason: format!("mysql connection: {e}"),
        })
    }
}

/// Translate driver failures: duplicate key is a conflict, everything else
/// on the wire is availability.
fn map_db_err(entity: &str, id: &str) -> impl Fn(mysql::Error) -> EngramError {
    let entity = entity.to_string();
    let id = id.to_string();
    move |e| match &e {
        mysql::Error::MySqlError(server) if server.code == ER_DUP_ENTRY => EngramError::Conflict {
            entity: entity.clone(),
            id: id.clone(),
            reason: "duplicate id".to_string(),
        },
        _ => EngramError::BackendUnavailable {
            reason: e.to_string(),
        },
    }
}

fn limit_clause(limit: Option<u32>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    }
}

impl StorageBackend for MysqlBackend {
    // === Events ===

    fn append_event(&self, event: &Event) -> EngramResult<()> {
        event.scope.validate()?;
        let mut stamped = event.clone();
        let now = now_ms();
        let ts_ms = *stamped.ts_ms.get_or_insert(now);
        stamped.created_ms.get_or_insert(now);
        let body = encode_record("event", &stamped)?;

        self.conn()?
            .exec_drop(
                "INSERT INTO events (scope_hash, event_id, ts_ms, kind, record_json, created_ms)
                 VALUES (:scope_hash, :event_id, :ts_ms, :kind, :record_json, :created_ms)",
                params! {
                    "scope_hash" => stamped.scope.hash().as_str(),
                    "event_id" => &stamped.event_id,
                    "ts_ms" => ts_ms,
                    "kind" => stamped.kind.as_db_str(),
                    "record_json" => &body,
                    "created_ms" => stamped.created_ms,
                },
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
        let sql = format!(
            "SELECT record_json FROM events
             WHERE scope_hash = :scope_hash AND ts_ms >= :start AND ts_ms <= :end
             ORDER BY ts_ms DESC, event_id DESC{}",
            limit_clause(limit)
        );

        let bodies: Vec<String> = self
            .conn()?
            .exec(
                sql,
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "start" => start,
                    "end" => end,
                },
            )
            .map_err(map_db_err("event", ""))?;
        bodies.iter().map(|b| decode_record("event", b)).collect()
    }

    // === Working state & STM ===

    fn get_working_state(&self, scope: &Scope) -> EngramResult<Option<WorkingState>> {
        scope.validate()?;
        let body: Option<String> = self
            .conn()?
            .exec_first(
                "SELECT record_json FROM working_state WHERE scope_hash = :scope_hash",
                params! { "scope_hash" => scope.hash().as_str() },
            )
            .map_err(map_db_err("working_state", ""))?;
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

        let mut conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(map_db_err("working_state", ""))?;

        let stored_body: Option<String> = tx
            .exec_first(
                "SELECT record_json FROM working_state WHERE scope_hash = :scope_hash FOR UPDATE",
                params! { "scope_hash" => scope.hash().as_str() },
            )
            .map_err(map_db_err("working_state", ""))?;
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

        tx.exec_drop(
            "INSERT INTO working_state (scope_hash, record_json, state_version, updated_ms)
             VALUES (:scope_hash, :record_json, :state_version, :updated_ms)
             ON DUPLICATE KEY UPDATE
                 record_json = VALUES(record_json),
                 state_version = VALUES(state_version),
                 updated_ms = VALUES(updated_ms)",
            params! {
                "scope_hash" => scope.hash().as_str(),
                "record_json" => &body,
                "state_version" => version,
                "updated_ms" => state.updated_ms,
            },
        )
        .map_err(map_db_err("working_state", ""))?;
        tx.commit().map_err(map_db_err("working_state", ""))?;
        Ok(state)
    }

    fn get_stm(&self, scope: &Scope) -> EngramResult<Option<Value>> {
        scope.validate()?;
        let body: Option<String> = self
            .conn()?
            .exec_first(
                "SELECT record_json FROM stm WHERE scope_hash = :scope_hash",
                params! { "scope_hash" => scope.hash().as_str() },
            )
            .map_err(map_db_err("stm", ""))?;
        body.map(|b| decode_record("stm", &b)).transpose()
    }

    fn update_stm(&self, scope: &Scope, stm: &Value) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("stm", stm)?;
        self.conn()?
            .exec_drop(
                "INSERT INTO stm (scope_hash, record_json, updated_ms)
                 VALUES (:scope_hash, :record_json, :updated_ms)
                 ON DUPLICATE KEY UPDATE
                     record_json = VALUES(record_json),
                     updated_ms = VALUES(updated_ms)",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "record_json" => &body,
                    "updated_ms" => now_ms(),
                },
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
        let fact_key = filter.and_then(|f| f.fact_key.clone());
        let status = filter.and_then(|f| f.status).map(|s| s.as_db_str());
        let min_confidence = filter.and_then(|f| f.min_confidence);
        let tags = filter.map(|f| f.tags.clone()).unwrap_or_default();
        let sql_limit = if tags.is_empty() { limit } else { None };
        let sql = format!(
            "SELECT record_json FROM facts
             WHERE scope_hash = :scope_hash
               AND (:fact_key IS NULL OR fact_key = :fact_key)
               AND (:status IS NULL OR status = :status)
               AND (:min_confidence IS NULL OR confidence >= :min_confidence)
             ORDER BY confidence DESC, updated_ms DESC, fact_id ASC{}",
            limit_clause(sql_limit)
        );

        let bodies: Vec<String> = self
            .conn()?
            .exec(
                sql,
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "fact_key" => fact_key,
                    "status" => status,
                    "min_confidence" => min_confidence,
                },
            )
            .map_err(map_db_err("fact", ""))?;

        let mut facts: Vec<Fact> = Vec::new();
        for body in &bodies {
            let fact: Fact = decode_record("fact", body)?;
            if shares_tag(&fact.tags, &tags) {
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
            .start_transaction(TxOpts::default())
            .map_err(map_db_err("fact", &fact.fact_id))?;

        let existing_created: Option<i64> = tx
            .exec_first(
                "SELECT created_ms FROM facts
                 WHERE scope_hash = :scope_hash AND fact_id = :fact_id FOR UPDATE",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "fact_id" => &fact.fact_id,
                },
            )
            .map_err(map_db_err("fact", &fact.fact_id))?;

        let now = now_ms();
        let mut stamped = fact.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("fact", &stamped)?;

        tx.exec_drop(
            "INSERT INTO facts
                 (scope_hash, fact_id, fact_key, status, confidence, record_json, created_ms, updated_ms)
             VALUES (:scope_hash, :fact_id, :fact_key, :status, :confidence, :record_json, :created_ms, :updated_ms)
             ON DUPLICATE KEY UPDATE
                 fact_key = VALUES(fact_key),
                 status = VALUES(status),
                 confidence = VALUES(confidence),
                 record_json = VALUES(record_json),
                 updated_ms = VALUES(updated_ms)",
            params! {
                "scope_hash" => scope.hash().as_str(),
                "fact_id" => &stamped.fact_id,
                "fact_key" => &stamped.fact_key,
                "status" => stamped.status.as_db_str(),
                "confidence" => stamped.confidence,
                "record_json" => &body,
                "created_ms" => stamped.created_ms,
                "updated_ms" => stamped.updated_ms,
            },
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
        let tags = filter.map(|f| f.tags.clone()).unwrap_or_default();
        let sql_limit = if tags.is_empty() { limit } else { None };
        let sql = format!(
            "SELECT record_json FROM episodes
             WHERE scope_hash = :scope_hash
               AND (:window_start IS NULL OR COALESCE(end_ms, 9223372036854775807) >= :window_start)
               AND (:window_end IS NULL OR start_ms <= :window_end)
             ORDER BY start_ms DESC{}",
            limit_clause(sql_limit)
        );

        let bodies: Vec<String> = self
            .conn()?
            .exec(
                sql,
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "window_start" => window_start,
                    "window_end" => window_end,
                },
            )
            .map_err(map_db_err("episode", ""))?;

        let mut episodes: Vec<Episode> = Vec::new();
        for body in &bodies {
            let episode: Episode = decode_record("episode", body)?;
            if shares_tag(&episode.tags, &tags) {
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
            .exec_drop(
                "INSERT INTO episodes (scope_hash, episode_id, start_ms, end_ms, record_json, created_ms)
                 VALUES (:scope_hash, :episode_id, :start_ms, :end_ms, :record_json, :created_ms)",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "episode_id" => &stamped.episode_id,
                    "start_ms" => stamped.time_range.start,
                    "end_ms" => stamped.time_range.end,
                    "record_json" => &body,
                    "created_ms" => stamped.created_ms,
                },
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
        let sql = format!(
            "SELECT record_json FROM procedures
             WHERE scope_hash = :scope_hash
               AND (:task_type IS NULL OR task_type = :task_type)
             ORDER BY success_count DESC, updated_ms DESC{}",
            limit_clause(limit)
        );

        let bodies: Vec<String> = self
            .conn()?
            .exec(
                sql,
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "task_type" => task_type,
                },
            )
            .map_err(map_db_err("procedure", ""))?;
        bodies.iter().map(|b| decode_record("procedure", b)).collect()
    }

    fn upsert_procedure(&self, scope: &Scope, procedure: &Procedure) -> EngramResult<()> {
        scope.validate()?;
        let mut conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(map_db_err("procedure", &procedure.procedure_id))?;

        let existing_created: Option<i64> = tx
            .exec_first(
                "SELECT created_ms FROM procedures
                 WHERE scope_hash = :scope_hash AND procedure_id = :procedure_id FOR UPDATE",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "procedure_id" => &procedure.procedure_id,
                },
            )
            .map_err(map_db_err("procedure", &procedure.procedure_id))?;

        let now = now_ms();
        let mut stamped = procedure.clone();
        stamped.created_ms = existing_created.or(stamped.created_ms).or(Some(now));
        stamped.updated_ms = Some(stamped.updated_ms.unwrap_or(now));
        let body = encode_record("procedure", &stamped)?;

        tx.exec_drop(
            "INSERT INTO procedures
                 (scope_hash, procedure_id, task_type, success_count, record_json, created_ms, updated_ms)
             VALUES (:scope_hash, :procedure_id, :task_type, :success_count, :record_json, :created_ms, :updated_ms)
             ON DUPLICATE KEY UPDATE
                 task_type = VALUES(task_type),
                 success_count = VALUES(success_count),
                 record_json = VALUES(record_json),
                 updated_ms = VALUES(updated_ms)",
            params! {
                "scope_hash" => scope.hash().as_str(),
                "procedure_id" => &stamped.procedure_id,
                "task_type" => &stamped.task_type,
                "success_count" => stamped.success_count,
                "record_json" => &body,
                "created_ms" => stamped.created_ms,
                "updated_ms" => stamped.updated_ms,
            },
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
        let sql = format!(
            "SELECT record_json FROM insights
             WHERE scope_hash = :scope_hash
               AND (:min_confidence IS NULL OR confidence >= :min_confidence)
             ORDER BY confidence DESC, created_ms DESC{}",
            limit_clause(limit)
        );

        let bodies: Vec<String> = self
            .conn()?
            .exec(
                sql,
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "min_confidence" => min_confidence,
                },
            )
            .map_err(map_db_err("insight", ""))?;
        bodies.iter().map(|b| decode_record("insight", b)).collect()
    }

    fn append_insight(&self, scope: &Scope, insight: &Insight) -> EngramResult<()> {
        scope.validate()?;
        let mut stamped = insight.clone();
        stamped.created_ms.get_or_insert(now_ms());
        let body = encode_record("insight", &stamped)?;

        self.conn()?
            .exec_drop(
                "INSERT INTO insights (scope_hash, insight_id, confidence, record_json, created_ms)
                 VALUES (:scope_hash, :insight_id, :confidence, :record_json, :created_ms)",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "insight_id" => &stamped.insight_id,
                    "confidence" => stamped.confidence,
                    "record_json" => &body,
                    "created_ms" => stamped.created_ms,
                },
            )
            .map_err(map_db_err("insight", &insight.insight_id))?;
        Ok(())
    }

    // === Context-build audit log ===

    fn write_context_build(&self, scope: &Scope, build: &ContextBuild) -> EngramResult<()> {
        scope.validate()?;
        let body = encode_record("context_build", &build.packet)?;
        self.conn()?
            .exec_drop(
                "INSERT INTO context_builds (scope_hash, created_ms, packet_json)
                 VALUES (:scope_hash, :created_ms, :packet_json)",
                params! {
                    "scope_hash" => scope.hash().as_str(),
                    "created_ms" => build.created_ms,
                    "packet_json" => &body,
                },
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
        let sql = format!(
            "SELECT created_ms, packet_json FROM context_builds
             WHERE scope_hash = :scope_hash
             ORDER BY created_ms DESC{}",
            limit_clause(limit)
        );

        let rows: Vec<(i64, String)> = self
            .conn()?
            .exec(sql, params! { "scope_hash" => scope.hash().as_str() })
            .map_err(map_db_err("context_build", ""))?;
        rows.into_iter()
            .map(|(created_ms, body)| {
                Ok(ContextBuild {
                    scope: scope.clone(),
                    created_ms,
                    packet: decode_record("context_build", &body)?,
                })
            })
            .collect()
    }
}
