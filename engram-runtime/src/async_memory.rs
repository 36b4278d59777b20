//! Async facade: every store operation as a dispatcher-backed future.
//!
//! Writes to one scope land on one write queue in submission order; reads
//! run in parallel under the scope read lock. Packet builds retrieve under
//! the read lock (consistent snapshot) and persist afterwards as a detached
//! write unless `persist_strict` asks for the failure to propagate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use engram_core::{
    ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event, Fact, FactFilter,
    Insight, InsightFilter, MemoryPacket, PacketRequest, Procedure, Scope, StoreConfig, TimeRange,
    WorkingState,
};

use crate::{Dispatcher, Memory};

/// Asynchronous Engram store for cooperative callers.
#[derive(Clone)]
pub struct AsyncMemory {
    memory: Memory,
    dispatcher: Arc<Dispatcher>,
}

impl AsyncMemory {
    /// Open the configured backend and start the worker pool.
    pub fn open(config: StoreConfig) -> EngramResult<Self> {
        let workers = config
            .worker_threads
            .unwrap_or_else(Dispatcher::default_worker_threads);
        let dispatcher = Arc::new(Dispatcher::new(
            workers,
            config.scope_lock_capacity,
            Duration::from_millis(config.op_deadline_ms),
        ));
        Ok(Self {
            memory: Memory::open(config)?,
            dispatcher,
        })
    }

    /// In-memory SQLite store, for demos and tests.
    pub fn in_memory() -> EngramResult<Self> {
        Self::open(StoreConfig::sqlite_memory())
    }

    /// The underlying synchronous facade, for callers that want to mix
    /// blocking access on their own threads.
    pub fn sync(&self) -> &Memory {
        &self.memory
    }

    // === Events ===

    pub async fn append_event(&self, event: Event) -> EngramResult<()> {
        event.scope.validate()?;
        let hash = event.scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.append_event(&event));
        self.dispatcher.run("append_event", rx).await
    }

    pub async fn list_events(
        &self,
        scope: Scope,
        time_range: Option<TimeRange>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Event>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.list_events(&scope, time_range.as_ref(), limit)
        });
        self.dispatcher.run("list_events", rx).await
    }

    // === Working state & STM ===

    pub async fn get_working_state(&self, scope: Scope) -> EngramResult<Option<WorkingState>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_read(&hash, move || memory.get_working_state(&scope));
        self.dispatcher.run("get_working_state", rx).await
    }

    pub async fn patch_working_state(
        &self,
        scope: Scope,
        patch: Value,
    ) -> EngramResult<WorkingState> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.patch_working_state(&scope, &patch));
        self.dispatcher.run("patch_working_state", rx).await
    }

    pub async fn get_stm(&self, scope: Scope) -> EngramResult<Option<Value>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || memory.get_stm(&scope));
        self.dispatcher.run("get_stm", rx).await
    }

    pub async fn update_stm(&self, scope: Scope, stm: Value) -> EngramResult<()> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.update_stm(&scope, &stm));
        self.dispatcher.run("update_stm", rx).await
    }

    // === Facts ===

    pub async fn list_facts(
        &self,
        scope: Scope,
        filter: Option<FactFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Fact>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.list_facts(&scope, filter.as_ref(), limit)
        });
        self.dispatcher.run("list_facts", rx).await
    }

    pub async fn upsert_fact(&self, scope: Scope, fact: Fact) -> EngramResult<()> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.upsert_fact(&scope, &fact));
        self.dispatcher.run("upsert_fact", rx).await
    }

    // === Episodes ===

    pub async fn list_episodes(
        &self,
        scope: Scope,
        filter: Option<EpisodeFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Episode>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.list_episodes(&scope, filter.as_ref(), limit)
        });
        self.dispatcher.run("list_episodes", rx).await
    }

    pub async fn append_episode(&self, scope: Scope, episode: Episode) -> EngramResult<()> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.append_episode(&scope, &episode));
        self.dispatcher.run("append_episode", rx).await
    }

    // === Procedures ===

    pub async fn list_procedures(
        &self,
        scope: Scope,
        task_type: Option<String>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Procedure>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.list_procedures(&scope, task_type.as_deref(), limit)
        });
        self.dispatcher.run("list_procedures", rx).await
    }

    pub async fn upsert_procedure(&self, scope: Scope, procedure: Procedure) -> EngramResult<()> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.upsert_procedure(&scope, &procedure));
        self.dispatcher.run("upsert_procedure", rx).await
    }

    // === Insights ===

    pub async fn list_insights(
        &self,
        scope: Scope,
        filter: Option<InsightFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Insight>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.list_insights(&scope, filter.as_ref(), limit)
        });
        self.dispatcher.run("list_insights", rx).await
    }

    pub async fn append_insight(&self, scope: Scope, insight: Insight) -> EngramResult<()> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_write(&hash, move || memory.append_insight(&scope, &insight));
        self.dispatcher.run("append_insight", rx).await
    }

    // === Context builds ===

    pub async fn list_context_builds(
        &self,
        scope: Scope,
        limit: Option<u32>,
    ) -> EngramResult<Vec<ContextBuild>> {
        scope.validate()?;
        let hash = scope.hash();
        let memory = self.memory.clone();
        let rx = self
            .dispatcher
            .submit_read(&hash, move || memory.list_context_builds(&scope, limit));
        self.dispatcher.run("list_context_builds", rx).await
    }

    // === Composition ===

    /// Compose a packet from a consistent snapshot of the scope.
    ///
    /// Retrieval and fitting run as one read job under the scope read lock,
    /// so no concurrent write to the scope interleaves. The audit write runs
    /// afterwards: detached fire-and-forget by default, awaited when
    /// `persist_strict` is set.
    pub async fn build_memory_packet(&self, request: PacketRequest) -> EngramResult<MemoryPacket> {
        request.scope.validate()?;
        let hash = request.scope.hash();
        let scope = request.scope.clone();
        let persist = request.persist;
        let persist_strict = request.persist_strict;

        let mut snapshot_request = request;
        snapshot_request.persist = false;
        let memory = self.memory.clone();
        let rx = self.dispatcher.submit_read(&hash, move || {
            memory.build_memory_packet(&snapshot_request)
        });
        let packet = self.dispatcher.run("build_memory_packet", rx).await?;

        if persist {
            let packet_value =
                serde_json::to_value(&packet).map_err(|e| EngramError::Internal {
                    reason: format!("failed to serialise packet: {e}"),
                })?;
            let build = ContextBuild {
                scope: scope.clone(),
                created_ms: packet.meta.created_ms,
                packet: packet_value,
            };
            let memory = self.memory.clone();
            if persist_strict {
                let rx = self
                    .dispatcher
                    .submit_write(&hash, move || memory.write_context_build(&scope, &build));
                self.dispatcher.run("write_context_build", rx).await?;
            } else {
                self.dispatcher
                    .submit_write_detached(&hash, "write_context_build", move || {
                        memory.write_context_build(&scope, &build)
                    });
            }
        }

        Ok(packet)
    }
}
