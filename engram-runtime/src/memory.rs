//! Synchronous store facade: backend + composer behind one handle.

use std::sync::Arc;

use serde_json::Value;

use engram_context::ContextComposer;
use engram_core::{
    canonical_bytes, ContextBuild, EngramError, EngramResult, Episode, EpisodeFilter, Event, Fact,
    FactFilter, Insight, InsightFilter, MemoryPacket, PacketRequest, Procedure, Scope,
    StoreConfig, TimeRange, WorkingState,
};
use engram_storage::{open_backend, StorageBackend};

/// Synchronous Engram store. One per process; cheap to share via clone.
#[derive(Clone)]
pub struct Memory {
    backend: Arc<dyn StorageBackend>,
    composer: Arc<ContextComposer>,
    config: Arc<StoreConfig>,
}

impl Memory {
    /// Build the configured backend and wire the composer over it.
    pub fn open(config: StoreConfig) -> EngramResult<Self> {
        let backend = open_backend(&config)?;
        Ok(Self {
            composer: Arc::new(ContextComposer::new(backend.clone())),
            backend,
            config: Arc::new(config),
        })
    }

    /// In-memory SQLite store, for demos and tests.
    pub fn in_memory() -> EngramResult<Self> {
        Self::open(StoreConfig::sqlite_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // === Events ===

    pub fn append_event(&self, event: &Event) -> EngramResult<()> {
        self.backend.append_event(event)
    }

    pub fn list_events(
        &self,
        scope: &Scope,
        time_range: Option<&TimeRange>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Event>> {
        self.backend.list_events(scope, time_range, limit)
    }

    // === Working state & STM ===

    pub fn get_working_state(&self, scope: &Scope) -> EngramResult<Option<WorkingState>> {
        self.backend.get_working_state(scope)
    }

    pub fn patch_working_state(&self, scope: &Scope, patch: &Value) -> EngramResult<WorkingState> {
        self.backend.patch_working_state(scope, patch)
    }

    pub fn get_stm(&self, scope: &Scope) -> EngramResult<Option<Value>> {
        self.backend.get_stm(scope)
    }

    /// Whole-value STM replace, enforcing the configured byte cap.
    pub fn update_stm(&self, scope: &Scope, stm: &Value) -> EngramResult<()> {
        if let Some(cap) = self.config.max_stm_bytes {
            let size = canonical_bytes(stm).len();
            if size > cap {
                return Err(EngramError::InvalidArgument {
                    field: "stm".to_string(),
                    reason: format!("{size} bytes exceeds the configured cap of {cap}"),
                });
            }
        }
        self.backend.update_stm(scope, stm)
    }

    // === Facts ===

    pub fn list_facts(
        &self,
        scope: &Scope,
        filter: Option<&FactFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Fact>> {
        self.backend.list_facts(scope, filter, limit)
    }

    pub fn upsert_fact(&self, scope: &Scope, fact: &Fact) -> EngramResult<()> {
        self.backend.upsert_fact(scope, fact)
    }

    // === Episodes ===

    pub fn list_episodes(
        &self,
        scope: &Scope,
        filter: Option<&EpisodeFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Episode>> {
        self.backend.list_episodes(scope, filter, limit)
    }

    pub fn append_episode(&self, scope: &Scope, episode: &Episode) -> EngramResult<()> {
        self.backend.append_episode(scope, episode)
    }

    // === Procedures ===

    pub fn list_procedures(
        &self,
        scope: &Scope,
        task_type: Option<&str>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Procedure>> {
        self.backend.list_procedures(scope, task_type, limit)
    }

    pub fn upsert_procedure(&self, scope: &Scope, procedure: &Procedure) -> EngramResult<()> {
        self.backend.upsert_procedure(scope, procedure)
    }

    // === Insights ===

    pub fn list_insights(
        &self,
        scope: &Scope,
        filter: Option<&InsightFilter>,
        limit: Option<u32>,
    ) -> EngramResult<Vec<Insight>> {
        self.backend.list_insights(scope, filter, limit)
    }

    pub fn append_insight(&self, scope: &Scope, insight: &Insight) -> EngramResult<()> {
        self.backend.append_insight(scope, insight)
    }

    // === Context builds ===

    pub fn write_context_build(&self, scope: &Scope, build: &ContextBuild) -> EngramResult<()> {
        self.backend.write_context_build(scope, build)
    }

    pub fn list_context_builds(
        &self,
        scope: &Scope,
        limit: Option<u32>,
    ) -> EngramResult<Vec<ContextBuild>> {
        self.backend.list_context_builds(scope, limit)
    }

    // === Composition ===

    pub fn build_memory_packet(&self, request: &PacketRequest) -> EngramResult<MemoryPacket> {
        self.composer.build_memory_packet(request)
    }
}

// ============================================================================
// TESTS
// ============================================================================
