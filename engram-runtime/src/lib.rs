//! Engram Runtime - Store Facade and Concurrency Dispatcher
//!
//! `Memory` is the synchronous store: backend plus composer behind one
//! handle. `AsyncMemory` layers the dispatcher on top so cooperative
//! callers never block on I/O: a bounded worker pool, per-scope write
//! ordering, reader/writer discipline, and per-op deadlines.

mod memory;
mod scope_locks;
mod dispatch;
mod async_memory;

pub use memory::Memory;
pub use scope_locks::{ScopeGate, ScopeGateMap};
pub use dispatch::Dispatcher;
pub use async_memory::AsyncMemory;

// Re-export the core surface so a single dependency is enough for callers.
pub use engram_core::{
    Budget, BackendKind, ContextBuild, Cues, EngramError, EngramResult, Episode, EpisodeFilter,
    Event, EventKind, Fact, FactFilter, FactStatus, Insight, InsightFilter, MemoryPacket,
    PacketRequest, PoolConfig, Procedure, RetrievalPolicy, Scope, Section, StoreConfig, TimeRange,
    WorkingState,
};
