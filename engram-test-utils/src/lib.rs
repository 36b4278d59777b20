//! Engram Test Utilities
//!
//! Centralized fixtures for the workspace test suites: unique scopes and
//! ready-made records. Factories mint collision-free ids so tests can share
//! one backing store without trampling each other.

use serde_json::json;
use uuid::Uuid;

use engram_core::{
    CompressionLevel, Episode, Event, EventKind, Fact, FactStatus, Scope, TimeRange,
};

/// A scope whose every component is unique to this call.
pub fn sample_scope() -> Scope {
    let suffix = Uuid::now_v7().simple().to_string();
    Scope::new(
        format!("tenant-{suffix}"),
        format!("user-{suffix}"),
        format!("agent-{suffix}"),
        format!("session-{suffix}"),
        format!("run-{suffix}"),
    )
}

/// A message event with a small chat payload. `ts_ms` is left for the store
/// to stamp.
pub fn sample_event(scope: &Scope, event_id: &str) -> Event {
    Event {
        event_id: event_id.to_string(),
        scope: scope.clone(),
        ts_ms: None,
        kind: EventKind::Message,
        payload: json!({"role": "user", "content": "hello"}),
        tags: vec!["intro".to_string()],
        entities: Vec::new(),
        created_ms: None,
        extra: Default::default(),
    }
}

/// An active fact with the given confidence.
pub fn sample_fact(fact_id: &str, confidence: f64) -> Fact {
    Fact {
        fact_id: fact_id.to_string(),
        fact_key: format!("key.{fact_id}"),
        value: json!({"note": format!("value of {fact_id}")}),
        confidence,
        status: FactStatus::Active,
        source: Some("test".to_string()),
        evidence: None,
        tags: Vec::new(),
        created_ms: None,
        updated_ms: None,
        extra: Default::default(),
    }
}

/// A raw episode covering the given window.
pub fn sample_episode(episode_id: &str, start: i64, end: Option<i64>) -> Episode {
    Episode {
        episode_id: episode_id.to_string(),
        time_range: TimeRange::new(start, end),
        summary: format!("summary of {episode_id}"),
        tags: Vec::new(),
        compression_level: CompressionLevel::Raw,
        embedding_ref: None,
        created_ms: None,
        updated_ms: None,
        extra: Default::default(),
    }
}
