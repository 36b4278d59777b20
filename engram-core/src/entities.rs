//! Typed memory records.
//!
//! Every record carries the caller-facing wire shape directly: serde field
//! names are normative, opaque fields are `serde_json::Value`, and unknown
//! input keys are captured in a flattened map so they round-trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CompressionLevel, EventKind, FactStatus, Scope};

/// Inclusive time window in epoch milliseconds. `end` open means "still
/// running" for episodes and "unbounded" for query cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// Whether two ranges share at least one instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        let self_end = self.end.unwrap_or(i64::MAX);
        let other_end = other.end.unwrap_or(i64::MAX);
        self.start <= other_end && other.start <= self_end
    }

    /// Whether an instant falls inside the range.
    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start && self.end.map_or(true, |end| ts_ms <= end)
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// Append-only interaction record. Never mutated after insert; recall is
/// newest-first by `(ts_ms, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub scope: Scope,
    /// Stamped by the store at append time when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<i64>,
    pub kind: EventKind,
    pub payload: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// WORKING STATE
// ============================================================================

/// Per-scope planner scratchpad. Exactly one per scope; updated by
/// deep-merge patches with a non-decreasing `state_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub state_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// LONG-TERM RECORDS
// ============================================================================

/// Durable, confidence-weighted statement keyed by `fact_id` with a
/// secondary lookup key `fact_key`. Upsert replaces in place; no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    pub fact_key: String,
    pub value: Value,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_fact_status")]
    pub status: FactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_fact_status() -> FactStatus {
    FactStatus::Active
}

/// Summarised span of activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub time_range: TimeRange,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_compression")]
    pub compression_level: CompressionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_compression() -> CompressionLevel {
    CompressionLevel::Raw
}

/// Reusable how-to keyed on `task_type`, ranked by success history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub procedure_id: String,
    pub task_type: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Distilled observation with supporting evidence references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub statement: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// CONTEXT BUILD AUDIT
// ============================================================================

/// A composed packet written back for offline evaluation, keyed by
/// `(scope, created_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBuild {
    pub scope: Scope,
    pub created_ms: i64,
    pub packet: Value,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_time_range_overlap() {
        let a = TimeRange::new(10, Some(20));
        assert!(a.overlaps(&TimeRange::new(15, Some(25))));
        assert!(a.overlaps(&TimeRange::new(20, None)));
        assert!(!a.overlaps(&TimeRange::new(21, Some(30))));
        assert!(TimeRange::new(5, None).overlaps(&a));
    }

    #[test]
    fn test_time_range_contains() {
        let r = TimeRange::new(100, None);
        assert!(r.contains(100));
        assert!(r.contains(i64::MAX));
        assert!(!r.contains(99));
    }

    #[test]
    fn test_event_round_trips_unknown_keys() {
        let raw = json!({
            "event_id": "e-1",
            "scope": {
                "tenant_id": "t", "user_id": "u", "agent_id": "a",
                "session_id": "s", "run_id": "r"
            },
            "ts_ms": 123,
            "kind": "message",
            "payload": {"role": "user", "content": "hello"},
            "tags": ["intro"],
            "entities": [],
            "trace_id": "future-field"
        });
        let event: Event = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(event.ts_ms, Some(123));
        assert_eq!(event.extra["trace_id"], "future-field");
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["trace_id"], raw["trace_id"]);
        assert_eq!(back["payload"], raw["payload"]);
    }

    #[test]
    fn test_fact_defaults() {
        let fact: Fact = serde_json::from_value(json!({
            "fact_id": "f-1",
            "fact_key": "user.name",
            "value": "Alice"
        }))
        .unwrap();
        assert_eq!(fact.status, FactStatus::Active);
        assert_eq!(fact.confidence, 1.0);
        assert!(fact.tags.is_empty());
    }

    #[test]
    fn test_working_state_defaults() {
        let ws: WorkingState = serde_json::from_value(json!({})).unwrap();
        assert_eq!(ws.state_version, 0);
        assert!(ws.goal.is_none());
        assert!(ws.plan.is_empty());
    }

    #[test]
    fn test_episode_compression_default() {
        let ep: Episode = serde_json::from_value(json!({
            "episode_id": "ep-1",
            "time_range": {"start": 0},
            "summary": "did things"
        }))
        .unwrap();
        assert_eq!(ep.compression_level, CompressionLevel::Raw);
        assert!(ep.time_range.end.is_none());
    }
}
