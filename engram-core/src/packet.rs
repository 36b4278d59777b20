//! Request and packet wire types for `build_memory_packet`.
//!
//! Field names and nesting here are normative: these structs serialise to
//! the canonical JSON shape callers see.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{Episode, Event, Fact, Insight, Procedure, Scope, Section, TimeRange, WorkingState};

/// Packet schema version. Bumping the estimator factor bumps this.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// REQUEST
// ============================================================================

/// Retrieval hints attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Cues {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

/// Per-category candidate caps. Unset caps fall back to the defaults
/// reported in `Explain::candidate_limits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetrievalPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_facts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_episodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_procedures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_insights: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_candidates: Option<u32>,
    /// Lets reviewers see deprecated facts too.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_deprecated: bool,
}

impl RetrievalPolicy {
    /// Resolve unset caps to their defaults.
    pub fn effective_limits(&self) -> CandidateLimits {
        CandidateLimits {
            facts: self.max_facts.unwrap_or(50),
            episodes: self.max_episodes.unwrap_or(20),
            procedures: self.max_procedures.unwrap_or(10),
            insights: self.max_insights.unwrap_or(20),
            events: self.max_events.unwrap_or(20),
            total: self.max_total_candidates,
        }
    }
}

/// Token budget for fitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Budget {
    /// Global cap. Absent means nothing is trimmed globally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Per-section sub-budgets. Absent sections are uncapped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_section: BTreeMap<Section, u64>,
}

/// Input to `build_memory_packet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRequest {
    pub scope: Scope,
    /// `planner` | `responder` | `reviewer` | any free string.
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cues: Option<Cues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<RetrievalPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Write the composed packet to the context-build log. Default true.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Propagate context-build persistence failures instead of logging them.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub persist_strict: bool,
}

fn default_true() -> bool {
    true
}

impl PacketRequest {
    /// Minimal request with defaults everywhere else.
    pub fn new(scope: Scope, purpose: impl Into<String>) -> Self {
        Self {
            scope,
            purpose: purpose.into(),
            task_type: None,
            cues: None,
            policy: None,
            budget: None,
            policy_id: None,
            persist: true,
            persist_strict: false,
        }
    }
}

// ============================================================================
// PACKET
// ============================================================================

/// Packet provenance block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMeta {
    pub schema_version: String,
    pub scope: Scope,
    pub purpose: String,
    pub created_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

/// Always-included short-term state. Never subject to the budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermSection {
    pub working_state: Option<WorkingState>,
    pub stm: Option<Value>,
}

/// Budget-fitted long-term candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LongTermSection {
    pub facts: Vec<Fact>,
    pub episodes: Vec<Episode>,
    pub procedures: Vec<Procedure>,
    pub insights: Vec<Insight>,
}

/// A candidate dropped by the fitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Omission {
    pub section: Section,
    pub id: String,
    pub reason: String,
}

/// Token accounting for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub requested_tokens: Option<u64>,
    pub used_tokens_est: u64,
    pub remaining_tokens: u64,
    pub omissions: Vec<Omission>,
}

/// Effective per-category candidate caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLimits {
    pub facts: u32,
    pub episodes: u32,
    pub procedures: u32,
    pub insights: u32,
    pub events: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// How many candidates each category produced before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SelectionCounts {
    pub facts: u32,
    pub episodes: u32,
    pub procedures: u32,
    pub insights: u32,
    pub events: u32,
}

/// Non-authoritative trace of policy choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explain {
    pub candidate_limits: CandidateLimits,
    pub selection_counts: SelectionCounts,
    pub estimator_factor: u32,
}

/// The composed output artifact returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPacket {
    pub meta: PacketMeta,
    pub short_term: ShortTermSection,
    pub long_term: LongTermSection,
    pub events: Vec<Event>,
    pub budget_report: BudgetReport,
    pub explain: Explain,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("demo", "alice", "helper", "s1", "r1")
    }

    #[test]
    fn test_request_minimal_deserialises_with_defaults() {
        let req: PacketRequest = serde_json::from_value(json!({
            "scope": {
                "tenant_id": "demo", "user_id": "alice", "agent_id": "helper",
                "session_id": "s1", "run_id": "r1"
            },
            "purpose": "planner"
        }))
        .unwrap();
        assert!(req.persist);
        assert!(!req.persist_strict);
        assert!(req.policy.is_none());
    }

    #[test]
    fn test_effective_limits_defaults() {
        let limits = RetrievalPolicy::default().effective_limits();
        assert_eq!(limits.events, 20);
        assert_eq!(limits.facts, 50);
        assert!(limits.total.is_none());
    }

    #[test]
    fn test_effective_limits_overrides() {
        let policy = RetrievalPolicy {
            max_facts: Some(5),
            max_total_candidates: Some(10),
            ..RetrievalPolicy::default()
        };
        let limits = policy.effective_limits();
        assert_eq!(limits.facts, 5);
        assert_eq!(limits.total, Some(10));
    }

    #[test]
    fn test_budget_per_section_keys_are_section_names() {
        let budget: Budget = serde_json::from_value(json!({
            "max_tokens": 2000,
            "per_section": {"facts": 100}
        }))
        .unwrap();
        assert_eq!(budget.per_section.get(&Section::Facts), Some(&100));
        let back = serde_json::to_value(&budget).unwrap();
        assert_eq!(back["per_section"]["facts"], 100);
    }

    #[test]
    fn test_packet_top_level_shape() {
        let packet = MemoryPacket {
            meta: PacketMeta {
                schema_version: SCHEMA_VERSION.to_string(),
                scope: scope(),
                purpose: "responder".to_string(),
                created_ms: 1,
                policy_id: None,
            },
            short_term: ShortTermSection {
                working_state: None,
                stm: None,
            },
            long_term: LongTermSection::default(),
            events: Vec::new(),
            budget_report: BudgetReport {
                requested_tokens: None,
                used_tokens_est: 0,
                remaining_tokens: 0,
                omissions: Vec::new(),
            },
            explain: Explain {
                candidate_limits: RetrievalPolicy::default().effective_limits(),
                selection_counts: SelectionCounts::default(),
                estimator_factor: 4,
            },
        };
        let v = serde_json::to_value(&packet).unwrap();
        for key in ["meta", "short_term", "long_term", "events", "budget_report", "explain"] {
            assert!(v.get(key).is_some(), "missing top-level key {key}");
        }
        assert_eq!(v["meta"]["schema_version"], "1");
        assert_eq!(v["short_term"]["working_state"], Value::Null);
        assert_eq!(v["budget_report"]["requested_tokens"], Value::Null);
        assert_eq!(v["explain"]["estimator_factor"], 4);
    }
}
