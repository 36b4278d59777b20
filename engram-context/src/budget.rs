//! Deterministic token estimation and greedy multi-section fitting.

use serde::Serialize;

use engram_core::{Budget, BudgetReport, Omission, Section};

use crate::CandidateSet;

/// Bytes-per-token divisor. This is a contract, not a heuristic: tests
/// assert it exactly and changing it bumps the packet schema version.
pub const ESTIMATOR_FACTOR: u32 = 4;

/// Estimated tokens for a canonical JSON value.
pub fn estimate_tokens(value: &serde_json::Value) -> u64 {
    from_byte_len(engram_core::canonical_bytes(value).len())
}

/// Estimated tokens for any record, via its canonical serialisation.
pub fn estimate_record_tokens<T: Serialize>(record: &T) -> u64 {
    let len = serde_json::to_vec(record).map(|b| b.len()).unwrap_or(0);
    from_byte_len(len)
}

fn from_byte_len(len: usize) -> u64 {
    (len as u64).div_ceil(u64::from(ESTIMATOR_FACTOR))
}

/// Result of fitting a candidate set under a budget.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub candidates: CandidateSet,
    pub report: BudgetReport,
}

/// Running global budget while sections are fitted.
struct GlobalBudget {
    remaining: Option<u64>,
    used: u64,
}

impl GlobalBudget {
    /// Admit `tokens` if both the section and global remainders allow it.
    fn admit(&mut self, section_remaining: &mut Option<u64>, tokens: u64) -> bool {
        if section_remaining.is_some_and(|r| tokens > r) {
            return false;
        }
        if self.remaining.is_some_and(|r| tokens > r) {
            return false;
        }
        if let Some(r) = section_remaining.as_mut() {
            *r -= tokens;
        }
        if let Some(r) = self.remaining.as_mut() {
            *r -= tokens;
        }
        self.used += tokens;
        true
    }
}

/// Greedy order-preserving fitter.
///
/// Sections are processed in fixed priority order (facts, episodes,
/// procedures, insights, events); candidates keep their selection order. A
/// candidate that does not fit is recorded as an omission and the section
/// continues, so smaller later items may still be admitted. Unused section
/// budget never spills into other sections.
pub fn fit_candidates(set: CandidateSet, budget: Option<&Budget>) -> FitOutcome {
    let requested = budget.and_then(|b| b.max_tokens);
    let mut global = GlobalBudget {
        remaining: requested,
        used: 0,
    };
    let mut omissions = Vec::new();

    let section_budget = |section: Section| -> Option<u64> {
        budget.and_then(|b| b.per_section.get(&section).copied())
    };

    let facts = fit_section(
        set.facts,
        Section::Facts,
        section_budget(Section::Facts),
        &mut global,
        &mut omissions,
        |f| f.fact_id.clone(),
    );
    let episodes = fit_section(
        set.episodes,
        Section::Episodes,
        section_budget(Section::Episodes),
        &mut global,
        &mut omissions,
        |e| e.episode_id.clone(),
    );
    let procedures = fit_section(
        set.procedures,
        Section::Procedures,
        section_budget(Section::Procedures),
        &mut global,
        &mut omissions,
        |p| p.procedure_id.clone(),
    );
    let insights = fit_section(
        set.insights,
        Section::Insights,
        section_budget(Section::Insights),
        &mut global,
        &mut omissions,
        |i| i.insight_id.clone(),
    );
    let events = fit_section(
        set.events,
        Section::Events,
        section_budget(Section::Events),
        &mut global,
        &mut omissions,
        |e| e.event_id.clone(),
    );

    FitOutcome {
        candidates: CandidateSet {
            facts,
            episodes,
            procedures,
            insights,
            events,
        },
        report: BudgetReport {
            requested_tokens: requested,
            used_tokens_est: global.used,
            remaining_tokens: global.remaining.unwrap_or(0),
            omissions,
        },
    }
}

fn fit_section<T: Serialize>(
    items: Vec<T>,
    section: Section,
    section_cap: Option<u64>,
    global: &mut GlobalBudget,
    omissions: &mut Vec<Omission>,
    id_of: impl Fn(&T) -> String,
) -> Vec<T> {
    let mut section_remaining = section_cap;
    let mut admitted = Vec::with_capacity(items.len());
    for item in items {
        let tokens = estimate_record_tokens(&item);
        if global.admit(&mut section_remaining, tokens) {
            admitted.push(item);
        } else {
            omissions.push(Omission {
                section,
                id: id_of(&item),
                reason: "budget".to_string(),
            });
        }
    }
    admitted
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::Budget;
    use engram_test_utils::{sample_event, sample_fact, sample_scope};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_estimator_factor_is_exact() {
        // 7 canonical bytes -> ceil(7/4) = 2 tokens.
        assert_eq!(estimate_tokens(&json!("hello")), 2);
        // {"a":1} -> 7 bytes -> 2 tokens.
        assert_eq!(estimate_tokens(&json!({"a": 1})), 2);
        // 4 bytes exactly -> 1 token.
        assert_eq!(estimate_tokens(&json!(true)), 1);
        assert_eq!(estimate_tokens(&json!(null)), 1);
    }

    #[test]
    fn test_no_budget_admits_everything() {
        let mut set = CandidateSet::default();
        for i in 0..5 {
            set.facts.push(sample_fact(&format!("f-{i}"), 0.5));
        }
        let outcome = fit_candidates(set, None);
        assert_eq!(outcome.candidates.facts.len(), 5);
        assert!(outcome.report.omissions.is_empty());
        assert_eq!(outcome.report.requested_tokens, None);
        assert_eq!(outcome.report.remaining_tokens, 0);
        assert!(outcome.report.used_tokens_est > 0);
    }

    #[test]
    fn test_global_budget_bound_holds() {
        let mut set = CandidateSet::default();
        for i in 0..50 {
            set.facts.push(sample_fact(&format!("f-{i:02}"), 0.5));
        }
        let budget = Budget {
            max_tokens: Some(120),
            per_section: BTreeMap::new(),
        };
        let outcome = fit_candidates(set, Some(&budget));
        assert!(outcome.report.used_tokens_est <= 120);
        assert!(!outcome.report.omissions.is_empty());
        assert_eq!(
            outcome.report.remaining_tokens,
            120 - outcome.report.used_tokens_est
        );
        for omission in &outcome.report.omissions {
            assert_eq!(omission.reason, "budget");
        }
    }

    #[test]
    fn test_per_section_budget_does_not_spill() {
        let mut set = CandidateSet::default();
        let scope = sample_scope();
        for i in 0..4 {
            set.facts.push(sample_fact(&format!("f-{i}"), 0.5));
        }
        for i in 0..4 {
            set.events.push(sample_event(&scope, &format!("e-{i}")));
        }
        let fact_tokens = estimate_record_tokens(&set.facts[0]);

        // Facts section takes exactly one fact; events are uncapped.
        let budget = Budget {
            max_tokens: None,
            per_section: BTreeMap::from([(Section::Facts, fact_tokens)]),
        };
        let outcome = fit_candidates(set, Some(&budget));
        assert_eq!(outcome.candidates.facts.len(), 1);
        assert_eq!(outcome.candidates.events.len(), 4);
        assert_eq!(outcome.report.omissions.len(), 3);
        assert!(outcome
            .report
            .omissions
            .iter()
            .all(|o| o.section == Section::Facts));
    }

    #[test]
    fn test_section_continues_after_oversized_item() {
        let mut set = CandidateSet::default();
        let mut big = sample_fact("f-big", 0.9);
        big.value = json!("x".repeat(4_000));
        let small = sample_fact("f-small", 0.5);
        let small_tokens = estimate_record_tokens(&small);
        set.facts.push(big);
        set.facts.push(small);

        let budget = Budget {
            max_tokens: Some(small_tokens + 1),
            per_section: BTreeMap::new(),
        };
        let outcome = fit_candidates(set, Some(&budget));
        // The oversized leader is skipped, the small follower still fits.
        assert_eq!(outcome.candidates.facts.len(), 1);
        assert_eq!(outcome.candidates.facts[0].fact_id, "f-small");
        assert_eq!(outcome.report.omissions.len(), 1);
        assert_eq!(outcome.report.omissions[0].id, "f-big");
    }

    #[test]
    fn test_sections_fit_in_priority_order() {
        let mut set = CandidateSet::default();
        let scope = sample_scope();
        set.facts.push(sample_fact("f-0", 0.5));
        set.events.push(sample_event(&scope, "e-0"));
        let fact_tokens = estimate_record_tokens(&set.facts[0]);

        // Budget covers the fact only; the event arrives when nothing is left.
        let budget = Budget {
            max_tokens: Some(fact_tokens),
            per_section: BTreeMap::new(),
        };
        let outcome = fit_candidates(set, Some(&budget));
        assert_eq!(outcome.candidates.facts.len(), 1);
        assert!(outcome.candidates.events.is_empty());
        assert_eq!(outcome.report.omissions[0].section, Section::Events);
    }
}
