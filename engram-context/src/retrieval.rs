//! Per-category candidate selection.
//!
//! Each category is read through the backend with its recall ordering and
//! the policy cap pushed into the query; the global candidate cap then
//! trims a round-robin merge so every category keeps a proportional share.

use engram_core::{
    CandidateLimits, Cues, EngramResult, Episode, EpisodeFilter, Event, Fact, FactFilter,
    FactStatus, Insight, PacketRequest, Procedure, SelectionCounts,
};
use engram_storage::StorageBackend;

/// Ordered per-category result of retrieval, prior to budget fitting.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub facts: Vec<Fact>,
    pub episodes: Vec<Episode>,
    pub procedures: Vec<Procedure>,
    pub insights: Vec<Insight>,
    pub events: Vec<Event>,
}

impl CandidateSet {
    pub fn selection_counts(&self) -> SelectionCounts {
        SelectionCounts {
            facts: self.facts.len() as u32,
            episodes: self.episodes.len() as u32,
            procedures: self.procedures.len() as u32,
            insights: self.insights.len() as u32,
            events: self.events.len() as u32,
        }
    }

    pub fn total(&self) -> usize {
        self.facts.len()
            + self.episodes.len()
            + self.procedures.len()
            + self.insights.len()
            + self.events.len()
    }
}

/// Assemble the candidate set for a request under the given effective caps.
pub fn select_candidates(
    backend: &dyn StorageBackend,
    request: &PacketRequest,
    limits: &CandidateLimits,
) -> EngramResult<CandidateSet> {
    let scope = &request.scope;
    let cues = request.cues.clone().unwrap_or_default();
    let include_deprecated = request
        .policy
        .as_ref()
        .is_some_and(|p| p.include_deprecated);

    let fact_filter = FactFilter {
        status: if include_deprecated {
            None
        } else {
            Some(FactStatus::Active)
        },
        ..FactFilter::default()
    };
    let facts = backend.list_facts(scope, Some(&fact_filter), Some(limits.facts))?;

    let episode_filter = episode_filter_from_cues(&cues);
    let episodes = backend.list_episodes(scope, Some(&episode_filter), Some(limits.episodes))?;

    let procedures =
        backend.list_procedures(scope, request.task_type.as_deref(), Some(limits.procedures))?;

    let insights = backend.list_insights(scope, None, Some(limits.insights))?;

    let events = backend.list_events(scope, None, Some(limits.events))?;

    let mut set = CandidateSet {
        facts,
        episodes,
        procedures,
        insights,
        events,
    };
    if let Some(total) = limits.total {
        apply_total_cap(&mut set, total as usize);
    }
    Ok(set)
}

fn episode_filter_from_cues(cues: &Cues) -> EpisodeFilter {
    EpisodeFilter {
        time_range: cues.time_range,
        tags: cues.tags.clone(),
    }
}

/// Truncate a fixed-order round-robin merge (facts, episodes, procedures,
/// insights, events) at `total`, preserving within-category order. One
/// candidate is taken per category per round, so each category keeps a
/// proportional share of the cap.
fn apply_total_cap(set: &mut CandidateSet, total: usize) {
    if set.total() <= total {
        return;
    }

    let mut keep = [0usize; 5];
    let lens = [
        set.facts.len(),
        set.episodes.len(),
        set.procedures.len(),
        set.insights.len(),
        set.events.len(),
    ];
    let mut taken = 0;
    while taken < total {
        let mut progressed = false;
        for (i, len) in lens.iter().enumerate() {
            if keep[i] < *len && taken < total {
                keep[i] += 1;
                taken += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    set.facts.truncate(keep[0]);
    set.episodes.truncate(keep[1]);
    set.procedures.truncate(keep[2]);
    set.insights.truncate(keep[3]);
    set.events.truncate(keep[4]);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{PacketRequest, RetrievalPolicy, Scope};
    use engram_storage::SqliteBackend;
    use engram_test_utils::{sample_episode, sample_event, sample_fact, sample_scope};

    fn seeded_backend(scope: &Scope) -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        for i in 0..8 {
            backend
                .upsert_fact(scope, &sample_fact(&format!("f-{i}"), 0.5 + (i as f64) / 100.0))
                .unwrap();
        }
        for i in 0..4 {
            backend
                .append_episode(scope, &sample_episode(&format!("ep-{i}"), i * 10, Some(i * 10 + 5)))
                .unwrap();
        }
        for i in 0..6 {
            backend
                .append_event(&sample_event(scope, &format!("e-{i}")))
                .unwrap();
        }
        backend
    }

    #[test]
    fn test_selection_respects_per_category_caps() {
        let scope = sample_scope();
        let backend = seeded_backend(&scope);
        let request = PacketRequest {
            policy: Some(RetrievalPolicy {
                max_facts: Some(3),
                max_episodes: Some(2),
                max_events: Some(4),
                ..RetrievalPolicy::default()
            }),
            ..PacketRequest::new(scope, "planner")
        };
        let limits = request.policy.as_ref().unwrap().effective_limits();

        let set = select_candidates(&backend, &request, &limits).unwrap();
        assert_eq!(set.facts.len(), 3);
        assert_eq!(set.episodes.len(), 2);
        assert_eq!(set.events.len(), 4);
        // Highest-confidence facts survive the cap.
        assert_eq!(set.facts[0].fact_id, "f-7");
    }

    #[test]
    fn test_deprecated_facts_excluded_by_default() {
        let scope = sample_scope();
        let backend = SqliteBackend::in_memory().unwrap();
        let mut dead = sample_fact("f-dead", 0.99);
        dead.status = engram_core::FactStatus::Deprecated;
        backend.upsert_fact(&scope, &dead).unwrap();
        backend.upsert_fact(&scope, &sample_fact("f-live", 0.5)).unwrap();

        let request = PacketRequest::new(scope, "responder");
        let limits = RetrievalPolicy::default().effective_limits();
        let set = select_candidates(&backend, &request, &limits).unwrap();
        assert_eq!(set.facts.len(), 1);
        assert_eq!(set.facts[0].fact_id, "f-live");

        let lenient = PacketRequest {
            policy: Some(RetrievalPolicy {
                include_deprecated: true,
                ..RetrievalPolicy::default()
            }),
            ..request
        };
        let set = select_candidates(&backend, &lenient, &limits).unwrap();
        assert_eq!(set.facts.len(), 2);
    }

    #[test]
    fn test_total_cap_round_robin_shares() {
        let mut set = CandidateSet::default();
        for i in 0..10 {
            set.facts.push(sample_fact(&format!("f-{i}"), 0.5));
        }
        for i in 0..10 {
            set.episodes
                .push(sample_episode(&format!("ep-{i}"), i, None));
        }

        apply_total_cap(&mut set, 6);
        assert_eq!(set.facts.len(), 3);
        assert_eq!(set.episodes.len(), 3);
        // Within-category order is preserved.
        assert_eq!(set.facts[0].fact_id, "f-0");
        assert_eq!(set.facts[2].fact_id, "f-2");
    }

    #[test]
    fn test_total_cap_uneven_categories() {
        let mut set = CandidateSet::default();
        set.facts.push(sample_fact("f-0", 0.5));
        for i in 0..10 {
            set.events.push(sample_event(
                &sample_scope(),
                &format!("e-{i}"),
            ));
        }

        apply_total_cap(&mut set, 5);
        assert_eq!(set.facts.len(), 1);
        assert_eq!(set.events.len(), 4);
    }

    #[test]
    fn test_total_cap_noop_when_under() {
        let mut set = CandidateSet::default();
        set.facts.push(sample_fact("f-0", 0.5));
        apply_total_cap(&mut set, 10);
        assert_eq!(set.total(), 1);
    }
}
