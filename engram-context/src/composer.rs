//! The context composer: `build_memory_packet` end to end.
//!
//! A build moves through Received → Validated → Retrieved → Fitted →
//! Emitted → [Persisted]. Failures before Emitted surface as errors; a
//! non-strict persistence failure after Emitted is logged and swallowed so
//! the caller still gets the packet.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use engram_core::{
    now_ms, ContextBuild, EngramError, EngramResult, Explain, LongTermSection, MemoryPacket,
    PacketMeta, PacketRequest, ShortTermSection, SCHEMA_VERSION,
};
use engram_storage::StorageBackend;

use crate::{fit_candidates, select_candidates, ESTIMATOR_FACTOR};

/// Deterministic packet builder over a storage backend.
pub struct ContextComposer {
    backend: Arc<dyn StorageBackend>,
}

impl ContextComposer {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Compose a memory packet for the request.
    ///
    /// Working state and STM are always included and never counted against
    /// the budget; long-term candidates and events are selected under the
    /// policy caps and fitted under the budget. When `persist` is set the
    /// packet is written to the context-build log after emission.
    pub fn build_memory_packet(&self, request: &PacketRequest) -> EngramResult<MemoryPacket> {
        // Validated
        request.scope.validate()?;
        if request.purpose.is_empty() {
            return Err(EngramError::InvalidArgument {
                field: "purpose".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        // Retrieved
        let working_state = self.backend.get_working_state(&request.scope)?;
        let stm = self.backend.get_stm(&request.scope)?;

        let policy = request.policy.clone().unwrap_or_default();
        let limits = policy.effective_limits();
        let candidates = select_candidates(self.backend.as_ref(), request, &limits)?;
        let selection_counts = candidates.selection_counts();
        debug!(
            facts = selection_counts.facts,
            episodes = selection_counts.episodes,
            procedures = selection_counts.procedures,
            insights = selection_counts.insights,
            events = selection_counts.events,
            "candidates selected"
        );

        // Fitted
        let outcome = fit_candidates(candidates, request.budget.as_ref());

        // Emitted
        let packet = MemoryPacket {
            meta: PacketMeta {
                schema_version: SCHEMA_VERSION.to_string(),
                scope: request.scope.clone(),
                purpose: request.purpose.clone(),
                created_ms: now_ms(),
                policy_id: request.policy_id.clone(),
            },
            short_term: ShortTermSection { working_state, stm },
            long_term: LongTermSection {
                facts: outcome.candidates.facts,
                episodes: outcome.candidates.episodes,
                procedures: outcome.candidates.procedures,
                insights: outcome.candidates.insights,
            },
            events: outcome.candidates.events,
            budget_report: outcome.report,
            explain: Explain {
                candidate_limits: limits,
                selection_counts,
                estimator_factor: ESTIMATOR_FACTOR,
            },
        };

        // Persisted
        if request.persist {
            if let Err(e) = self.persist_build(request, &packet) {
                if request.persist_strict {
                    return Err(e);
                }
                warn!(error = %e, "context-build persistence failed; packet still returned");
            }
        }

        Ok(packet)
    }

    fn persist_build(&self, request: &PacketRequest, packet: &MemoryPacket) -> EngramResult<()> {
        let packet_value: Value =
            serde_json::to_value(packet).map_err(|e| EngramError::Internal {
                reason: format!("failed to serialise packet: {e}"),
            })?;
        let build = ContextBuild {
            scope: request.scope.clone(),
            created_ms: packet.meta.created_ms,
            packet: packet_value,
        };
        self.backend.write_context_build(&request.scope, &build)
    }
}

// ============================================================================
// TESTS
// ============================================================================
