//! Engram Context - Candidate Selection and Packet Composition
//!
//! Turns a retrieval request into a bounded memory packet: per-category
//! candidate selection with pushdown limits, deterministic token estimation,
//! greedy budget fitting with an omission report, and the composer that
//! orchestrates a build end to end.

mod retrieval;
mod budget;
mod composer;

pub use retrieval::{select_candidates, CandidateSet};
pub use budget::{estimate_record_tokens, estimate_tokens, fit_candidates, FitOutcome, ESTIMATOR_FACTOR};
pub use composer::ContextComposer;
