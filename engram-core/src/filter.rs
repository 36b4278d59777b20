//! Filters accepted by the storage list operations.

use serde::{Deserialize, Serialize};

use crate::{FactStatus, TimeRange};

/// Filter for `list_facts`. All clauses are conjunctive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FactFilter {
    /// Exact match on the secondary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    /// Keep facts sharing at least one tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl FactFilter {
    /// Convenience filter for active facts only.
    pub fn active() -> Self {
        Self {
            status: Some(FactStatus::Active),
            ..Self::default()
        }
    }
}

/// Filter for `list_episodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EpisodeFilter {
    /// Keep episodes whose time range overlaps this window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Keep episodes sharing at least one tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Filter for `list_insights`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InsightFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_filter_active() {
        let f = FactFilter::active();
        assert_eq!(f.status, Some(FactStatus::Active));
        assert!(f.fact_key.is_none());
    }

    #[test]
    fn test_filters_deserialize_from_empty_object() {
        let f: FactFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(f, FactFilter::default());
        let e: EpisodeFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(e, EpisodeFilter::default());
    }
}
