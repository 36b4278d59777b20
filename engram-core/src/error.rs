//! Error taxonomy for Engram operations.

use thiserror::Error;

/// Master error type for all Engram operations.
///
/// Each variant is a taxonomy kind with a stable short code; messages are
/// for humans and may change.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngramError {
    #[error("Invalid argument for {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Not found: {entity} for scope {scope_hash}")]
    NotFound { entity: String, scope_hash: String },

    #[error("Conflict on {entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Operation {op} timed out after {deadline_ms}ms")]
    Timeout { op: String, deadline_ms: u64 },

    #[error("Backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Corruption in {entity}: {reason}")]
    Corruption { entity: String, reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl EngramError {
    /// Stable short code for the error kind. Part of the public contract;
    /// callers may match on it across versions.
    pub fn code(&self) -> &'static str {
        match self {
            EngramError::InvalidArgument { .. } => "invalid_argument",
            EngramError::NotFound { .. } => "not_found",
            EngramError::Conflict { .. } => "conflict",
            EngramError::Timeout { .. } => "timeout",
            EngramError::BackendUnavailable { .. } => "backend_unavailable",
            EngramError::Corruption { .. } => "corruption",
            EngramError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for Engram operations.
pub type EngramResult<T> = Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let cases: [(EngramError, &str); 7] = [
            (
                EngramError::InvalidArgument {
                    field: "scope.tenant_id".into(),
                    reason: "empty".into(),
                },
                "invalid_argument",
            ),
            (
                EngramError::NotFound {
                    entity: "working_state".into(),
                    scope_hash: "ab".into(),
                },
                "not_found",
            ),
            (
                EngramError::Conflict {
                    entity: "event".into(),
                    id: "e-1".into(),
                    reason: "duplicate".into(),
                },
                "conflict",
            ),
            (
                EngramError::Timeout {
                    op: "list_events".into(),
                    deadline_ms: 5000,
                },
                "timeout",
            ),
            (
                EngramError::BackendUnavailable {
                    reason: "connect refused".into(),
                },
                "backend_unavailable",
            ),
            (
                EngramError::Corruption {
                    entity: "fact".into(),
                    reason: "bad json".into(),
                },
                "corruption",
            ),
            (
                EngramError::Internal {
                    reason: "bug".into(),
                },
                "internal",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_messages_mention_context() {
        let err = EngramError::Conflict {
            entity: "event".into(),
            id: "e-7".into(),
            reason: "duplicate event_id".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("event"));
        assert!(msg.contains("e-7"));
    }
}
