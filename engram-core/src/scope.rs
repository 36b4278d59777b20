//! Scope identity: the 5-tuple partitioning key and its derived row hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{EngramError, EngramResult};

/// Separator byte between scope components in the canonical serialisation.
/// NUL cannot occur inside a component, so the encoding is injective.
const SEPARATOR: u8 = 0x00;

// ============================================================================
// SCOPE
// ============================================================================

/// The 5-tuple partitioning key every record carries.
///
/// Scope is structural: equality is component-wise and all store operations
/// reject scopes with a missing or empty field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub run_id: String,
}

impl Scope {
    /// Construct a scope from its five components.
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Reject scopes with any empty component.
    pub fn validate(&self) -> EngramResult<()> {
        for (field, value) in self.fields() {
            if value.is_empty() {
                return Err(EngramError::InvalidArgument {
                    field: format!("scope.{field}"),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Derived row-key prefix: SHA-256 over the canonical ordered
    /// serialisation, lowercase hex.
    pub fn hash(&self) -> ScopeHash {
        let mut hasher = Sha256::new();
        for (i, (_, value)) in self.fields().into_iter().enumerate() {
            if i > 0 {
                hasher.update([SEPARATOR]);
            }
            hasher.update(value.as_bytes());
        }
        ScopeHash(hex::encode(hasher.finalize()))
    }

    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("tenant_id", &self.tenant_id),
            ("user_id", &self.user_id),
            ("agent_id", &self.agent_id),
            ("session_id", &self.session_id),
            ("run_id", &self.run_id),
        ]
    }
}

// ============================================================================
// SCOPE HASH
// ============================================================================

/// Stable hex digest of a scope, used as the row-key prefix in every backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeHash(String);

impl ScopeHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn component() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_-]{1,24}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Hashing is a function of scope equality: equal scopes hash equal,
        /// distinct scopes hash distinct.
        #[test]
        fn prop_hash_respects_equality(
            a in (component(), component(), component(), component(), component()),
            b in (component(), component(), component(), component(), component()),
        ) {
            let sa = Scope::new(a.0, a.1, a.2, a.3, a.4);
            let sb = Scope::new(b.0, b.1, b.2, b.3, b.4);
            if sa == sb {
                prop_assert_eq!(sa.hash(), sb.hash());
            } else {
                prop_assert_ne!(sa.hash(), sb.hash());
            }
        }

        /// Every non-empty scope validates.
        #[test]
        fn prop_non_empty_scopes_validate(
            a in (component(), component(), component(), component(), component()),
        ) {
            let s = Scope::new(a.0, a.1, a.2, a.3, a.4);
            prop_assert!(s.validate().is_ok());
        }
    }
}
