//! Opaque value helpers.
//!
//! Opaque fields (`payload`, `value`, `evidence`, STM) are dynamic JSON
//! carried byte-identically through persistence. `serde_json` is built with
//! `preserve_order`, so mappings keep their key order across round-trips.
//!
//! `merge_values` is the single deep-merge implementation; working-state
//! patching must go through it and nothing else may reimplement merging.

use serde_json::Value;

/// Canonical UTF-8 JSON bytes for a value.
///
/// serde_json's compact form over an order-preserving map is canonical for
/// our purposes: the same value always serialises to the same bytes.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    // Compact serialisation of a Value cannot fail.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Deep-merge `patch` into `base`.
///
/// Mappings merge key-wise and recursively; sequences, scalars, and nulls
/// replace the base value wholesale.
pub fn merge_values(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.entry(key) {
                    serde_json::map::Entry::Occupied(mut slot) => {
                        let base_val = std::mem::take(slot.get_mut());
                        *slot.get_mut() = merge_values(base_val, patch_val);
                    }
                    serde_json::map::Entry::Vacant(slot) => {
                        slot.insert(patch_val);
                    }
                }
            }
            Value::Object(base_map)
        }
        (_, patch) => patch,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_disjoint_keys() {
        let merged = merge_values(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_merge_nested_mappings() {
        let base = json!({"outer": {"keep": 1, "swap": 2}});
        let patch = json!({"outer": {"swap": 3}});
        assert_eq!(
            merge_values(base, patch),
            json!({"outer": {"keep": 1, "swap": 3}})
        );
    }

    #[test]
    fn test_sequences_replace_whole() {
        let base = json!({"plan": ["a", "b", "c"]});
        let patch = json!({"plan": ["x"]});
        assert_eq!(merge_values(base, patch), json!({"plan": ["x"]}));
    }

    #[test]
    fn test_null_replaces() {
        let merged = merge_values(json!({"goal": "trip"}), json!({"goal": null}));
        assert_eq!(merged, json!({"goal": null}));
    }

    #[test]
    fn test_scalar_replaces_mapping() {
        let merged = merge_values(json!({"x": {"deep": 1}}), json!({"x": 7}));
        assert_eq!(merged, json!({"x": 7}));
    }

    #[test]
    fn test_canonical_bytes_preserve_key_order() {
        let v: Value = serde_json::from_str(r#"{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}"#).unwrap();
        assert_eq!(
            canonical_bytes(&v),
            br#"{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}"#.to_vec()
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| json!(m)),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Merging an empty mapping is the identity on mappings.
        #[test]
        fn prop_merge_empty_patch_is_identity(base in arb_value()) {
            let expected = base.clone();
            let merged = merge_values(base, json!({}));
            if expected.is_object() {
                prop_assert_eq!(merged, expected);
            } else {
                // Non-mapping base is replaced by the patch mapping.
                prop_assert_eq!(merged, json!({}));
            }
        }

        /// Merge is idempotent: applying the same patch twice equals once.
        #[test]
        fn prop_merge_idempotent(base in arb_value(), patch in arb_value()) {
            let once = merge_values(base, patch.clone());
            let twice = merge_values(once.clone(), patch);
            prop_assert_eq!(once, twice);
        }

        /// Canonical bytes round-trip through serde_json.
        #[test]
        fn prop_canonical_bytes_roundtrip(v in arb_value()) {
            let bytes = canonical_bytes(&v);
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
