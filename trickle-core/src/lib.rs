//! TRICKLE Core - Loader Data Types
//!
//! Keys, descriptors, load states, snapshots, errors and configuration shared
//! by the cache and loader crates. No async runtime lives here.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod state;

pub use config::{
    CacheConfig, CacheSection, LoaderConfig, LoaderSection, TrickleConfig, CONFIG_ENV_VAR,
    DEFAULT_EVENT_CAPACITY, DEFAULT_UPDATE_THROTTLE, MAX_UPDATE_THROTTLE,
};
pub use descriptor::{descriptor_set_id, FetchFn, FetchFuture, ResourceDescriptor};
pub use error::{
    ConfigError, FetchError, KeyError, LoadError, LoaderError, TrickleError, TrickleResult,
};
pub use identity::{compute_key_hash, DescriptorSetId, Generation, KeyHash, LoaderId, ResourceKey};
pub use state::{CacheEntry, CacheEvent, LoadSnapshot, LoadState, ResultSet};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9/]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    /// Rebuild every object with its members inserted in reverse order.
    fn reverse_members(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut reversed = Map::new();
                for (name, member) in map.iter().rev() {
                    reversed.insert(name.clone(), reverse_members(member));
                }
                Value::Object(reversed)
            }
            Value::Array(items) => Value::Array(items.iter().map(reverse_members).collect()),
            other => other.clone(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Keys built from equal JSON documents are equal and hash alike.
        #[test]
        fn prop_key_equality_follows_json_equality(value in arb_json()) {
            let a = ResourceKey::from_value(&value);
            let b = ResourceKey::from_value(&reverse_members(&value));
            prop_assert_eq!(a.digest(), b.digest());
            prop_assert_eq!(a, b);
        }

        /// Canonical form re-parses to the same document.
        #[test]
        fn prop_key_canonical_form_is_valid_json(value in arb_json()) {
            let key = ResourceKey::from_value(&value);
            let parsed: Value = serde_json::from_str(key.as_str()).unwrap();
            prop_assert_eq!(parsed, value);
        }

        /// A result set never changes length through `set`.
        #[test]
        fn prop_result_set_length_is_fixed(
            len in 0usize..16,
            writes in prop::collection::vec((0usize..32, any::<u8>()), 0..32),
        ) {
            let mut set = ResultSet::new(vec![LoadState::absent(); len]);
            for (index, value) in writes {
                let accepted = set.set(index, LoadState::fresh(value));
                prop_assert_eq!(accepted, index < len);
            }
            prop_assert_eq!(set.len(), len);
            let snapshot = LoadSnapshot::from_parts(set, false, None);
            prop_assert!(snapshot.fetched_count <= snapshot.count);
        }
    }
}
