//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, records, schemas and
//! operation sequences that respect the storage invariants.

use proptest::prelude::*;
use serde_json::{json, Value};
use stashdb_core::{DatabaseConfig, IndexConfig, Key, StoreConfig};

/// Strategy for generating keys of every kind, nested up to two levels.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![
        (-1_000_000i32..1_000_000).prop_map(Key::from),
        (-1e9f64..1e9).prop_map(|n| Key::try_from(n).expect("finite numbers are keys")),
        "[a-z0-9]{0,8}".prop_map(Key::from),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::from)
    })
}

/// Strategy for generating valid store and database names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for small JSON payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(|v| json!(v)),
    ]
}

/// Strategy for records with an in-line string `"id"` drawn from a small
/// pool, so sequences revisit the same keys.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    (record_id_strategy(), payload_strategy())
        .prop_map(|(id, payload)| json!({"id": id, "payload": payload}))
}

/// Strategy for record ids from a pool of eight.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("k{n}"))
}

/// Strategy for valid database configs with up to four stores.
pub fn database_config_strategy() -> impl Strategy<Value = DatabaseConfig> {
    (
        name_strategy(),
        1u32..10,
        prop::collection::btree_set(name_strategy(), 0..4),
    )
        .prop_map(|(name, version, stores)| {
            stores.into_iter().fold(DatabaseConfig::new(name, version), |config, store| {
                config.with_store(
                    StoreConfig::new(store)
                        .key_path("id")
                        .with_index(IndexConfig::new("by_payload", "payload")),
                )
            })
        })
}

/// One single-shot storage operation against a store keyed by `"id"`.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Insert a record; fails if the id exists
    Add {
        /// Record with an `"id"` field
        record: Value,
    },
    /// Insert or replace a record
    Put {
        /// Record with an `"id"` field
        record: Value,
    },
    /// Delete a record
    Delete {
        /// Record id
        id: String,
    },
    /// Read a record
    Get {
        /// Record id
        id: String,
    },
    /// Remove every record
    Clear,
}

/// Strategy for generating store operations.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => record_strategy().prop_map(|record| StoreOperation::Add { record }),
        3 => record_strategy().prop_map(|record| StoreOperation::Put { record }),
        2 => record_id_strategy().prop_map(|id| StoreOperation::Delete { id }),
        2 => record_id_strategy().prop_map(|id| StoreOperation::Get { id }),
        1 => Just(StoreOperation::Clear),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_survive_json(key in key_strategy()) {
            prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
        }

        #[test]
        fn generated_configs_validate(config in database_config_strategy()) {
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn records_carry_a_pooled_id(record in record_strategy()) {
            let id = record["id"].as_str().unwrap_or_default();
            prop_assert!(id.starts_with('k') && id.len() == 2);
        }
    }
}
