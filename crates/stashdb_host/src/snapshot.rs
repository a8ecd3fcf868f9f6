//! CBOR snapshot format for one database.
//!
//! ```text
//! DatabaseFile
//! ├─ format, name, version
//! └─ stores[]
//!    ├─ name, params, next_key
//!    ├─ indexes[] (definitions only)
//!    └─ records[] (key, value) in key order
//! ```
//!
//! Index entries are not written; they are rebuilt from the records on load.

use crate::backend::{IndexOptions, StoreParams};
use crate::engine::{DatabaseState, ObjectStore};
use crate::error::{HostError, HostResult};
use crate::key::{Key, KeyPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot format revision.
const FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct DatabaseFile {
    format: u16,
    name: String,
    version: u32,
    stores: Vec<StoreFile>,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    name: String,
    params: StoreParams,
    next_key: u64,
    indexes: Vec<IndexFile>,
    records: Vec<(Key, Value)>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    name: String,
    key_path: KeyPath,
    options: IndexOptions,
}

/// Encodes a database state.
pub(crate) fn encode(name: &str, state: &DatabaseState) -> HostResult<Vec<u8>> {
    let file = DatabaseFile {
        format: FORMAT_VERSION,
        name: name.to_owned(),
        version: state.version,
        stores: state
            .stores
            .iter()
            .map(|(store_name, store)| StoreFile {
                name: store_name.clone(),
                params: store.params().clone(),
                next_key: store.next_key(),
                indexes: store
                    .index_definitions()
                    .map(|(index_name, key_path, options)| IndexFile {
                        name: index_name.clone(),
                        key_path: key_path.clone(),
                        options,
                    })
                    .collect(),
                records: store
                    .records()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect(),
    };

    let mut buf = Vec::new();
    ciborium::into_writer(&file, &mut buf)
        .map_err(|e| HostError::corrupted(format!("encode {name}: {e}")))?;
    Ok(buf)
}

/// Decodes a snapshot, returning the database name and its state.
pub(crate) fn decode(bytes: &[u8]) -> HostResult<(String, DatabaseState)> {
    let file: DatabaseFile =
        ciborium::from_reader(bytes).map_err(|e| HostError::corrupted(e.to_string()))?;
    if file.format != FORMAT_VERSION {
        return Err(HostError::corrupted(format!(
            "unsupported snapshot format {}",
            file.format
        )));
    }

    let mut state = DatabaseState {
        version: file.version,
        ..DatabaseState::default()
    };
    for store_file in file.stores {
        let mut store = ObjectStore::restore(store_file.params, store_file.next_key, store_file.records);
        for index in store_file.indexes {
            store.create_index(&store_file.name, &index.name, index.key_path, index.options)?;
        }
        state.stores.insert(store_file.name, store);
    }
    Ok((file.name, state))
}

/// Size of the encoded snapshot in bytes.
pub(crate) fn encoded_len(name: &str, state: &DatabaseState) -> HostResult<u64> {
    Ok(encode(name, state)?.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DatabaseState {
        let mut store = ObjectStore::restore(
            StoreParams {
                key_path: Some(KeyPath::from("id")),
                auto_increment: true,
            },
            3,
            vec![
                (Key::from(1), json!({"id": 1, "email": "a@x"})),
                (Key::from(2), json!({"id": 2, "email": "b@x"})),
            ],
        );
        store
            .create_index("users", "email", KeyPath::from("email"), IndexOptions {
                unique: true,
                multi_entry: false,
            })
            .unwrap();
        let mut state = DatabaseState {
            version: 3,
            ..DatabaseState::default()
        };
        state.stores.insert("users".into(), store);
        state
    }

    #[test]
    fn decode_restores_records_and_indexes() {
        let bytes = encode("app", &sample()).unwrap();
        let (name, restored) = decode(&bytes).unwrap();

        assert_eq!(name, "app");
        assert_eq!(restored.version, 3);
        let store = &restored.stores["users"];
        assert_eq!(store.next_key(), 3);
        assert_eq!(store.records().count(), 2);
        assert_eq!(store.params().key_path, Some(KeyPath::from("id")));

        let indexes: Vec<_> = store.index_definitions().map(|(n, _, o)| (n.clone(), o.unique)).collect();
        assert_eq!(indexes, vec![("email".to_owned(), true)]);
        let first = store.records().next().map(|(k, v)| (k.clone(), v.clone()));
        assert_eq!(first, Some((Key::from(1), json!({"id": 1, "email": "a@x"}))));
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let state = sample();
        let len = encoded_len("app", &state).unwrap();
        assert_eq!(len, encode("app", &state).unwrap().len() as u64);
        assert!(len > 0);
    }

    #[test]
    fn garbage_is_corruption() {
        let err = decode(b"not cbor at all").unwrap_err();
        assert!(matches!(err, HostError::Corrupted(_)));
    }
}
