//! Storage setup shared by the commands.

use serde_json::Value;
use stashdb_core::{load_schema_json, DatabaseConfig, Key, Storage, StorageConfig};
use stashdb_host::FileHost;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Opens the `FileHost` at `path` and registers every database it can reach.
///
/// Configs from `schema` are registered first. Databases already on disk
/// without a config are registered at their stored version with no
/// declared stores, so they open as they are and are never upgraded.
pub async fn open_storage(
    path: &Path,
    schema: Option<&Path>,
) -> Result<Storage, Box<dyn std::error::Error>> {
    let host = FileHost::open(path)?;
    let storage = Storage::with_config(Arc::new(host), StorageConfig::no_retry());

    if let Some(schema) = schema {
        let text = fs::read_to_string(schema)?;
        for config in load_schema_json(&text)? {
            storage.register_database(config)?;
        }
    }

    for info in storage.host_databases().await.into_result()? {
        if !storage.is_registered(&info.name) {
            debug!(db = %info.name, version = info.version, "adopting stored database");
            storage.register_database(DatabaseConfig::new(info.name, info.version))?;
        }
    }

    Ok(storage)
}

/// Parses a command-line key: JSON when it parses to a valid key, the raw
/// text otherwise.
pub fn parse_key(text: &str) -> Result<Key, Box<dyn std::error::Error>> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            Key::from_value(&value).ok_or_else(|| format!("not a valid key: {text}").into())
        }
        Err(_) => Ok(Key::from(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_parse_as_json_then_text() {
        assert_eq!(parse_key("42").unwrap(), Key::from(42));
        assert_eq!(parse_key("\"42\"").unwrap(), Key::from("42"));
        assert_eq!(parse_key("abc").unwrap(), Key::from("abc"));
        assert_eq!(
            parse_key("[1, \"a\"]").unwrap(),
            Key::from(vec![Key::from(1), Key::from("a")])
        );
        assert!(parse_key("{\"a\": 1}").is_err());
        assert!(parse_key("true").is_err());
    }

    #[tokio::test]
    async fn stored_databases_are_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        fs::write(
            &schema,
            r#"{"name": "app", "version": 2, "stores": [{"name": "users", "keyPath": "id"}]}"#,
        )
        .unwrap();
        let data = dir.path().join("data");
        fs::create_dir(&data).unwrap();

        let storage = open_storage(&data, Some(&schema)).await.unwrap();
        storage
            .put("app", "users", &serde_json::json!({"id": 1}))
            .await
            .into_result()
            .unwrap();
        storage.close_all();
        drop(storage);

        let storage = open_storage(&data, None).await.unwrap();
        assert_eq!(storage.database_names(), vec!["app".to_owned()]);
        assert_eq!(storage.count("app", "users").await.into_data(), Some(1));
    }
}
