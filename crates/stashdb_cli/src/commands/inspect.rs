//! Inspect command implementation.

use serde::Serialize;
use stashdb_core::{DatabaseReport, Storage};
use std::path::Path;

/// Inspection result for a storage directory.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage directory.
    pub path: String,
    /// Bytes used by database files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_bytes: Option<u64>,
    /// One entry per stored database.
    pub databases: Vec<DatabaseReport>,
}

/// Runs the inspect command.
pub async fn run(storage: &Storage, path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = InspectResult {
        path: path.display().to_string(),
        usage_bytes: None,
        databases: Vec::new(),
    };

    for info in storage.host_databases().await.into_result()? {
        let report = storage.database_info(&info.name).await.into_result()?;
        result.databases.push(report);
    }
    result.usage_bytes = storage
        .storage_estimate()
        .await
        .into_result()?
        .map(|estimate| estimate.usage_bytes);

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("StashDB Storage Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    if let Some(usage) = result.usage_bytes {
        println!("Size: {}", format_size(usage));
    }
    println!();

    if result.databases.is_empty() {
        println!("No databases.");
        return;
    }
    for db in &result.databases {
        println!("{} (version {})", db.name, db.version);
        if db.stores.is_empty() {
            println!("  (no stores)");
        }
        for store in &db.stores {
            println!("  {:<24} {} records", store.name, store.count);
        }
    }
}

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_scaled() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
