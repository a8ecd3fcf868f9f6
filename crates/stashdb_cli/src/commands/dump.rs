//! Dump command implementation.

use serde_json::Value;
use stashdb_core::Storage;

/// Prints the records of a store in key order, one JSON document per line.
pub async fn run(
    storage: &Storage,
    db: &str,
    store: &str,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = storage.get_all::<Value>(db, store).await.into_result()?;
    let total = records.len();
    let shown = limit.unwrap_or(total).min(total);

    for record in records.iter().take(shown) {
        println!("{}", serde_json::to_string(record)?);
    }
    if shown < total {
        eprintln!("... {} more records", total - shown);
    }
    Ok(())
}
