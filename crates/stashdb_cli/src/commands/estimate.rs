//! Estimate command implementation.

use super::inspect::format_size;
use stashdb_core::Storage;

/// Prints storage usage and quota.
pub async fn run(storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    match storage.storage_estimate().await.into_result()? {
        Some(estimate) => {
            println!("Usage: {}", format_size(estimate.usage_bytes));
            println!("Quota: {}", format_size(estimate.quota_bytes));
        }
        None => println!("Storage estimate not available"),
    }
    Ok(())
}
