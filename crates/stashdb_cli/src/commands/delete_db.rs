//! Delete-database command implementation.

use stashdb_core::Storage;
use tracing::info;

/// Deletes a database and all of its data.
pub async fn run(storage: &Storage, db: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !storage.is_registered(db) {
        return Err(format!("No database named {db}").into());
    }
    storage.delete_database(db).await.into_result()?;
    info!(db, "database deleted");
    println!("✓ Deleted {db}");
    Ok(())
}
