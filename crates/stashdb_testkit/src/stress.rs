//! Stress helpers for StashDB.
//!
//! Drive many concurrent single-shot operations through one `Storage`
//! and report how they went.

use serde_json::json;
use stashdb_core::Storage;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Operations per task.
    pub operations_per_task: usize,
    /// Number of distinct record ids.
    pub key_space: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            tasks: 8,
            operations_per_task: 250,
            key_space: 100,
        }
    }
}

impl StressConfig {
    /// A small run for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            tasks: 4,
            operations_per_task: 25,
            key_space: 10,
        }
    }
}

/// Runs `tasks` concurrent put/get/count mixes against `db`/`store`.
///
/// Records are `{"id": "k<n>", "task": <t>, "op": <i>}`; the store must be
/// keyed by `"id"`.
pub async fn concurrent_mixed(
    storage: &Storage,
    db: &str,
    store: &str,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut set = JoinSet::new();

    for task in 0..config.tasks {
        let storage = storage.clone();
        let db = db.to_owned();
        let store = store.to_owned();
        let config = config.clone();
        set.spawn(async move {
            let (mut ok, mut failed) = (0usize, 0usize);
            for op in 0..config.operations_per_task {
                let id = format!("k{}", (task * 31 + op) % config.key_space.max(1));
                let success = match op % 3 {
                    0 => storage
                        .put(&db, &store, &json!({"id": id, "task": task, "op": op}))
                        .await
                        .is_success(),
                    1 => storage
                        .get::<serde_json::Value>(&db, &store, id)
                        .await
                        .is_success(),
                    _ => storage.count(&db, &store).await.is_success(),
                };
                if success {
                    ok += 1;
                } else {
                    failed += 1;
                }
            }
            (ok, failed)
        });
    }

    let (mut successful, mut failed) = (0, 0);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((ok, err)) => {
                successful += ok;
                failed += err;
            }
            Err(_) => failed += config.operations_per_task,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Issues `callers` simultaneous first-use reads against an unopened `db`.
///
/// Returns how many of them succeeded.
pub async fn concurrent_first_use(storage: &Storage, db: &str, store: &str, callers: usize) -> usize {
    let mut set = JoinSet::new();
    for n in 0..callers {
        let storage = storage.clone();
        let db = db.to_owned();
        let store = store.to_owned();
        set.spawn(async move {
            storage
                .get::<serde_json::Value>(&db, &store, format!("k{n}"))
                .await
                .is_success()
        });
    }

    let mut succeeded = 0;
    while let Some(joined) = set.join_next().await {
        if matches!(joined, Ok(true)) {
            succeeded += 1;
        }
    }
    succeeded
}
