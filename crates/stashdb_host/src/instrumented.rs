//! Counting, delaying and fault-injecting host wrapper.

use crate::backend::{
    DatabaseInfo, Host, HostConnection, StorageEstimate, TransactionBody, TransactionMode,
    UpgradeFn, VersionChangeHandler,
};
use crate::error::{HostError, HostResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    deletes: AtomicU64,
    transactions: AtomicU64,
    failing_opens: AtomicUsize,
    failing_transactions: AtomicUsize,
    open_delay: Mutex<Option<Duration>>,
}

/// Takes one pending fault, if any.
fn take_fault(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Wraps a host to observe and disturb it.
///
/// Used to test connection coalescing (count opens, slow them down) and
/// retry behavior (fail the next N opens or transactions with a transient
/// fault).
pub struct InstrumentedHost<H> {
    inner: H,
    counters: Arc<Counters>,
}

impl<H: Host> InstrumentedHost<H> {
    /// Wraps `inner`.
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns the wrapped host.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Number of `open` calls that reached the host.
    pub fn open_calls(&self) -> u64 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of `delete_database` calls.
    pub fn delete_calls(&self) -> u64 {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    /// Number of transactions started on any connection from this host.
    pub fn transaction_calls(&self) -> u64 {
        self.counters.transactions.load(Ordering::SeqCst)
    }

    /// Sleeps this long inside every `open` call.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.counters.open_delay.lock() = delay;
    }

    /// Makes the next `count` opens fail with a transient fault.
    pub fn fail_next_opens(&self, count: usize) {
        self.counters.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` transactions fail with a transient fault.
    pub fn fail_next_transactions(&self, count: usize) {
        self.counters
            .failing_transactions
            .store(count, Ordering::SeqCst);
    }
}

impl<H: Host> Host for InstrumentedHost<H> {
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> HostResult<Arc<dyn HostConnection>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.counters.open_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if take_fault(&self.counters.failing_opens) {
            return Err(HostError::transient(format!("injected open fault for {name}")));
        }
        let inner = self.inner.open(name, version, upgrade)?;
        Ok(Arc::new(InstrumentedConnection {
            inner,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn delete_database(&self, name: &str) -> HostResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_database(name)
    }

    fn databases(&self) -> HostResult<Vec<DatabaseInfo>> {
        self.inner.databases()
    }

    fn storage_estimate(&self) -> HostResult<Option<StorageEstimate>> {
        self.inner.storage_estimate()
    }
}

struct InstrumentedConnection {
    inner: Arc<dyn HostConnection>,
    counters: Arc<Counters>,
}

impl HostConnection for InstrumentedConnection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn store_names(&self) -> Vec<String> {
        self.inner.store_names()
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        body: &mut TransactionBody<'_>,
    ) -> HostResult<()> {
        self.counters.transactions.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.counters.failing_transactions) {
            return Err(HostError::transient("injected transaction fault"));
        }
        self.inner.transaction(scope, mode, body)
    }

    fn set_version_change_handler(&self, handler: VersionChangeHandler) {
        self.inner.set_version_change_handler(handler);
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
