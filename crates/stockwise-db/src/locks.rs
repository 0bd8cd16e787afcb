//! # Stock Locks
//!
//! In-process async lock registry keyed by string.
//!
//! ## Lock Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Reconciler::manage_update / delete                                    │
//! │                                                                         │
//! │  1. header key        "purchase:12"          (edits and deletes only)  │
//! │  2. read persisted lines                                                │
//! │  3. stock keys        "stock:<product>:<branch>" all at once, sorted   │
//! │  4. pool.begin() ... commit                                             │
//! │  5. guards dropped                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock keys are only ever waited on in sorted order and header keys are
//! always taken before any stock key, so two reconciliations can never wait
//! on each other in a cycle. Locks are taken before the database transaction
//! opens: with a single-connection pool a task holding the connection while
//! waiting on a lock would stall the task that holds the lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Shared registry of named async locks.
#[derive(Debug, Clone, Default)]
pub struct StockLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Guards for one acquisition; every lock is released on drop.
#[derive(Debug)]
pub struct LockSet {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    /// Keys held, in acquisition order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl StockLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for one stock row.
    pub fn stock_key(product_id: &str, branch_id: &str) -> String {
        format!("stock:{}:{}", product_id, branch_id)
    }

    /// Key for one persisted header.
    pub fn header_key(kind: &str, id: i64) -> String {
        format!("{}:{}", kind, id)
    }

    /// Acquires every key, deduplicated and in sorted order.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = String>) -> LockSet {
        let keys: Vec<String> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody holds or waits on
            map.retain(|_, m| Arc::strong_count(m) > 1);
            keys.iter()
                .map(|k| map.entry(k.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for (key, mutex) in keys.iter().zip(mutexes) {
            trace!(key = %key, "Waiting for lock");
            guards.push(mutex.lock_owned().await);
        }

        LockSet {
            keys,
            _guards: guards,
        }
    }

    /// Returns true if some task currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).map(|m| m.try_lock().is_err()).unwrap_or(false)
    }
}
