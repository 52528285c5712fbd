//! Per-aggregate mutual exclusion.
//!
//! Dispatches that target the same aggregate must not interleave their
//! mutator runs; dispatches for different aggregates may run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sourcerer_core::AggregateId;

/// Lazily created mutex per aggregate id.
///
/// Entries are dropped again once nobody holds or waits for them, so the map
/// only grows with the number of aggregates being dispatched concurrently.
#[derive(Debug, Default)]
pub struct AggregateLocks {
    inner: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

fn recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded data is `()` or the lock table; neither can be left
    // half-updated by a panicking holder.
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `id`.
    pub fn with_lock<T>(&self, id: AggregateId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut table = recover(&self.inner);
            table.entry(id).or_default().clone()
        };

        let result = {
            let _guard = recover(&lock);
            f()
        };

        // Clones are only taken and released under the table guard, so the
        // count cannot move while it is checked.
        let mut table = recover(&self.inner);
        if Arc::strong_count(&lock) == 2 {
            table.remove(&id);
        }
        drop(lock);
        drop(table);

        result
    }

    /// Number of aggregates currently locked or contended.
    pub fn active(&self) -> usize {
        recover(&self.inner).len()
    }
}
