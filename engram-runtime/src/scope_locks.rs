//! Per-scope synchronisation gates.
//!
//! One gate per active scope, held in an LRU map so idle scopes do not
//! accumulate forever. A gate combines the reader/writer lock with the
//! write-sequence fence that gives reads submitted after a write
//! read-your-writes visibility at scope granularity.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex, RwLock};

use engram_core::ScopeHash;

/// Reader/writer discipline plus write-sequence accounting for one scope.
pub struct ScopeGate {
    rwlock: RwLock<()>,
    write_submitted: AtomicU64,
    write_completed: Mutex<u64>,
    completed_cv: Condvar,
}

impl ScopeGate {
    fn new() -> Self {
        Self {
            rwlock: RwLock::new(()),
            write_submitted: AtomicU64::new(0),
            write_completed: Mutex::new(0),
            completed_cv: Condvar::new(),
        }
    }

    /// Register a write at submission time. Returns the write's sequence
    /// number; reads submitted later will wait for it.
    pub fn register_write(&self) -> u64 {
        self.write_submitted.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The fence a read submitted now must wait for: every write already
    /// submitted to this scope.
    pub fn read_fence(&self) -> u64 {
        self.write_submitted.load(Ordering::SeqCst)
    }

    /// Mark one write finished, whether it succeeded or not.
    pub fn complete_write(&self) {
        let mut completed = self.write_completed.lock();
        *completed += 1;
        self.completed_cv.notify_all();
    }

    /// Block until all writes up to `fence` have completed.
    pub fn wait_for_writes(&self, fence: u64) {
        let mut completed = self.write_completed.lock();
        while *completed < fence {
            self.completed_cv.wait(&mut completed);
        }
    }

    /// Exclusive access for the duration of a write.
    pub fn write_guard(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.rwlock.write()
    }

    /// Shared access for the duration of a read.
    pub fn read_guard(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.rwlock.read()
    }
}

/// Concurrent map of scope gates with LRU eviction of idle entries.
///
/// An evicted gate stays valid for jobs still holding its `Arc`; a scope
/// touched again after eviction simply gets a fresh gate.
pub struct ScopeGateMap {
    gates: Mutex<LruCache<String, Arc<ScopeGate>>>,
}

impl ScopeGateMap {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            gates: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch or create the gate for a scope, refreshing its LRU position.
    pub fn gate_for(&self, scope_hash: &ScopeHash) -> Arc<ScopeGate> {
        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get(scope_hash.as_str()) {
            return gate.clone();
        }
        let gate = Arc::new(ScopeGate::new());
        gates.put(scope_hash.as_str().to_string(), gate.clone());
        gate
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.gates.lock().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::Scope;

    fn hash(n: u32) -> ScopeHash {
        Scope::new("t", "u", "a", "s", format!("r-{n}")).hash()
    }

    #[test]
    fn test_same_scope_same_gate() {
        let map = ScopeGateMap::new(8);
        let a = map.gate_for(&hash(1));
        let b = map.gate_for(&hash(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lru_evicts_idle_gates() {
        let map = ScopeGateMap::new(2);
        let first = map.gate_for(&hash(1));
        map.gate_for(&hash(2));
        map.gate_for(&hash(3));
        assert_eq!(map.len(), 2);

        // The evicted gate is replaced on next touch; the old Arc stays
        // usable for whoever still holds it.
        let fresh = map.gate_for(&hash(1));
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[test]
    fn test_write_fence_accounting() {
        let gate = ScopeGate::new();
        assert_eq!(gate.read_fence(), 0);
        let seq = gate.register_write();
        assert_eq!(seq, 1);
        assert_eq!(gate.read_fence(), 1);

        gate.complete_write();
        // Fence 1 is already satisfied; this must not block.
        gate.wait_for_writes(1);
    }

    #[test]
    fn test_wait_for_writes_blocks_until_complete() {
        let gate = Arc::new(ScopeGate::new());
        gate.register_write();
        let fence = gate.read_fence();

        let waiter = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.wait_for_writes(fence);
            })
        };
        // Give the waiter time to park, then release it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.complete_write();
        waiter.join().unwrap();
    }
}
