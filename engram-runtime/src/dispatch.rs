//! Concurrency dispatcher: async completion handles over a bounded pool of
//! worker threads running the synchronous store.
//!
//! The pool is split in two. Write workers each own a FIFO queue; a scope's
//! writes always hash to the same queue, so writes to one scope execute in
//! submission order (the per-scope single-slot queue) under the scope write
//! lock. Read workers share one queue and run under the scope read lock, so
//! reads parallelise freely but never interleave a write on their scope.
//! Before running, a read waits on the scope's write fence, which makes a
//! read submitted after a write observe that write.
//!
//! Read workers may park on a fence; write workers never wait on fences, so
//! the write queues always drain and every fence is eventually released.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::warn;

use engram_core::{EngramError, EngramResult, ScopeHash};

use crate::scope_locks::ScopeGateMap;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded worker pool with per-scope ordering guarantees.
pub struct Dispatcher {
    read_tx: Sender<Job>,
    write_txs: Vec<Sender<Job>>,
    gates: Arc<ScopeGateMap>,
    deadline: Duration,
}

impl Dispatcher {
    /// Spawn `worker_threads` workers (half write-sharded, half shared
    /// readers). Callers pass `max(4, 2 * cpus)` unless configured.
    pub fn new(worker_threads: usize, scope_lock_capacity: usize, deadline: Duration) -> Self {
        let total = worker_threads.max(2);
        let write_workers = (total / 2).max(1);
        let read_workers = (total - write_workers).max(1);

        let gates = Arc::new(ScopeGateMap::new(scope_lock_capacity));
        let (read_tx, read_rx) = unbounded::<Job>();

        let mut write_txs = Vec::with_capacity(write_workers);
        for i in 0..write_workers {
            let (tx, rx) = unbounded::<Job>();
            write_txs.push(tx);
            spawn_worker(format!("engram-write-{i}"), rx);
        }
        for i in 0..read_workers {
            spawn_worker(format!("engram-read-{i}"), read_rx.clone());
        }

        Self {
            read_tx,
            write_txs,
            gates,
            deadline,
        }
    }

    /// Pool width for a machine: `max(4, 2 * cpus)`.
    pub fn default_worker_threads() -> usize {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        (2 * cpus).max(4)
    }

    /// Submit a write for a scope. Returns a handle resolving to the
    /// operation result. Dropping the handle before the job starts drops
    /// the job.
    pub fn submit_write<T, F>(&self, scope_hash: &ScopeHash, op: F) -> oneshot::Receiver<EngramResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> EngramResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let gate = self.gates.gate_for(scope_hash);
        gate.register_write();

        let job: Job = Box::new(move || {
            // Completion must be recorded even for skipped or failed jobs,
            // or reads behind the fence would wait forever.
            if tx.is_closed() {
                gate.complete_write();
                return;
            }
            let result = {
                let _guard = gate.write_guard();
                op()
            };
            gate.complete_write();
            let _ = tx.send(result);
        });
        self.route_write(scope_hash, job);
        rx
    }

    /// Submit a write whose result nobody awaits. The job always runs;
    /// failures are logged.
    pub fn submit_write_detached<F>(&self, scope_hash: &ScopeHash, op_name: &'static str, op: F)
    where
        F: FnOnce() -> EngramResult<()> + Send + 'static,
    {
        let gate = self.gates.gate_for(scope_hash);
        gate.register_write();

        let job: Job = Box::new(move || {
            let result = {
                let _guard = gate.write_guard();
                op()
            };
            gate.complete_write();
            if let Err(e) = result {
                warn!(op = op_name, error = %e, "detached write failed");
            }
        });
        self.route_write(scope_hash, job);
    }

    /// Submit a read for a scope. The read waits for every write submitted
    /// to the scope before it, then runs under the scope read lock.
    pub fn submit_read<T, F>(&self, scope_hash: &ScopeHash, op: F) -> oneshot::Receiver<EngramResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> EngramResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let gate = self.gates.gate_for(scope_hash);
        let fence = gate.read_fence();

        let job: Job = Box::new(move || {
            if tx.is_closed() {
                return;
            }
            gate.wait_for_writes(fence);
            let result = {
                let _guard = gate.read_guard();
                op()
            };
            let _ = tx.send(result);
        });
        let _ = self.read_tx.send(job);
        rx
    }

    /// Await a completion handle under the per-op deadline. The job itself
    /// runs to completion either way; only the caller gives up.
    pub async fn run<T>(
        &self,
        op: &'static str,
        rx: oneshot::Receiver<EngramResult<T>>,
    ) -> EngramResult<T> {
        match tokio::time::timeout(self.deadline, rx).await {
            Err(_) => Err(EngramError::Timeout {
                op: op.to_string(),
                deadline_ms: self.deadline.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(EngramError::Internal {
                reason: format!("worker dropped the result channel for {op}"),
            }),
            Ok(Ok(result)) => result,
        }
    }

    fn route_write(&self, scope_hash: &ScopeHash, job: Job) {
        let mut hasher = DefaultHasher::new();
        scope_hash.as_str().hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.write_txs.len();
        let _ = self.write_txs[shard].send(job);
    }
}

fn spawn_worker(name: String, rx: Receiver<Job>) {
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                job();
            }
        })
        .expect("failed to spawn dispatcher worker");
}

// ============================================================================
// TESTS
// ============================================================================
