//! Worker identity, lifecycle tracking and reaping.
//!
//! # Responsibilities
//! - Generate unique worker IDs for tracing
//! - Spawn worker tasks and hand back an owning [`WorkerHandle`]
//! - Count spawned, live and reaped workers
//! - Guarantee every worker is awaited, including when its owner is dropped

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::observability::metrics;

/// Global atomic counter for worker IDs.
static WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Generate a new unique worker ID.
    pub fn new() -> Self {
        Self(WORKER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    spawned: AtomicU64,
    live: AtomicU64,
    reaped: AtomicU64,
}

/// Tracks worker tasks from spawn to reap.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct WorkerTracker {
    counts: Arc<Counts>,
}

impl WorkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the worker built by `make` onto the runtime and return the
    /// handle that owns it.
    pub fn spawn<F, Fut>(&self, make: F) -> WorkerHandle
    where
        F: FnOnce(WorkerId) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = WorkerId::new();
        let worker = make(id);
        let guard = self.track(id);
        let join = tokio::spawn(async move {
            let _guard = guard;
            worker.await;
        });

        tracing::trace!(worker_id = %id, "Worker spawned");
        WorkerHandle {
            id,
            join: Some(join),
            tracker: self.clone(),
        }
    }

    fn track(&self, id: WorkerId) -> WorkerGuard {
        self.counts.spawned.fetch_add(1, Ordering::SeqCst);
        self.counts.live.fetch_add(1, Ordering::SeqCst);
        metrics::worker_started();
        WorkerGuard {
            counts: Arc::clone(&self.counts),
            id,
        }
    }

    fn record_reaped(&self) {
        self.counts.reaped.fetch_add(1, Ordering::SeqCst);
    }

    /// Workers spawned so far.
    pub fn spawned(&self) -> u64 {
        self.counts.spawned.load(Ordering::SeqCst)
    }

    /// Workers whose task is still running.
    pub fn live(&self) -> u64 {
        self.counts.live.load(Ordering::SeqCst)
    }

    /// Workers whose exit has been awaited.
    pub fn reaped(&self) -> u64 {
        self.counts.reaped.load(Ordering::SeqCst)
    }

    /// Wait until every spawned worker has exited and been reaped.
    ///
    /// Returns `false` if that did not happen within `deadline`.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let settled = async {
            while self.live() > 0 || self.reaped() < self.spawned() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(deadline, settled).await.is_ok()
    }
}

/// Lives inside the worker task; marks the worker dead when the task ends,
/// whether it returned or was aborted.
#[derive(Debug)]
struct WorkerGuard {
    counts: Arc<Counts>,
    id: WorkerId,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.counts.live.fetch_sub(1, Ordering::SeqCst);
        metrics::worker_stopped();
        tracing::trace!(worker_id = %self.id, "Worker exited");
    }
}

/// Owning handle to one worker task.
///
/// Must be waited on exactly once. Dropping an un-waited handle aborts the
/// task and hands its join handle to a reaper task so the exit is still
/// observed.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    join: Option<JoinHandle<()>>,
    tracker: WorkerTracker,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// True once the worker's exit has been awaited (or handed to a reaper).
    pub fn is_reaped(&self) -> bool {
        self.join.is_none()
    }

    /// Block until the worker has fully exited. Idempotent.
    pub async fn wait(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };

        if let Err(e) = join.await {
            if e.is_panic() {
                tracing::error!(worker_id = %self.id, "Worker panicked");
            }
        }
        self.tracker.record_reaped();
        tracing::debug!(worker_id = %self.id, "Worker reaped");
    }

    /// Abort the worker and wait for it to go away.
    pub async fn kill(&mut self) {
        if let Some(join) = &self.join {
            join.abort();
        }
        self.wait().await;
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };

        join.abort();
        tracing::debug!(worker_id = %self.id, "Worker abandoned before completion, aborting");

        let tracker = self.tracker.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = join.await;
                    tracker.record_reaped();
                    tracing::debug!(worker_id = %id, "Abandoned worker reaped");
                });
            }
            // Without a runtime the task was already torn down with it.
            Err(_) => tracker.record_reaped(),
        }
    }
}
