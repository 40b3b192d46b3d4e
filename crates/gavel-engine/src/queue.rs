//! Per-branch integration queue. At most one run per branch is in flight;
//! work scheduled while a branch is running coalesces into a single
//! follow-up run against the moved tip.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use gavel_core::types::BranchKey;

use crate::context::EngineContext;
use crate::op;

#[derive(Default)]
struct BranchState {
    running: bool,
    pending: bool,
}

#[derive(Default)]
struct QueueState {
    branches: HashMap<BranchKey, BranchState>,
    ready: VecDeque<BranchKey>,
    active: usize,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.active == 0
    }
}

struct Shared {
    ctx: Arc<EngineContext>,
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable scheduling handle. Operations hold one so a run can request
/// follow-up work (staging rebuilds) without owning the queue.
#[derive(Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

impl QueueHandle {
    /// Request an integration run for `branch`. Idempotent while a run for
    /// the same branch is queued or in flight.
    pub fn schedule(&self, branch: BranchKey) {
        let mut state = self.shared.lock();
        if state.shutdown {
            return;
        }
        let entry = state.branches.entry(branch.clone()).or_default();
        if entry.running {
            entry.pending = true;
            debug!(%branch, "run coalesced behind in-flight run");
            return;
        }
        if entry.pending {
            return;
        }
        entry.pending = true;
        state.ready.push_back(branch);
        drop(state);
        self.shared.cond.notify_all();
    }
}

/// Bounded worker pool draining the per-branch queue.
pub struct IntegrationQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl IntegrationQueue {
    /// `workers` of zero creates a queue that only records schedules;
    /// useful for single-threaded embedding that drains explicitly.
    pub fn new(ctx: Arc<EngineContext>, workers: usize) -> Self {
        let shared = Arc::new(Shared {
            ctx,
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        });
        let handles = (0..workers)
            .map(|n| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("integrate-{n}"))
                    .spawn(move || worker_loop(&shared))
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| {
                error!("failed to spawn integration worker: {e}");
                Vec::new()
            });
        Self {
            shared,
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until every scheduled run (including coalesced follow-ups and
    /// retries) has finished.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while !state.is_idle() {
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drain the queue on the calling thread. Used when the pool has no
    /// workers.
    pub fn drain(&self) {
        let handle = self.handle();
        while let Some(branch) = take_ready(&self.shared) {
            run_one(&self.shared, &handle, branch);
        }
    }
}

impl Drop for IntegrationQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("integration worker panicked during shutdown");
            }
        }
    }
}

fn take_ready(shared: &Shared) -> Option<BranchKey> {
    let mut state = shared.lock();
    let branch = state.ready.pop_front()?;
    state.active += 1;
    if let Some(entry) = state.branches.get_mut(&branch) {
        entry.running = true;
        entry.pending = false;
    }
    Some(branch)
}

fn run_one(shared: &Shared, handle: &QueueHandle, branch: BranchKey) {
    let result = op::run_integration(&shared.ctx, handle, &branch);
    let mut rerun = match result {
        Ok(_) => false,
        Err(e) if e.is_retryable() => {
            debug!(%branch, "integration lost a precondition race; retrying");
            true
        }
        Err(e) => {
            error!(%branch, error = %e, "integration run failed");
            false
        }
    };

    let mut state = shared.lock();
    state.active -= 1;
    let shutdown = state.shutdown;
    let mut requeue = false;
    if let Some(entry) = state.branches.get_mut(&branch) {
        entry.running = false;
        if entry.pending {
            rerun = true;
        }
        if rerun && !shutdown {
            entry.pending = true;
            requeue = true;
        } else {
            entry.pending = false;
        }
    }
    if requeue {
        state.ready.push_back(branch);
    }
    drop(state);
    shared.cond.notify_all();
}

fn worker_loop(shared: &Arc<Shared>) {
    let handle = QueueHandle {
        shared: Arc::clone(shared),
    };
    loop {
        let branch = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(branch) = state.ready.pop_front() {
                    state.active += 1;
                    if let Some(entry) = state.branches.get_mut(&branch) {
                        entry.running = true;
                        entry.pending = false;
                    }
                    break branch;
                }
                state = shared
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        run_one(shared, &handle, branch);
    }
}
