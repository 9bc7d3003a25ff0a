use crate::config::{PanicPolicy, QueueConfig};
use crate::context::TaskContext;
use crate::error::DispatchError;
use crate::scheduled::ScheduledTask;
use crate::task::DispatchTask;
use crate::DispatchQueue;
use std::any::Any;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

// Used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

struct QueueState {
    heap: BinaryHeap<ScheduledTask>,
    running: bool,
    next_seq: u64,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    cond: Condvar,
    thread_id: OnceLock<ThreadId>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A queue backed by one dedicated worker thread.
///
/// Tasks run one at a time on the worker, earliest due time first, with
/// equal due times kept in submission order. Dropping the queue calls
/// [`quit`](Self::quit).
pub struct TaskDispatchThread {
    inner: Arc<Inner>,
}

impl TaskDispatchThread {
    pub fn new(name: impl Into<String>) -> Result<Self, DispatchError> {
        Self::with_config(QueueConfig::new(name))
    }

    /// Spawn the worker thread. It starts waiting for work immediately.
    pub fn with_config(config: QueueConfig) -> Result<Self, DispatchError> {
        let name = config.name.clone();
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                running: true,
                next_seq: 0,
            }),
            cond: Condvar::new(),
            thread_id: OnceLock::new(),
            worker: Mutex::new(None),
        });

        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker))
            .map_err(|source| DispatchError::Spawn { name, source })?;

        let _ = inner.thread_id.set(handle.thread().id());
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn priority_offset(&self) -> i32 {
        self.inner.config.priority_offset
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.lock_state().heap.len()
    }

    /// A shareable reference to this queue.
    pub fn handle(&self) -> Arc<dyn DispatchQueue> {
        self.inner.clone()
    }

    pub fn is_on_thread(&self) -> bool {
        self.inner.is_on_thread()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn run_async(&self, task: impl Into<DispatchTask>) {
        self.inner.run_async_after(task.into(), Duration::ZERO);
    }

    pub fn run_async_after(&self, task: impl Into<DispatchTask>, delay: Duration) {
        self.inner.run_async_after(task.into(), delay);
    }

    /// See [`DispatchQueue::run_sync`].
    pub fn run_sync(&self, task: impl Into<DispatchTask>) -> bool {
        self.inner.run_sync(task.into())
    }

    pub fn quit(&self) {
        self.inner.quit();
    }
}

impl Drop for TaskDispatchThread {
    fn drop(&mut self) {
        self.inner.quit();
    }
}

impl std::fmt::Debug for TaskDispatchThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatchThread")
            .field("name", &self.inner.config.name)
            .field("running", &self.inner.is_running())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // Tasks never run under this lock, so poisoning carries no torn state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_guarded(&self, task: DispatchTask) {
        match self.config.panic_policy {
            PanicPolicy::CatchAndLog => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                    error!(
                        queue = %self.config.name,
                        panic = %panic_message(payload.as_ref()),
                        "dispatched task panicked"
                    );
                }
            }
            PanicPolicy::Propagate => task.run(),
        }
    }

    fn execute(self: &Arc<Self>, task: DispatchTask) {
        if !self.config.establish_context {
            self.run_guarded(task);
            return;
        }

        let ctx = TaskContext::new(self.clone() as Arc<dyn DispatchQueue>, None);
        self.run_guarded(task);
        loop {
            let next = ctx.take_next_deferred_task();
            if next.is_empty() {
                break;
            }
            self.run_guarded(next);
        }
    }

    /// Stop the queue and drop everything still pending. Runs while a task
    /// panic unwinds the worker under `PanicPolicy::Propagate`.
    fn abandon(&self) {
        let dropped = {
            let mut state = self.lock_state();
            state.running = false;
            std::mem::take(&mut state.heap)
        };
        self.cond.notify_all();
        error!(
            queue = %self.config.name,
            dropped = dropped.len(),
            "worker thread terminated by task panic"
        );
        drop(dropped);
    }
}

impl DispatchQueue for Inner {
    fn run_async_after(&self, task: DispatchTask, delay: Duration) {
        let mut state = self.lock_state();
        if !state.running {
            drop(state);
            debug!(queue = %self.config.name, "queue stopped, dropping submitted task");
            return;
        }

        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(ScheduledTask::new(due, seq, task));
        drop(state);

        self.cond.notify_one();
    }

    fn is_on_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    fn is_running(&self) -> bool {
        self.lock_state().running
    }

    fn quit(&self) {
        let was_running = std::mem::replace(&mut self.lock_state().running, false);
        self.cond.notify_all();
        if was_running {
            info!(queue = %self.config.name, "dispatch queue quitting");
        }

        // Checked before taking the `worker` lock: an outside caller may be
        // holding it while joining this very thread. The handle stays put, so
        // other callers still join once the current task returns.
        if self.is_on_thread() {
            debug!(queue = %self.config.name, "quit called on worker thread, detaching");
            return;
        }

        // Held across the join so concurrent callers all wait for the worker.
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!(queue = %self.config.name, "worker thread exited with a panic");
            }
        }
    }
}

struct AbandonOnPanic<'a>(&'a Inner);

impl Drop for AbandonOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abandon();
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    info!(
        queue = %inner.config.name,
        priority_offset = inner.config.priority_offset,
        "dispatch worker started"
    );
    let _abandon = AbandonOnPanic(&inner);

    let mut state = inner.lock_state();
    loop {
        while state.running && state.heap.is_empty() {
            state = inner.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        let now = Instant::now();
        let Some(due) = state.heap.peek().map(|next| next.due) else {
            // Stopped and nothing left.
            break;
        };

        if due > now {
            if state.running {
                // A newly submitted earlier task wakes this wait early.
                state = inner
                    .cond
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            } else {
                let abandoned = state.heap.pop();
                drop(state);
                debug!(queue = %inner.config.name, "dropping delayed task at shutdown");
                drop(abandoned);
                state = inner.lock_state();
            }
            continue;
        }

        let Some(next) = state.heap.pop() else {
            continue;
        };
        drop(state);

        trace!(queue = %inner.config.name, seq = next.seq, "running task");
        inner.execute(next.task);

        state = inner.lock_state();
    }
    drop(state);

    info!(queue = %inner.config.name, "dispatch worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
