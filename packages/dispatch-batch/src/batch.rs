use crate::cancel::CancellationListener;
use crate::error::BatchError;
use dispatch_queue::DispatchTask;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(0);

// Held across the cycle check and the link it guards, so concurrent
// re-parenting can never close a loop in the enclosing chain.
static REPARENT: Mutex<()> = Mutex::new(());

struct BatchState {
    id: u64,
    cancelled: AtomicBool,
    finished: AtomicBool,
    enclosing: Mutex<Option<BatchHandle>>,
}

/// Shared cancellation state of a [`TaskBatch`].
///
/// The handle outlives the batch's move into a queue, so it is what gets
/// registered on a [`CancellationToken`](crate::CancellationToken) and what a
/// nested batch holds as its enclosing batch.
#[derive(Clone)]
pub struct BatchHandle {
    state: Arc<BatchState>,
}

impl BatchHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(BatchState {
                id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                enclosing: Mutex::new(None),
            }),
        }
    }

    fn lock_enclosing(&self) -> MutexGuard<'_, Option<BatchHandle>> {
        self.state
            .enclosing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// True once the batch has been invoked to completion.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn enclosing(&self) -> Option<BatchHandle> {
        self.lock_enclosing().clone()
    }

    pub fn same_batch(&self, other: &BatchHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Cancel this batch and escalate to every batch enclosing it.
    ///
    /// A batch that has already finished is left alone and stops the
    /// escalation. Returns whether this batch ended up cancelled.
    pub fn cancel(&self) -> bool {
        let mut next = Some(self.clone());
        while let Some(batch) = next {
            if batch.is_finished() {
                debug!(batch = batch.id(), "batch already finished, cancellation ignored");
                break;
            }
            if !batch.state.cancelled.swap(true, Ordering::AcqRel) {
                debug!(batch = batch.id(), "batch cancelled");
            }
            next = batch.enclosing();
        }
        self.is_cancelled()
    }
}

impl CancellationListener for BatchHandle {
    fn on_cancel(&self) {
        self.cancel();
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// An ordered group of tasks that runs, and is cancelled, as one unit.
#[derive(Debug)]
pub struct TaskBatch {
    tasks: SmallVec<[DispatchTask; 4]>,
    handle: BatchHandle,
}

impl Default for TaskBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBatch {
    pub fn new() -> Self {
        Self {
            tasks: SmallVec::new(),
            handle: BatchHandle::new(),
        }
    }

    pub fn add_task(&mut self, task: impl Into<DispatchTask>) {
        self.tasks.push(task.into());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn cancel_handle(&self) -> BatchHandle {
        self.handle.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Make `parent` the batch cancellation escalates to, replacing any
    /// previous one. Fails if `parent` is this batch or is enclosed by it.
    pub fn set_enclosing_batch(&mut self, parent: BatchHandle) -> Result<(), BatchError> {
        let _reparent = REPARENT.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ancestor = Some(parent.clone());
        while let Some(batch) = ancestor {
            if batch.same_batch(&self.handle) {
                return Err(BatchError::Cycle {
                    batch: self.handle.id(),
                    parent: parent.id(),
                });
            }
            ancestor = batch.enclosing();
        }

        *self.handle.lock_enclosing() = Some(parent);
        Ok(())
    }

    /// Detach and return the enclosing batch.
    pub fn take_enclosing_batch(&mut self) -> Option<BatchHandle> {
        self.handle.lock_enclosing().take()
    }

    pub fn enclosing_batch(&self) -> Option<BatchHandle> {
        self.handle.enclosing()
    }

    /// Cancellation notification, normally delivered through a token.
    pub fn on_cancel(&self) {
        self.handle.cancel();
    }

    /// Run every task in the order added, on the calling thread.
    ///
    /// Cancellation is checked before each task; a task that is already
    /// running is never interrupted. Returns how many tasks ran.
    pub fn invoke(self) -> usize {
        let Self { tasks, handle } = self;
        let total = tasks.len();
        let mut ran = 0;

        for task in tasks {
            if handle.is_cancelled() {
                debug!(batch = handle.id(), skipped = total - ran, "skipping cancelled batch tasks");
                break;
            }
            task.run();
            ran += 1;
        }

        handle.state.finished.store(true, Ordering::Release);
        ran
    }

    /// Wrap the batch as a single task for submission to a queue.
    pub fn into_task(self) -> DispatchTask {
        DispatchTask::new(move || {
            self.invoke();
        })
    }
}
