pub mod config;
pub mod context;
pub mod error;
pub mod scheduled;
pub mod task;
pub mod thread;

use futures::channel::oneshot;
use std::time::Duration;

/// The surface collaborators program against when handing work to a queue.
///
/// A queue runs its tasks one at a time on a single thread, in non-decreasing
/// due-time order. Implementations must be shareable across threads so that a
/// handle can be stored in a [`TaskContext`] and used from anywhere.
pub trait DispatchQueue: Send + Sync {
    /// Schedule `task` to run no earlier than `delay` from now.
    /// Tasks submitted after `quit` are dropped without running.
    fn run_async_after(&self, task: DispatchTask, delay: Duration);

    /// Schedule `task` to run as soon as the queue gets to it.
    fn run_async(&self, task: DispatchTask) {
        self.run_async_after(task, Duration::ZERO);
    }

    /// Run `task` on the queue and block until it has finished.
    ///
    /// Returns `false` if the task was dropped instead of run, either because
    /// the queue was already stopped or because it panicked. Calling this from
    /// the queue's own thread deadlocks; check [`is_on_thread`](Self::is_on_thread)
    /// first.
    fn run_sync(&self, task: DispatchTask) -> bool {
        let (done, wait) = oneshot::channel::<()>();
        self.run_async(DispatchTask::new(move || {
            task.run();
            let _ = done.send(());
        }));
        futures::executor::block_on(wait).is_ok()
    }

    /// True iff called from the thread this queue owns.
    fn is_on_thread(&self) -> bool;

    /// True until `quit` has been called.
    fn is_running(&self) -> bool;

    /// Stop accepting work and shut the worker down.
    fn quit(&self);
}

pub use config::{PanicPolicy, QueueConfig};
pub use context::{ContextRef, TaskContext};
pub use error::DispatchError;
pub use scheduled::ScheduledTask;
pub use task::DispatchTask;
pub use thread::TaskDispatchThread;
