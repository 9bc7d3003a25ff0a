use std::fmt;

type BoxedFn = Box<dyn FnOnce() + Send + 'static>;

/// A single unit of work submitted to a dispatch queue.
///
/// A task is move-only and runs at most once. The default value is the empty
/// sentinel meaning "no task", which is what
/// [`TaskContext::take_next_deferred_task`](crate::TaskContext::take_next_deferred_task)
/// hands back once its deferred list is exhausted.
#[derive(Default)]
pub struct DispatchTask {
    f: Option<BoxedFn>,
}

impl DispatchTask {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            f: Some(Box::new(f)),
        }
    }

    /// The "no task" sentinel.
    pub fn empty() -> Self {
        Self { f: None }
    }

    pub fn is_empty(&self) -> bool {
        self.f.is_none()
    }

    /// Runs the task on the calling thread. Running the sentinel does nothing.
    pub fn run(self) {
        if let Some(f) = self.f {
            f();
        }
    }
}

impl<F> From<F> for DispatchTask
where
    F: FnOnce() + Send + 'static,
{
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

impl fmt::Debug for DispatchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTask")
            .field("empty", &self.is_empty())
            .finish()
    }
}
