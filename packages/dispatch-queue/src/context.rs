//! Thread-local execution contexts.
//!
//! A [`TaskContext`] records which queue is executing on the current thread
//! and collects work deferred by the running task. Contexts nest: entering a
//! new one pushes a frame onto a per-thread stack and dropping the guard pops
//! it again, so the previous context becomes current on every exit path,
//! unwinding included.
//!
//! Deferred tasks are never run by the context itself. Whoever owns the guard
//! drains them with [`ContextRef::take_next_deferred_task`] or
//! [`ContextRef::drain`] once the current task has returned, which keeps a
//! chain of re-entrant dispatches from growing the call stack.

use crate::task::DispatchTask;
use crate::DispatchQueue;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

struct Frame {
    id: u64,
    queue: Arc<dyn DispatchQueue>,
    deadline: Option<Instant>,
    deferred: Vec<DispatchTask>,
    // Index of the next deferred task to hand out.
    cursor: usize,
}

thread_local! {
    static CONTEXTS: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Identifies one active context on the current thread.
///
/// Two refs compare equal iff they name the same context. Operations on a ref
/// whose context has already been left are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRef {
    id: u64,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

/// Scoped guard for an active context. Dropping it restores the previous one.
#[derive(Debug)]
pub struct TaskContext {
    current: ContextRef,
}

impl TaskContext {
    /// Make a new context for `queue` current on this thread. `deadline`
    /// bounds how long the owner should keep draining deferred work.
    pub fn new(queue: Arc<dyn DispatchQueue>, deadline: Option<Instant>) -> Self {
        let id = NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        let depth = CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                id,
                queue,
                deadline,
                deferred: Vec::new(),
                cursor: 0,
            });
            stack.len() - 1
        });

        Self {
            current: ContextRef {
                id,
                depth,
                _not_send: PhantomData,
            },
        }
    }

    /// The innermost active context on this thread.
    pub fn current() -> Option<ContextRef> {
        CONTEXTS.with(|stack| {
            let stack = stack.borrow();
            stack.last().map(|frame| ContextRef {
                id: frame.id,
                depth: stack.len() - 1,
                _not_send: PhantomData,
            })
        })
    }

    /// The queue executing on this thread, if any context is active.
    pub fn current_queue() -> Option<Arc<dyn DispatchQueue>> {
        CONTEXTS.with(|stack| stack.borrow().last().map(|frame| frame.queue.clone()))
    }

    /// Defer `task` onto the innermost context. Hands the task back if no
    /// context is active.
    pub fn defer_current(task: impl Into<DispatchTask>) -> Result<(), DispatchTask> {
        match Self::current() {
            Some(ctx) => ctx.defer(task),
            None => Err(task.into()),
        }
    }
}

impl Deref for TaskContext {
    type Target = ContextRef;

    fn deref(&self) -> &ContextRef {
        &self.current
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        let ContextRef { id, depth, .. } = self.current;
        // The popped frames are dropped after the borrow ends, since their
        // tasks' destructors may look at the context stack themselves.
        let popped = CONTEXTS.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.get(depth) {
                Some(frame) if frame.id == id => {
                    if stack.len() > depth + 1 {
                        warn!(
                            context = id,
                            nested = stack.len() - depth - 1,
                            "task context left before its nested contexts"
                        );
                    }
                    stack.split_off(depth)
                }
                _ => Vec::new(),
            }
        });

        for frame in popped.unwrap_or_default() {
            let untaken = frame.deferred.len() - frame.cursor;
            if untaken > 0 {
                debug!(context = frame.id, untaken, "dropping deferred tasks with their context");
            }
        }
    }
}

impl ContextRef {
    fn with_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.get_mut(self.depth) {
                Some(frame) if frame.id == self.id => Some(f(frame)),
                _ => None,
            }
        })
    }

    /// Queue `task` to run after the current one. Nothing runs immediately.
    /// Hands the task back if this context is no longer active.
    pub fn defer(&self, task: impl Into<DispatchTask>) -> Result<(), DispatchTask> {
        let mut task = Some(task.into());
        self.with_frame(|frame| {
            if let Some(task) = task.take() {
                frame.deferred.push(task);
            }
        });
        match task {
            Some(task) => Err(task),
            None => Ok(()),
        }
    }

    /// The next deferred task in FIFO order, or the empty sentinel once
    /// everything has been taken.
    pub fn take_next_deferred_task(&self) -> DispatchTask {
        self.with_frame(|frame| {
            let Some(slot) = frame.deferred.get_mut(frame.cursor) else {
                return DispatchTask::empty();
            };
            let task = std::mem::take(slot);
            frame.cursor += 1;
            if frame.cursor == frame.deferred.len() {
                frame.deferred.clear();
                frame.cursor = 0;
            }
            task
        })
        .unwrap_or_default()
    }

    /// Every deferred task not yet taken, in FIFO order.
    pub fn take_remaining(&self) -> Vec<DispatchTask> {
        self.with_frame(|frame| {
            let cursor = std::mem::take(&mut frame.cursor);
            let mut deferred = std::mem::take(&mut frame.deferred);
            deferred.drain(..cursor);
            deferred
        })
        .unwrap_or_default()
    }

    /// Run deferred tasks on this thread until none are left or the deadline
    /// has passed. Tasks deferred while draining are picked up too.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while !self.deadline_passed() {
            let task = self.take_next_deferred_task();
            if task.is_empty() {
                break;
            }
            task.run();
            ran += 1;
        }
        ran
    }

    pub fn queue(&self) -> Option<Arc<dyn DispatchQueue>> {
        self.with_frame(|frame| frame.queue.clone())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.with_frame(|frame| frame.deadline).flatten()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Number of deferred tasks not yet taken.
    pub fn pending(&self) -> usize {
        self.with_frame(|frame| frame.deferred.len() - frame.cursor)
            .unwrap_or(0)
    }
}
