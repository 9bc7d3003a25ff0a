use crate::task::DispatchTask;
use std::cmp::Ordering;
use std::time::Instant;

/// A task waiting in a dispatch queue together with the time it becomes due.
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed: the task with the
/// earliest due time compares greatest. Equal due times fall back to the
/// submission sequence number, which keeps ties in FIFO order.
#[derive(Debug)]
pub struct ScheduledTask {
    pub due: Instant,
    pub seq: u64,
    pub task: DispatchTask,
}

impl ScheduledTask {
    pub fn new(due: Instant, seq: u64, task: DispatchTask) -> Self {
        Self { due, seq, task }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.due <= now
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
