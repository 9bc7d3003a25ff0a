//! Cancellable groups of dispatch tasks.
//!
//! A [`TaskBatch`] bundles tasks that are submitted to a queue as one
//! [`DispatchTask`](dispatch_queue::DispatchTask) and cancelled as one unit.
//! Batches can be nested; cancelling an inner batch escalates to every batch
//! enclosing it. Cancellation arrives through a [`CancellationToken`], which
//! notifies registered [`CancellationListener`]s.

pub mod batch;
pub mod cancel;
pub mod error;

pub use batch::{BatchHandle, TaskBatch};
pub use cancel::{CancellationListener, CancellationToken, Registration};
pub use error::BatchError;
