use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Receives a notification when a [`CancellationToken`] is cancelled.
pub trait CancellationListener: Send + Sync {
    fn on_cancel(&self);
}

/// Identifies one listener registered on a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(Registration, Arc<dyn CancellationListener>)>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    listeners: Mutex<Listeners>,
}

/// A cooperative cancellation flag shared by every clone of the token.
///
/// Cancelling notifies each registered listener exactly once. Nothing is
/// interrupted; listeners decide what cancellation means for their work.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register `listener`. If the token is already cancelled the listener
    /// is notified before this returns.
    pub fn register(&self, listener: Arc<dyn CancellationListener>) -> Registration {
        let mut listeners = self.lock_listeners();
        let registration = Registration(listeners.next_id);
        listeners.next_id += 1;

        // Checked under the lock so a concurrent `cancel` cannot miss us.
        if self.is_cancelled() {
            drop(listeners);
            listener.on_cancel();
        } else {
            listeners.entries.push((registration, listener));
        }
        registration
    }

    /// Returns false if the listener was already notified or removed.
    pub fn unregister(&self, registration: Registration) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.entries.len();
        listeners.entries.retain(|(id, _)| *id != registration);
        listeners.entries.len() != before
    }

    /// Cancel the token. Only the first call notifies listeners.
    pub fn cancel(&self) {
        let notify = {
            let mut listeners = self.lock_listeners();
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut listeners.entries)
        };

        debug!(listeners = notify.len(), "cancellation requested");
        for (_, listener) in notify {
            listener.on_cancel();
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
