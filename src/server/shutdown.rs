use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable cancellation handle shared by the acceptor, connection handlers,
/// the benchmark finalizer and the signal listener.
///
/// The flag is the source of truth; the [`Notify`] only wakes an acceptor
/// parked in `accept()`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn trigger(&self) -> bool {
        let first = !self.done.swap(true, Ordering::AcqRel);
        if first {
            // Stores a permit if the acceptor is not currently waiting.
            self.notify.notify_one();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn notified(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}
