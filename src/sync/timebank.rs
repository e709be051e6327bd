//! Cancellable single-shot scheduled task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

struct Pending {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// Holds at most one scheduled task. Scheduling a new task supersedes the
/// pending one, which is invoked with `cancelled = true`; `cancel` does the
/// same without scheduling a replacement.
pub struct TimeBank {
    slot: Arc<Mutex<Option<Pending>>>,
    next_id: Mutex<u64>,
    handle: Handle,
}

impl TimeBank {
    pub fn new(handle: Handle) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: Mutex::new(0),
            handle,
        }
    }

    fn lock_slot(slot: &Mutex<Option<Pending>>) -> MutexGuard<'_, Option<Pending>> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `callback` to run after `delay`. Any previously pending task
    /// is cancelled first (its callback runs with `cancelled = true`).
    pub fn new_task<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let superseded = Self::lock_slot(&self.slot).replace(Pending {
            id,
            cancel: cancel_tx,
        });
        if let Some(prev) = superseded {
            let _ = prev.cancel.send(());
        }

        let slot = Arc::clone(&self.slot);
        self.handle.spawn(async move {
            let mut callback = Some(callback);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut pending = Self::lock_slot(&slot);
                        if pending.as_ref().map(|p| p.id) == Some(id) {
                            *pending = None;
                        }
                    }
                    if let Some(cb) = callback.take() {
                        cb(false);
                    }
                }
                _ = cancel_rx => {
                    if let Some(cb) = callback.take() {
                        cb(true);
                    }
                }
            }
        });
    }

    /// Cancel the pending task, if any.
    pub fn cancel(&self) {
        if let Some(pending) = Self::lock_slot(&self.slot).take() {
            let _ = pending.cancel.send(());
        }
    }
}
