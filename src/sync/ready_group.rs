//! Multi-participant readiness barrier with per-stage timeout.
//!
//! A `ReadyGroup` waits for a dynamic set of participants to acknowledge.
//! Completion fires exactly once per `start`, on the stack of whichever call
//! readied the final participant (the timeout task included). Participant ids
//! are per-use: the group is reset and re-armed for every stage, and a
//! generation counter lets stale timer tasks observe that their barrier was
//! abandoned.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::constants::DEFAULT_READY_GROUP_TIMEOUT_SECS;

type Callback = Arc<dyn Fn(&ReadyGroup) + Send + Sync>;

struct Inner {
    participants: BTreeMap<i64, bool>,
    timeout_secs: u64,
    running: bool,
    completed: bool,
    generation: u64,
    on_completed: Option<Callback>,
    on_timeout: Option<Callback>,
}

/// Cloneable handle to a shared barrier.
#[derive(Clone)]
pub struct ReadyGroup {
    inner: Arc<Mutex<Inner>>,
    handle: Handle,
}

impl ReadyGroup {
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                participants: BTreeMap::new(),
                timeout_secs: DEFAULT_READY_GROUP_TIMEOUT_SECS,
                running: false,
                completed: false,
                generation: 0,
                on_completed: None,
                on_timeout: None,
            })),
            handle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timeout_interval(&self, secs: u64) {
        self.lock().timeout_secs = secs;
    }

    pub fn on_completed<F>(&self, f: F)
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.lock().on_completed = Some(Arc::new(f));
    }

    pub fn on_timeout<F>(&self, f: F)
    where
        F: Fn(&ReadyGroup) + Send + Sync + 'static,
    {
        self.lock().on_timeout = Some(Arc::new(f));
    }

    pub fn reset_participants(&self) {
        self.lock().participants.clear();
    }

    pub fn add(&self, id: i64, ready: bool) {
        self.lock().participants.insert(id, ready);
    }

    pub fn get_participant_states(&self) -> BTreeMap<i64, bool> {
        self.lock().participants.clone()
    }

    /// Mark one participant ready. Unknown ids and calls after completion are
    /// ignored. The completion callback runs on this caller's stack when the
    /// final participant turns ready.
    pub fn ready(&self, id: i64) {
        let completed_cb = {
            let mut inner = self.lock();
            if !inner.running || inner.completed {
                return;
            }
            match inner.participants.get_mut(&id) {
                Some(state) => *state = true,
                None => return,
            }
            if inner.participants.values().all(|ready| *ready) {
                inner.completed = true;
                inner.on_completed.clone()
            } else {
                None
            }
        };

        if let Some(cb) = completed_cb {
            cb(self);
        }
    }

    /// Arm the barrier and its timeout timer. If every participant is already
    /// ready the completion fires immediately on this stack.
    pub fn start(&self) {
        let (generation, timeout_secs) = {
            let mut inner = self.lock();
            inner.running = true;
            inner.completed = false;
            inner.generation += 1;
            (inner.generation, inner.timeout_secs)
        };

        let group = self.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            group.fire_timeout(generation);
        });

        self.try_complete_pre_ready();
    }

    /// Abandon the current barrier: the pending timer becomes stale and the
    /// next completion is suppressed until `start` is called again.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.running = false;
        inner.generation += 1;
    }

    fn try_complete_pre_ready(&self) {
        let completed_cb = {
            let mut inner = self.lock();
            if inner.running
                && !inner.completed
                && !inner.participants.is_empty()
                && inner.participants.values().all(|ready| *ready)
            {
                inner.completed = true;
                inner.on_completed.clone()
            } else {
                None
            }
        };
        if let Some(cb) = completed_cb {
            cb(self);
        }
    }

    fn fire_timeout(&self, generation: u64) {
        let timeout_cb = {
            let inner = self.lock();
            if inner.generation != generation || !inner.running || inner.completed {
                return;
            }
            inner.on_timeout.clone()
        };

        log::debug!("ready group timed out, completing outstanding participants");
        match timeout_cb {
            Some(cb) => cb(self),
            None => {
                // Default timeout behavior: ready everyone still outstanding,
                // which forces completion.
                for (id, ready) in self.get_participant_states() {
                    if !ready {
                        self.ready(id);
                    }
                }
            }
        }
    }
}
