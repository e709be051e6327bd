//! Settlement-acknowledgement barrier gating the next hand open.
//!
//! Where [`ReadyGroup`](super::ready_group::ReadyGroup) coordinates stages
//! inside a hand, this barrier spans hands: it collects "finished watching
//! settlement" acknowledgements for hand N and signals once that hand N + 1
//! may open, either when every expected participant acked or when the
//! configured timeout elapses.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;

/// Snapshot handed to the ready callback.
#[derive(Debug, Clone)]
pub struct OpenGameState {
    pub game_count: u64,
    pub participants: HashMap<String, usize>,
    pub ready_ids: HashSet<String>,
}

struct Inner {
    state: OpenGameState,
    fired: bool,
    generation: u64,
}

/// Per-hand acknowledgement barrier with a single outcome callback.
pub struct OpenGameManager {
    inner: Arc<Mutex<Inner>>,
    timeout_secs: u64,
    handle: Handle,
    on_ready: Arc<dyn Fn(OpenGameState) + Send + Sync>,
}

impl OpenGameManager {
    pub fn new<F>(timeout_secs: u64, handle: Handle, on_ready: F) -> Self
    where
        F: Fn(OpenGameState) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: OpenGameState {
                    game_count: 0,
                    participants: HashMap::new(),
                    ready_ids: HashSet::new(),
                },
                // Nothing to fire until the first setup.
                fired: true,
                generation: 0,
            })),
            timeout_secs,
            handle,
            on_ready: Arc::new(on_ready),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the barrier for a new hand and arm the acknowledgement timeout.
    pub fn setup(&self, game_count: u64, participants: HashMap<String, usize>) {
        let generation = {
            let mut inner = self.lock();
            inner.state = OpenGameState {
                game_count,
                participants,
                ready_ids: HashSet::new(),
            };
            inner.fired = false;
            inner.generation += 1;
            inner.generation
        };
        log::debug!("open game barrier armed for game count {game_count}");

        let inner = Arc::clone(&self.inner);
        let on_ready = Arc::clone(&self.on_ready);
        let timeout = Duration::from_secs(self.timeout_secs);
        self.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let snapshot = {
                let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.generation != generation || guard.fired {
                    return;
                }
                guard.fired = true;
                guard.state.clone()
            };
            log::debug!(
                "open game barrier timed out with {}/{} acks",
                snapshot.ready_ids.len(),
                snapshot.participants.len()
            );
            on_ready(snapshot);
        });
    }

    /// Record one settlement acknowledgement. Ids outside the participant set
    /// are ignored; the callback fires once all participants acked.
    pub fn ready(&self, player_id: &str) {
        let snapshot = {
            let mut inner = self.lock();
            if inner.fired || !inner.state.participants.contains_key(player_id) {
                return;
            }
            inner.state.ready_ids.insert(player_id.to_string());
            if inner.state.ready_ids.len() == inner.state.participants.len() {
                inner.fired = true;
                Some(inner.state.clone())
            } else {
                None
            }
        };

        if let Some(state) = snapshot {
            (self.on_ready)(state);
        }
    }
}
