//! Single-hand driver.
//!
//! [`Game`] owns one hand's state and routes backend events to the readiness
//! barrier and the registered observers. States returned by the backend are
//! funneled through a bounded channel drained by a single consumer task, so
//! observers always run serially and in the order the backend produced the
//! states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::backend::GameBackend;
use super::state::{GameAction, GameEvent, GameOptions, GameState, Position};
use super::GameError;
use crate::constants::GAME_STATE_CHANNEL_CAPACITY;
use crate::sync::ReadyGroup;

type StateHook = Arc<dyn Fn(&GameState) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&GameState, &GameError) + Send + Sync>;

#[derive(Clone)]
struct Hooks {
    antes_received: StateHook,
    blinds_received: StateHook,
    state_updated: StateHook,
    round_closed: StateHook,
    error_updated: ErrorHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            antes_received: Arc::new(|_| {}),
            blinds_received: Arc::new(|_| {}),
            state_updated: Arc::new(|_| {}),
            round_closed: Arc::new(|_| {}),
            error_updated: Arc::new(|_, _| {}),
        }
    }
}

pub struct Game {
    backend: Arc<dyn GameBackend>,
    options: GameOptions,
    rg: ReadyGroup,
    state: Mutex<Option<GameState>>,
    hooks: Mutex<Hooks>,
    is_closed: AtomicBool,
    states_tx: mpsc::Sender<GameState>,
    states_rx: Mutex<Option<mpsc::Receiver<GameState>>>,
    handle: Handle,
}

impl Game {
    pub fn new(backend: Arc<dyn GameBackend>, options: GameOptions, handle: Handle) -> Arc<Self> {
        let (states_tx, states_rx) = mpsc::channel(GAME_STATE_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            options,
            rg: ReadyGroup::new(handle.clone()),
            state: Mutex::new(None),
            hooks: Mutex::new(Hooks::default()),
            is_closed: AtomicBool::new(false),
            states_tx,
            states_rx: Mutex::new(Some(states_rx)),
            handle,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<GameState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks_snapshot(&self) -> Hooks {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_hook(&self, update: impl FnOnce(&mut Hooks)) {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut hooks);
    }

    pub fn on_antes_received<F: Fn(&GameState) + Send + Sync + 'static>(&self, f: F) {
        self.set_hook(|h| h.antes_received = Arc::new(f));
    }

    pub fn on_blinds_received<F: Fn(&GameState) + Send + Sync + 'static>(&self, f: F) {
        self.set_hook(|h| h.blinds_received = Arc::new(f));
    }

    pub fn on_game_state_updated<F: Fn(&GameState) + Send + Sync + 'static>(&self, f: F) {
        self.set_hook(|h| h.state_updated = Arc::new(f));
    }

    pub fn on_game_round_closed<F: Fn(&GameState) + Send + Sync + 'static>(&self, f: F) {
        self.set_hook(|h| h.round_closed = Arc::new(f));
    }

    pub fn on_game_error_updated<F: Fn(&GameState, &GameError) + Send + Sync + 'static>(
        &self,
        f: F,
    ) {
        self.set_hook(|h| h.error_updated = Arc::new(f));
    }

    /// Snapshot of the current hand state, if any.
    pub fn state(&self) -> Option<GameState> {
        self.lock_state().clone()
    }

    fn current_state(&self) -> Result<GameState, GameError> {
        self.state().ok_or(GameError::InvalidAction)
    }

    fn store(&self, gs: GameState) {
        *self.lock_state() = Some(gs);
    }

    fn push_state(&self, gs: GameState) {
        self.store(gs.clone());
        if self.is_closed.load(Ordering::SeqCst) {
            return;
        }
        match self.states_tx.try_send(gs) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::error!("game state channel full, dropping state update");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Spawn the consumer task and create the hand on the backend.
    pub fn start(self: &Arc<Self>) -> Result<GameState, GameError> {
        let receiver = self
            .states_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            return Err(GameError::InvalidAction);
        };

        let game = Arc::clone(self);
        self.handle.spawn(async move {
            while let Some(state) = receiver.recv().await {
                if Game::dispatch(&game, state) {
                    break;
                }
            }
        });

        let gs = self.backend.create_game(&self.options)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    /// Handle one backend-produced state. Returns true once the hand closed.
    ///
    /// States were already stored by `push_state`; only the barrier events
    /// store again, because granting `ready`/`pay` rights mutates the
    /// snapshot.
    fn dispatch(game: &Arc<Self>, mut gs: GameState) -> bool {
        let hooks = game.hooks_snapshot();
        let event = gs.status.current_event;
        match event {
            GameEvent::Unknown => {
                (hooks.error_updated)(&gs, &GameError::UnknownEvent);
                return false;
            }
            GameEvent::ReadyRequested => {
                for player in gs.players.iter_mut() {
                    player.allow_action(GameAction::Ready);
                }
                game.store(gs.clone());
                game.arm_ready_barrier(&gs);
            }
            GameEvent::AnteRequested => {
                if gs.meta.ante > 0 {
                    for player in gs.players.iter_mut() {
                        player.allow_action(GameAction::Pay);
                    }
                    game.store(gs.clone());
                    game.arm_ante_barrier(&gs);
                }
            }
            GameEvent::BlindsRequested => {
                let payers = game.blind_payers(&gs);
                for idx in &payers {
                    if let Some(player) = gs.get_player_mut(*idx) {
                        player.allow_action(GameAction::Pay);
                    }
                }
                game.store(gs.clone());
                game.arm_blinds_barrier(&payers);
            }
            GameEvent::RoundClosed => {
                (hooks.round_closed)(&gs);
                if let Err(err) = game.next() {
                    (hooks.error_updated)(&gs, &err);
                }
            }
            GameEvent::GameClosed => {
                game.is_closed.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
        (hooks.state_updated)(&gs);
        event == GameEvent::GameClosed
    }

    /// Positions owing a blind this hand, in game-player index form.
    fn blind_payers(&self, gs: &GameState) -> Vec<usize> {
        let blind = gs.meta.blind;
        gs.players
            .iter()
            .filter(|p| {
                (blind.bb > 0 && p.positions.contains(&Position::Bb))
                    || (blind.sb > 0 && p.positions.contains(&Position::Sb))
                    || (blind.dealer > 0 && p.positions.contains(&Position::Dealer))
            })
            .map(|p| p.idx)
            .collect()
    }

    fn arm_ready_barrier(self: &Arc<Self>, gs: &GameState) {
        self.rg.stop();
        let weak = Arc::downgrade(self);
        self.rg.on_completed(move |_| {
            let Some(game) = weak.upgrade() else { return };
            if let Err(err) = game.ready_for_all() {
                game.raise_error(&err);
            }
        });
        self.rg.reset_participants();
        for player in &gs.players {
            self.rg.add(player.idx as i64, false);
        }
        self.rg.start();
    }

    fn arm_ante_barrier(self: &Arc<Self>, gs: &GameState) {
        self.rg.stop();
        let weak = Arc::downgrade(self);
        self.rg.on_completed(move |_| {
            let Some(game) = weak.upgrade() else { return };
            match game.pay_ante() {
                Ok(new_state) => {
                    let hooks = game.hooks_snapshot();
                    (hooks.antes_received)(&new_state);
                }
                Err(err) => game.raise_error(&err),
            }
        });
        self.rg.reset_participants();
        for player in &gs.players {
            self.rg.add(player.idx as i64, false);
        }
        self.rg.start();
    }

    fn arm_blinds_barrier(self: &Arc<Self>, payers: &[usize]) {
        self.rg.stop();
        let weak = Arc::downgrade(self);
        self.rg.on_completed(move |_| {
            let Some(game) = weak.upgrade() else { return };
            match game.pay_blinds() {
                Ok(new_state) => {
                    let hooks = game.hooks_snapshot();
                    (hooks.blinds_received)(&new_state);
                }
                Err(err) => game.raise_error(&err),
            }
        });
        self.rg.reset_participants();
        for idx in payers {
            self.rg.add(*idx as i64, false);
        }
        self.rg.start();
    }

    fn raise_error(&self, err: &GameError) {
        let hooks = self.hooks_snapshot();
        if let Some(gs) = self.state() {
            (hooks.error_updated)(&gs, err);
        }
    }

    pub fn next(&self) -> Result<GameState, GameError> {
        let gs = self.backend.next(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn ready_for_all(&self) -> Result<GameState, GameError> {
        let gs = self.backend.ready_for_all(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn pay_ante(&self) -> Result<GameState, GameError> {
        let gs = self.backend.pay_ante(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn pay_blinds(&self) -> Result<GameState, GameError> {
        let gs = self.backend.pay_blinds(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn ready(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_action_move(player_idx, GameAction::Ready)?;
        self.rg.ready(player_idx as i64);
        self.current_state()
    }

    /// During the ante and blinds stages a payment is an acknowledgement into
    /// the barrier; the backend collects the chips once everyone acked.
    pub fn pay(&self, player_idx: usize, chips: i64) -> Result<GameState, GameError> {
        self.validate_action_move(player_idx, GameAction::Pay)?;
        let event = self.current_state()?.status.current_event;
        if matches!(event, GameEvent::AnteRequested | GameEvent::BlindsRequested) {
            self.rg.ready(player_idx as i64);
            return self.current_state();
        }

        let gs = self.backend.pay(&self.current_state()?, chips)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn pass(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.pass(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn fold(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.fold(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn check(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.check(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn call(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.call(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn allin(&self, player_idx: usize) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.allin(&self.current_state()?)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn bet(&self, player_idx: usize, chips: i64) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.bet(&self.current_state()?, chips)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    pub fn raise(&self, player_idx: usize, chip_level: i64) -> Result<GameState, GameError> {
        self.validate_play_move(player_idx)?;
        let gs = self.backend.raise(&self.current_state()?, chip_level)?;
        self.push_state(gs.clone());
        Ok(gs)
    }

    fn validate_action_move(&self, player_idx: usize, action: GameAction) -> Result<(), GameError> {
        let gs = self.current_state()?;
        if gs.get_player(player_idx).is_none() {
            return Err(GameError::PlayerNotFound);
        }
        if !gs.has_action(player_idx, action) {
            return Err(GameError::InvalidAction);
        }
        Ok(())
    }

    fn validate_play_move(&self, player_idx: usize) -> Result<(), GameError> {
        let gs = self.current_state()?;
        if gs.get_player(player_idx).is_none() {
            return Err(GameError::PlayerNotFound);
        }
        if gs.status.current_player != Some(player_idx) {
            return Err(GameError::InvalidAction);
        }
        Ok(())
    }
}
