//! The per-table coordinator: state, player management and action intake.
//!
//! All table mutation happens under one mutex per engine. Callbacks are
//! invoked while that lock may be held and must not re-enter the engine
//! synchronously; error events are therefore fanned out on spawned tasks.
//! Hand-driver barrier completions can call back into the engine, so the
//! entry points that feed a barrier (`player_ready`, `player_pay`,
//! `player_join`) release the lock before doing so.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;

use crate::constants::DEFAULT_READY_GROUP_TIMEOUT_SECS;
use crate::game::{Game, GameAction, GameBackend, GamePlayer};
use crate::seats::{SeatManager, SeatRing};
use crate::sync::{OpenGameManager, OpenGameState, ReadyGroup, TimeBank};

use super::model::{
    CompetitionMode, CompetitionRule, Table, TableBlindState, TablePlayerGameAction,
    TablePlayerState, TableState, TableStateEvent, TableStatus,
};
use super::settings::{JoinPlayer, TableEngineCallbacks, TableEngineOptions, TableSettings};
use super::statistics::{self, TablePlayerGameStatistics};
use super::TableEngineError;

/// Builds the seat manager for a freshly created table.
pub type SeatManagerFactory =
    dyn Fn(usize, CompetitionRule) -> Box<dyn SeatManager> + Send + Sync;

pub(crate) struct EngineCore {
    pub(crate) table: Option<Table>,
    pub(crate) seat_manager: Option<Box<dyn SeatManager>>,
    pub(crate) game: Option<Arc<Game>>,
}

pub struct TableEngine {
    pub(crate) options: TableEngineOptions,
    pub(crate) callbacks: TableEngineCallbacks,
    pub(crate) backend: Arc<dyn GameBackend>,
    pub(crate) handle: Handle,
    pub(crate) core: Mutex<EngineCore>,
    /// Barrier waiting for reserved players to physically join.
    pub(crate) rg: ReadyGroup,
    /// Barrier collecting settlement acknowledgements across hands.
    pub(crate) ogm: OpenGameManager,
    /// Deferred-continuation scheduler.
    pub(crate) timebank: TimeBank,
    pub(crate) is_released: AtomicBool,
    pub(crate) me: Weak<TableEngine>,
    seat_manager_factory: Box<SeatManagerFactory>,
}

impl TableEngine {
    /// Create an engine with the standard seat ring. Must be called within a
    /// tokio runtime; the current handle is captured for timer tasks.
    pub fn new(
        options: TableEngineOptions,
        callbacks: TableEngineCallbacks,
        backend: Arc<dyn GameBackend>,
    ) -> Arc<Self> {
        Self::with_seat_manager_factory(options, callbacks, backend, |seat_count, rule| {
            Box::new(SeatRing::new(seat_count, rule)) as Box<dyn SeatManager>
        })
    }

    /// Create an engine with a custom seat manager, e.g. for failure
    /// injection in tests.
    pub fn with_seat_manager_factory<F>(
        options: TableEngineOptions,
        callbacks: TableEngineCallbacks,
        backend: Arc<dyn GameBackend>,
        factory: F,
    ) -> Arc<Self>
    where
        F: Fn(usize, CompetitionRule) -> Box<dyn SeatManager> + Send + Sync + 'static,
    {
        let handle = Handle::current();
        Arc::new_cyclic(|me: &Weak<TableEngine>| {
            let weak = me.clone();
            let ogm = OpenGameManager::new(
                options.open_game_timeout,
                handle.clone(),
                move |state| {
                    if let Some(engine) = weak.upgrade() {
                        engine.handle_open_game_ready(state);
                    }
                },
            );
            TableEngine {
                options,
                callbacks,
                backend,
                handle: handle.clone(),
                core: Mutex::new(EngineCore {
                    table: None,
                    seat_manager: None,
                    game: None,
                }),
                rg: ReadyGroup::new(handle.clone()),
                ogm,
                timebank: TimeBank::new(handle),
                is_released: AtomicBool::new(false),
                me: me.clone(),
                seat_manager_factory: Box::new(factory),
            }
        })
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the table, if created.
    pub fn table(&self) -> Option<Table> {
        self.lock_core().table.clone()
    }

    /// The current hand driver, if a hand was ever started.
    pub fn game(&self) -> Option<Arc<Game>> {
        self.lock_core().game.clone()
    }

    // ----- lifecycle entry points -------------------------------------------

    pub fn create_table(&self, setting: TableSettings) -> Result<Table, TableEngineError> {
        if setting.join_players.len() > setting.meta.table_max_seat_count {
            return Err(TableEngineError::InvalidCreateSetting);
        }

        let max_seat_count = setting.meta.table_max_seat_count;
        let mut core = self.lock_core();
        core.seat_manager = Some((self.seat_manager_factory)(max_seat_count, setting.meta.rule));

        let status = if setting.blind.is_breaking() {
            TableStatus::Pausing
        } else {
            TableStatus::Created
        };
        let auto_join = setting.join_players.clone();
        core.table = Some(Table {
            id: setting.table_id.clone(),
            meta: setting.meta,
            state: TableState {
                status,
                game_state: None,
                player_states: Vec::new(),
                game_player_indexes: Vec::new(),
                game_count: 0,
                start_at: None,
                blind_state: setting.blind,
                current_dealer_seat: None,
                current_sb_seat: None,
                current_bb_seat: None,
                seat_map: vec![None; max_seat_count],
                next_bb_order_player_ids: Vec::new(),
                last_player_game_action: None,
                current_action_end_at: 0,
                game_blind_state: None,
            },
            update_at: Utc::now().timestamp(),
            update_serial: 0,
        });
        log::info!("table {} created", setting.table_id);
        self.emit_event(&mut core, "CreateTable", "");
        self.emit_table_state_event(&core, TableStateEvent::Created);

        if !auto_join.is_empty() {
            self.batch_add_players(&mut core, &auto_join)?;

            let mut balanced = false;
            if let Some(table) = core.table.as_mut() {
                if table.meta.mode == CompetitionMode::Mtt
                    && table.state.status != TableStatus::Pausing
                {
                    table.state.status = TableStatus::Balancing;
                    balanced = true;
                }
            }
            if balanced {
                self.emit_table_state_event(&core, TableStateEvent::StatusUpdated);
            }
            self.emit_event(&mut core, "CreateTable -> Auto Add Players", "");
        }

        core.table.clone().ok_or(TableEngineError::InvalidAction)
    }

    /// Stop auto-opening hands; the collaborator resumes the table later.
    pub fn pause_table(&self) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            table.state.status = TableStatus::Pausing;
        }
        self.emit_event(&mut core, "PauseTable", "");
        self.emit_table_state_event(&core, TableStateEvent::StatusUpdated);
        Ok(())
    }

    /// Terminal close; implies release.
    pub fn close_table(&self) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            table.state.status = TableStatus::Closed;
            log::info!("table {} closed", table.id);
        }
        self.is_released.store(true, Ordering::SeqCst);
        self.timebank.cancel();
        self.emit_event(&mut core, "CloseTable", "");
        self.emit_table_state_event(&core, TableStateEvent::StatusUpdated);
        Ok(())
    }

    /// Mark the engine released: pending continuations become no-ops.
    pub fn release_table(&self) -> Result<(), TableEngineError> {
        self.is_released.store(true, Ordering::SeqCst);
        self.timebank.cancel();
        Ok(())
    }

    /// Record the first-hand start time and ask the collaborator to set up
    /// the first hand.
    pub fn start_table_game(&self) -> Result<(), TableEngineError> {
        let snapshot = {
            let mut core = self.lock_core();
            let Some(table) = core.table.as_mut() else {
                return Err(TableEngineError::InvalidAction);
            };
            if table.state.start_at.is_some() {
                log::debug!("table {} game is already started", table.id);
                return Ok(());
            }
            table.state.start_at = Some(Utc::now().timestamp());
            self.emit_event(&mut core, "StartTableGame", "");

            let table = core.table.as_ref().ok_or(TableEngineError::InvalidAction)?;
            (
                table.meta.competition_id.clone(),
                table.id.clone(),
                table.state.game_count,
                table.state.player_states.clone(),
            )
        };

        let (competition_id, table_id, game_count, players) = snapshot;
        (self.callbacks.on_ready_open_first_table_game)(
            &competition_id,
            &table_id,
            game_count,
            &players,
        );
        Ok(())
    }

    /// Replace the applied blind level.
    pub fn update_blind(&self, level: i64, ante: i64, dealer: i64, sb: i64, bb: i64) {
        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            table.state.blind_state = TableBlindState {
                level,
                ante,
                dealer,
                sb,
                bb,
            };
        }
        self.emit_event(&mut core, "UpdateBlind", "");
    }

    /// Arm the settlement-ack barrier for the given hand.
    pub fn set_up_table_game(&self, game_count: u64, participants: HashMap<String, usize>) {
        self.ogm.setup(game_count, participants);
    }

    /// Batch player adjustment between hands. Returns player id to seat.
    pub fn update_table_players(
        &self,
        join_players: &[JoinPlayer],
        leave_player_ids: &[String],
    ) -> Result<HashMap<String, usize>, TableEngineError> {
        let mut core = self.lock_core();
        if !leave_player_ids.is_empty() {
            self.batch_remove_players(&mut core, leave_player_ids)?;
        }
        if !join_players.is_empty() {
            self.batch_add_players(&mut core, join_players)?;
        }

        let joined: Vec<&str> = join_players.iter().map(|p| p.player_id.as_str()).collect();
        self.emit_event(
            &mut core,
            "UpdateTablePlayers",
            &format!(
                "join: {}, leave: {}",
                joined.join(","),
                leave_player_ids.join(",")
            ),
        );

        Ok(core
            .table
            .as_ref()
            .map(|t| t.player_seat_map())
            .unwrap_or_default())
    }

    // ----- player table actions ---------------------------------------------

    /// Buy-in (new player) or rebuy (existing player).
    pub fn player_reserve(&self, join_player: JoinPlayer) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        let (existing_idx, player_count, max_seat_count) = {
            let table = core.table.as_ref().ok_or(TableEngineError::InvalidAction)?;
            (
                table.find_player_idx(&join_player.player_id),
                table.state.player_states.len(),
                table.meta.table_max_seat_count,
            )
        };

        match existing_idx {
            None => {
                if player_count == max_seat_count {
                    return Err(TableEngineError::NoEmptySeats);
                }
                self.batch_add_players(&mut core, std::slice::from_ref(&join_player))?;
            }
            Some(player_idx) => {
                {
                    let EngineCore {
                        table: table_slot,
                        seat_manager: sm_slot,
                        ..
                    } = &mut *core;
                    let table = table_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;
                    let sm = sm_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;

                    table.state.player_states[player_idx].bankroll += join_player.redeem_chips;
                    sm.update_player_has_chips(&join_player.player_id, true)?;
                }
                self.emit_player_state_event(&core, player_idx);
                self.emit_player_reserved_event(&core, player_idx);
            }
        }

        self.emit_event(&mut core, "PlayerReserve", &join_player.player_id);
        Ok(())
    }

    /// Player physically joins after reserving. Already-joined players are a
    /// no-op.
    pub fn player_join(&self, player_id: &str) -> Result<(), TableEngineError> {
        let rg_idx = {
            let mut core = self.lock_core();
            let joined_idx = {
                let EngineCore {
                    table: table_slot,
                    seat_manager: sm_slot,
                    ..
                } = &mut *core;
                let table = table_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;
                let sm = sm_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;

                let player_idx = table
                    .find_player_idx(player_id)
                    .ok_or(TableEngineError::PlayerNotFound)?;
                if table.state.player_states[player_idx].seat.is_none() {
                    return Err(TableEngineError::InvalidAction);
                }
                if table.state.player_states[player_idx].is_in {
                    return Ok(());
                }

                table.state.player_states[player_idx].is_in = true;
                sm.join_players(std::slice::from_ref(&player_id.to_string()))?;
                player_idx
            };
            self.emit_event(&mut core, "PlayerJoin", player_id);
            joined_idx
        };

        // Feed the auto-in barrier outside the lock: completing it re-enters
        // the engine.
        if let Some(false) = self.rg.get_participant_states().get(&(rg_idx as i64)) {
            self.rg.ready(rg_idx as i64);
        }
        Ok(())
    }

    /// Player finished watching the settlement of the current hand. Unknown
    /// players are a no-op.
    pub fn player_settlement_finish(&self, player_id: &str) -> Result<(), TableEngineError> {
        {
            let core = self.lock_core();
            let table = core.table.as_ref().ok_or(TableEngineError::InvalidAction)?;
            match table.find_player_idx(player_id) {
                None => {
                    log::debug!("settlement finish from unknown player {player_id}");
                    return Ok(());
                }
                Some(player_idx) => {
                    if !table.state.player_states[player_idx].is_in {
                        return Err(TableEngineError::InvalidAction);
                    }
                }
            }
        }

        // May open the next hand; must not hold the core lock.
        self.ogm.ready(player_id);
        Ok(())
    }

    /// Add chips to an existing player's bankroll.
    pub fn player_redeem_chips(&self, join_player: JoinPlayer) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        let table = core.table.as_mut().ok_or(TableEngineError::InvalidAction)?;
        let player_idx = table
            .find_player_idx(&join_player.player_id)
            .ok_or(TableEngineError::PlayerNotFound)?;
        table.state.player_states[player_idx].bankroll += join_player.redeem_chips;

        self.emit_event(&mut core, "PlayerRedeemChips", &join_player.player_id);
        self.emit_player_state_event(&core, player_idx);
        Ok(())
    }

    pub fn players_leave(&self, player_ids: &[String]) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        self.batch_remove_players(&mut core, player_ids)?;
        self.emit_event(&mut core, "PlayersLeave", &player_ids.join(","));
        self.emit_table_state_event(&core, TableStateEvent::PlayersLeave);
        Ok(())
    }

    /// Extend the pending action deadline; returns the new deadline.
    pub fn player_extend_action_deadline(
        &self,
        _player_id: &str,
        duration: i64,
    ) -> Result<i64, TableEngineError> {
        let mut core = self.lock_core();
        let end_at = {
            let table = core.table.as_mut().ok_or(TableEngineError::InvalidAction)?;
            table.state.current_action_end_at += duration;
            table.state.current_action_end_at
        };
        self.emit_event(&mut core, "PlayerExtendActionDeadline", "");
        Ok(end_at)
    }

    // ----- player game actions ----------------------------------------------

    pub fn player_ready(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        // Readying can complete a barrier that re-enters the engine, so the
        // lock is not held across the call.
        let gs = mv.game.ready(mv.game_player_idx)?;

        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            let action = Self::create_player_game_action(
                table,
                player_id,
                mv.player_idx,
                GameAction::Ready,
                0,
                gs.get_player(mv.game_player_idx),
            );
            table.state.last_player_game_action = Some(action);
        }
        Ok(())
    }

    pub fn player_pay(&self, player_id: &str, chips: i64) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.pay(mv.game_player_idx, chips)?;

        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            let action = Self::create_player_game_action(
                table,
                player_id,
                mv.player_idx,
                GameAction::Pay,
                chips,
                gs.get_player(mv.game_player_idx),
            );
            table.state.last_player_game_action = Some(action);
        }
        Ok(())
    }

    pub fn player_bet(&self, player_id: &str, chips: i64) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.bet(mv.game_player_idx, chips)?;
        let is_raiser = gs.status.current_raiser == Some(mv.game_player_idx);

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Bet,
            chips,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            stats.action_times += 1;
            if is_raiser {
                stats.raise_times += 1;
            }
            if stats.is_vpip_chance {
                stats.is_vpip = true;
            }
            if stats.is_c_bet_chance {
                stats.is_c_bet = true;
            }
        }
        Ok(())
    }

    pub fn player_raise(&self, player_id: &str, chip_level: i64) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.raise(mv.game_player_idx, chip_level)?;

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Raise,
            chip_level,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            stats.action_times += 1;
            stats.raise_times += 1;
            if stats.is_vpip_chance {
                stats.is_vpip = true;
            }
            if stats.is_pfr_chance {
                stats.is_pfr = true;
            }
            if stats.is_ats_chance {
                stats.is_ats = true;
            }
        }
        statistics::refresh_three_bet(&mut table.state.player_states, mv.player_idx);
        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            if stats.is_check_raise_chance {
                stats.is_check_raise = true;
            }
            if stats.is_c_bet_chance {
                stats.is_c_bet = true;
            }
        }
        Ok(())
    }

    pub fn player_call(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let wager = {
            let core = self.lock_core();
            core.table
                .as_ref()
                .and_then(|t| t.state.game_state.as_ref())
                .and_then(|gs| {
                    gs.get_player(mv.game_player_idx)
                        .map(|p| gs.status.current_wager - p.wager)
                })
                .unwrap_or(0)
        };
        let gs = mv.game.call(mv.game_player_idx)?;

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Call,
            wager,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            stats.action_times += 1;
            stats.call_times += 1;
            if stats.is_vpip_chance {
                stats.is_vpip = true;
            }
        }
        Ok(())
    }

    pub fn player_allin(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let wager = {
            let core = self.lock_core();
            core.table
                .as_ref()
                .and_then(|t| t.state.game_state.as_ref())
                .and_then(|gs| gs.get_player(mv.game_player_idx).map(|p| p.stack_size))
                .unwrap_or(0)
        };
        let gs = mv.game.allin(mv.game_player_idx)?;
        let is_raiser = gs.status.current_raiser == Some(mv.game_player_idx);

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Allin,
            wager,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            stats.action_times += 1;
            if is_raiser {
                stats.raise_times += 1;
                if stats.is_pfr_chance {
                    stats.is_pfr = true;
                }
                if stats.is_ats_chance {
                    stats.is_ats = true;
                }
            }
            if stats.is_vpip_chance {
                stats.is_vpip = true;
            }
            if stats.is_c_bet_chance {
                stats.is_c_bet = true;
            }
        }
        if is_raiser {
            statistics::refresh_three_bet(&mut table.state.player_states, mv.player_idx);
            if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
                if player.game_statistics.is_check_raise_chance {
                    player.game_statistics.is_check_raise = true;
                }
            }
        }
        Ok(())
    }

    pub fn player_check(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.check(mv.game_player_idx)?;

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Check,
            0,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            player.game_statistics.action_times += 1;
            player.game_statistics.check_times += 1;
        }
        Ok(())
    }

    pub fn player_fold(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.fold(mv.game_player_idx)?;
        let fold_round = gs.status.round;

        let mut core = self.lock_core();
        let Some(table) = core.table.as_mut() else {
            return Ok(());
        };
        let action = Self::create_player_game_action(
            table,
            player_id,
            mv.player_idx,
            GameAction::Fold,
            0,
            gs.get_player(mv.game_player_idx),
        );
        table.state.last_player_game_action = Some(action.clone());
        self.emit_game_player_action_event(&action);

        if let Some(player) = table.state.player_states.get_mut(mv.player_idx) {
            let stats = &mut player.game_statistics;
            stats.action_times += 1;
            stats.is_fold = true;
            stats.fold_round = Some(fold_round);
            if stats.is_ft3b_chance {
                stats.is_ft3b = true;
            }
            if stats.is_ftcb_chance {
                stats.is_ftcb = true;
            }
        }
        Ok(())
    }

    pub fn player_pass(&self, player_id: &str) -> Result<(), TableEngineError> {
        let mv = self.resolve_game_move(player_id)?;
        let gs = mv.game.pass(mv.game_player_idx)?;

        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            let action = Self::create_player_game_action(
                table,
                player_id,
                mv.player_idx,
                GameAction::Pass,
                0,
                gs.get_player(mv.game_player_idx),
            );
            table.state.last_player_game_action = Some(action.clone());
            self.emit_game_player_action_event(&action);
        }
        Ok(())
    }

    // ----- internals --------------------------------------------------------

    fn resolve_game_move(&self, player_id: &str) -> Result<GameMove, TableEngineError> {
        let core = self.lock_core();
        let table = core
            .table
            .as_ref()
            .ok_or(TableEngineError::InvalidGameAction)?;
        if table.state.status != TableStatus::Playing {
            return Err(TableEngineError::InvalidGameAction);
        }
        let game_player_idx = table
            .find_game_player_idx(player_id)
            .ok_or(TableEngineError::PlayerNotFound)?;
        let player_idx = table
            .player_idx_from_game_player_idx(game_player_idx)
            .ok_or(TableEngineError::PlayerNotFound)?;
        let game = core.game.clone().ok_or(TableEngineError::InvalidGameAction)?;
        Ok(GameMove {
            game,
            game_player_idx,
            player_idx,
        })
    }

    pub(crate) fn batch_add_players(
        &self,
        core: &mut EngineCore,
        players: &[JoinPlayer],
    ) -> Result<(), TableEngineError> {
        let mut new_player_idxs = Vec::with_capacity(players.len());
        {
            let EngineCore {
                table: table_slot,
                seat_manager: sm_slot,
                ..
            } = &mut *core;
            let table = table_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;
            let sm = sm_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;

            let mut requested_seats = HashMap::new();
            let mut random_ids = Vec::new();
            for player in players {
                match player.seat {
                    Some(seat) => {
                        requested_seats.insert(player.player_id.clone(), seat);
                    }
                    None => random_ids.push(player.player_id.clone()),
                }
            }
            if !requested_seats.is_empty() {
                sm.assign_seats(&requested_seats)?;
            }
            if !random_ids.is_empty() {
                sm.random_assign_seats(&random_ids)?;
            }

            for player in players {
                let seat = sm.seat_of(&player.player_id)?;
                let player_idx = table.state.player_states.len();
                table.state.player_states.push(TablePlayerState {
                    player_id: player.player_id.clone(),
                    seat: Some(seat),
                    positions: Vec::new(),
                    bankroll: player.redeem_chips,
                    is_in: false,
                    is_participated: false,
                    game_statistics: TablePlayerGameStatistics::default(),
                });
                table.state.seat_map[seat] = Some(player_idx);
                new_player_idxs.push(player_idx);
            }
        }

        self.players_auto_in(core);

        for player_idx in new_player_idxs {
            self.emit_player_state_event(core, player_idx);
            self.emit_player_reserved_event(core, player_idx);
        }
        Ok(())
    }

    /// Arm a barrier over everyone who reserved but has not joined yet; on
    /// timeout the stragglers are force-joined.
    fn players_auto_in(&self, core: &EngineCore) {
        self.rg.stop();
        self.rg
            .set_timeout_interval(DEFAULT_READY_GROUP_TIMEOUT_SECS);
        let weak = self.me.clone();
        self.rg.on_completed(move |_| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_players_auto_in_completed();
            }
        });
        self.rg.reset_participants();

        let Some(table) = core.table.as_ref() else {
            return;
        };
        let mut pending = false;
        for (player_idx, player) in table.state.player_states.iter().enumerate() {
            if !player.is_in {
                self.rg.add(player_idx as i64, false);
                pending = true;
            }
        }
        if pending {
            self.rg.start();
        }
    }

    fn handle_players_auto_in_completed(&self) {
        let pending_ids: Vec<String> = {
            let core = self.lock_core();
            let Some(table) = core.table.as_ref() else {
                return;
            };
            table
                .state
                .player_states
                .iter()
                .filter(|p| !p.is_in)
                .map(|p| p.player_id.clone())
                .collect()
        };
        for player_id in pending_ids {
            if let Err(err) = self.player_join(&player_id) {
                log::warn!("auto join of {player_id} failed: {err}");
            }
        }

        let should_start = {
            let core = self.lock_core();
            let Some(table) = core.table.as_ref() else {
                return;
            };
            let is_in_count = table.state.player_states.iter().filter(|p| p.is_in).count();
            let alive_count = table.alive_players().len();
            let game_running = table.state.status.is_game_running()
                || table.state.status == TableStatus::Standby;
            is_in_count >= 2
                && alive_count >= 2
                && !game_running
                && table.state.blind_state.level > 0
                && table.state.game_count == 0
                && table.meta.mode == CompetitionMode::Mtt
        };
        // The first hand of an MTT table starts itself; CT and Cash tables
        // wait for the collaborator.
        if should_start {
            if let Err(err) = self.start_table_game() {
                self.emit_error_event("StartTableGame", err);
            }
        }
    }

    pub(crate) fn batch_remove_players(
        &self,
        core: &mut EngineCore,
        player_ids: &[String],
    ) -> Result<(), TableEngineError> {
        let EngineCore {
            table: table_slot,
            seat_manager: sm_slot,
            ..
        } = &mut *core;
        let table = table_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;
        let sm = sm_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;

        let current_game_player_ids: Vec<String> = table
            .state
            .game_player_indexes
            .iter()
            .filter_map(|&idx| {
                table
                    .state
                    .player_states
                    .get(idx)
                    .map(|p| p.player_id.clone())
            })
            .collect();

        let kept: Vec<TablePlayerState> = table
            .state
            .player_states
            .iter()
            .filter(|p| !player_ids.contains(&p.player_id))
            .cloned()
            .collect();

        let mut new_seat_map = vec![None; table.meta.table_max_seat_count];
        for (new_idx, player) in kept.iter().enumerate() {
            if let Some(seat) = player.seat {
                new_seat_map[seat] = Some(new_idx);
            }
        }

        let id_to_new_idx: HashMap<&str, usize> = kept
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.player_id.as_str(), idx))
            .collect();
        let new_game_player_indexes = if table.state.status.is_game_running() {
            current_game_player_ids
                .iter()
                .filter_map(|id| id_to_new_idx.get(id.as_str()).copied())
                .collect()
        } else {
            table.state.game_player_indexes.clone()
        };

        table.state.player_states = kept;
        table.state.seat_map = new_seat_map;
        table.state.game_player_indexes = new_game_player_indexes;
        sm.remove_seats(player_ids)?;
        Ok(())
    }

    fn handle_open_game_ready(&self, state: OpenGameState) {
        // A lone survivor cannot open a hand; the collaborator decides what
        // happens to the table.
        if state.participants.len() <= 1 {
            log::debug!(
                "open game ready with {} participant(s), not opening",
                state.participants.len()
            );
            return;
        }

        let Some(engine) = self.me.upgrade() else {
            return;
        };
        // The open path may sleep through its retry loop; keep it off the
        // runtime workers.
        self.handle.spawn_blocking(move || {
            if let Err(err) = engine.table_game_open() {
                engine.emit_error_event("table_game_open", err);
            }
        });
    }

    // ----- emission ---------------------------------------------------------

    pub(crate) fn emit_event(&self, core: &mut EngineCore, name: &str, context: &str) {
        if let Some(table) = core.table.as_mut() {
            table.update_serial += 1;
            table.update_at = Utc::now().timestamp();
            if context.is_empty() {
                log::debug!("table {} updated: {}", table.id, name);
            } else {
                log::debug!("table {} updated: {} ({})", table.id, name, context);
            }
            (self.callbacks.on_table_updated)(table);
        }
    }

    pub(crate) fn emit_table_state_event(&self, core: &EngineCore, event: TableStateEvent) {
        if let Some(table) = core.table.as_ref() {
            (self.callbacks.on_table_state_updated)(event, table);
        }
    }

    pub(crate) fn emit_player_state_event(&self, core: &EngineCore, player_idx: usize) {
        if let Some(table) = core.table.as_ref() {
            if let Some(player) = table.state.player_states.get(player_idx) {
                (self.callbacks.on_table_player_state_updated)(
                    &table.meta.competition_id,
                    &table.id,
                    player,
                );
            }
        }
    }

    pub(crate) fn emit_player_reserved_event(&self, core: &EngineCore, player_idx: usize) {
        if let Some(table) = core.table.as_ref() {
            if let Some(player) = table.state.player_states.get(player_idx) {
                (self.callbacks.on_table_player_reserved)(
                    &table.meta.competition_id,
                    &table.id,
                    player,
                );
            }
        }
    }

    pub(crate) fn emit_game_player_action_event(&self, action: &TablePlayerGameAction) {
        (self.callbacks.on_game_player_action_updated)(action);
    }

    /// Emit an error asynchronously. Must not be called with the core lock
    /// held by the same thread.
    pub(crate) fn emit_error_event(&self, source: &str, err: TableEngineError) {
        let Some(table) = self.table() else {
            return;
        };
        log::warn!("table {} error from {}: {}", table.id, source, err);
        let callback = Arc::clone(&self.callbacks.on_table_error_updated);
        self.handle.spawn(async move {
            callback(&table, &err);
        });
    }

    pub(crate) fn create_player_game_action(
        table: &Table,
        player_id: &str,
        player_idx: usize,
        action: GameAction,
        chips: i64,
        game_player: Option<&GamePlayer>,
    ) -> TablePlayerGameAction {
        let mut record = TablePlayerGameAction {
            competition_id: table.meta.competition_id.clone(),
            table_id: table.id.clone(),
            game_id: table
                .state
                .game_state
                .as_ref()
                .map(|gs| gs.game_id.clone())
                .unwrap_or_default(),
            game_count: table.state.game_count,
            update_at: Utc::now().timestamp(),
            player_id: player_id.to_string(),
            action,
            round: table.state.game_state.as_ref().map(|gs| gs.status.round),
            chips,
            seat: None,
            positions: Vec::new(),
            bankroll: 0,
            initial_stack_size: 0,
            stack_size: 0,
            pot: 0,
            wager: 0,
        };

        if let Some(player) = table.state.player_states.get(player_idx) {
            record.seat = player.seat;
            record.positions = player.positions.clone();
        }
        if let Some(game_player) = game_player {
            record.bankroll = game_player.bankroll;
            record.initial_stack_size = game_player.initial_stack_size;
            record.stack_size = game_player.stack_size;
            record.pot = game_player.pot;
            record.wager = game_player.wager;
        }
        record
    }
}

struct GameMove {
    game: Arc<Game>,
    game_player_idx: usize,
    player_idx: usize,
}
