//! Shared test support: a deterministic betting backend, channel-forwarding
//! callbacks and table fixtures.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use pokertable::game::{
    GameAction, GameBackend, GameError, GameEvent, GameMeta, GameOptions, GamePlayer,
    GamePlayerResult, GameResult, GameState, GameStatus, Position, Round,
};
use pokertable::seats::{Seat, SeatError, SeatManager, SeatRing};
use pokertable::table::{
    CompetitionMode, CompetitionRule, Table, TableBlindState, TableEngineCallbacks,
    TableEngineError, TableMeta, TablePlayerGameAction, TablePlayerState, TableSettings,
    TableStateEvent,
};
use pokertable::JoinPlayer;

/// Deterministic hand backend: no cards, exact chip accounting, hand powers
/// assigned per game-player index so settlement is reproducible.
pub struct SimBackend {
    powers: Vec<i64>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self { powers: Vec::new() }
    }

    /// Override hand powers by game-player index (higher wins).
    pub fn with_powers(powers: Vec<i64>) -> Self {
        Self { powers }
    }

    fn power_for(&self, idx: usize) -> i64 {
        self.powers
            .get(idx)
            .copied()
            .unwrap_or(((idx + 1) as i64) * 100)
    }

    fn allowed_for(gs: &GameState, idx: usize) -> Vec<GameAction> {
        let player = &gs.players[idx];
        let to_call = gs.status.current_wager - player.wager;
        let mut actions = Vec::new();
        if to_call > 0 {
            actions.push(GameAction::Call);
            if player.stack_size > to_call {
                actions.push(GameAction::Raise);
            }
        } else {
            actions.push(GameAction::Check);
            if gs.status.current_wager == 0 && player.stack_size > 0 {
                actions.push(GameAction::Bet);
            } else if gs.status.current_wager > 0 && player.stack_size > 0 {
                actions.push(GameAction::Raise);
            }
        }
        if player.stack_size > 0 {
            actions.push(GameAction::Allin);
        }
        actions.push(GameAction::Fold);
        actions
    }

    fn set_actor(gs: &mut GameState, actor: usize) {
        for player in gs.players.iter_mut() {
            player.allowed_actions.clear();
        }
        gs.players[actor].allowed_actions = Self::allowed_for(gs, actor);
        gs.status.current_player = Some(actor);
        gs.status.current_event = GameEvent::RoundStarted;
    }

    fn close_round(gs: &mut GameState) {
        for player in gs.players.iter_mut() {
            player.allowed_actions.clear();
        }
        gs.status.current_player = None;
        gs.status.current_event = GameEvent::RoundClosed;
    }

    /// Re-open action for everyone else still able to respond to a raise.
    fn reopen_action(gs: &mut GameState, raiser: usize) {
        for player in gs.players.iter_mut() {
            if player.idx != raiser && !player.fold && player.stack_size > 0 {
                player.acted = false;
            }
        }
    }

    fn advance_after_action(gs: &mut GameState, actor: usize) {
        let alive = gs.players.iter().filter(|p| !p.fold).count();
        if alive <= 1 {
            Self::close_round(gs);
            return;
        }

        let n = gs.players.len();
        let next = (1..=n)
            .map(|offset| (actor + offset) % n)
            .find(|&idx| {
                let p = &gs.players[idx];
                !p.fold && p.stack_size > 0 && !p.acted
            });
        match next {
            Some(idx) => Self::set_actor(gs, idx),
            None => Self::close_round(gs),
        }
    }

    fn step<F>(&self, gs: &GameState, apply: F) -> Result<GameState, GameError>
    where
        F: FnOnce(&mut GameState, usize) -> Result<(), GameError>,
    {
        if gs.status.current_event != GameEvent::RoundStarted {
            return Err(GameError::InvalidAction);
        }
        let actor = gs.status.current_player.ok_or(GameError::InvalidAction)?;

        let mut next = gs.clone();
        apply(&mut next, actor)?;
        next.players[actor].acted = true;
        Self::advance_after_action(&mut next, actor);
        Ok(next)
    }

    fn close_game(&self, mut gs: GameState) -> GameState {
        let alive: Vec<usize> = gs
            .players
            .iter()
            .filter(|p| !p.fold)
            .map(|p| p.idx)
            .collect();
        for &idx in &alive {
            gs.players[idx].combination_power = self.power_for(idx);
        }

        let pot_total: i64 = gs.players.iter().map(|p| p.pot).sum();
        let winners: Vec<usize> = if alive.len() == 1 {
            alive.clone()
        } else {
            let best = alive
                .iter()
                .map(|&idx| gs.players[idx].combination_power)
                .max()
                .unwrap_or(0);
            alive
                .iter()
                .copied()
                .filter(|&idx| gs.players[idx].combination_power == best)
                .collect()
        };

        let share = pot_total / winners.len() as i64;
        let mut remainder = pot_total % winners.len() as i64;
        let mut rows = Vec::with_capacity(gs.players.len());
        for (idx, player) in gs.players.iter_mut().enumerate() {
            let mut final_chips = player.bankroll - player.pot;
            if winners.contains(&idx) {
                final_chips += share;
                if remainder > 0 {
                    final_chips += 1;
                    remainder -= 1;
                }
            }
            player.stack_size = final_chips;
            rows.push(GamePlayerResult {
                idx,
                final_chips,
                changed: final_chips - player.bankroll,
            });
        }

        gs.result = Some(GameResult { players: rows });
        gs.status.current_event = GameEvent::GameClosed;
        gs.status.current_player = None;
        gs
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GameBackend for SimBackend {
    fn create_game(&self, options: &GameOptions) -> Result<GameState, GameError> {
        if options.players.len() < 2 {
            return Err(GameError::Backend("need at least two players".to_string()));
        }
        let players = options
            .players
            .iter()
            .enumerate()
            .map(|(idx, setting)| GamePlayer {
                idx,
                positions: setting.positions.clone(),
                bankroll: setting.bankroll,
                initial_stack_size: setting.bankroll,
                stack_size: setting.bankroll,
                pot: 0,
                wager: 0,
                fold: false,
                acted: false,
                did_action: None,
                allowed_actions: Vec::new(),
                combination_power: 0,
            })
            .collect();

        Ok(GameState {
            game_id: Uuid::new_v4().to_string(),
            meta: GameMeta {
                ante: options.ante,
                blind: options.blind,
                deck: options.deck,
                hole_cards_count: options.hole_cards_count,
                required_hole_cards_count: options.required_hole_cards_count,
            },
            status: GameStatus {
                current_event: GameEvent::ReadyRequested,
                round: Round::Preflop,
                current_player: None,
                current_raiser: None,
                current_wager: 0,
                mini_bet: options.blind.bb.max(options.blind.dealer),
            },
            players,
            result: None,
        })
    }

    fn ready_for_all(&self, state: &GameState) -> Result<GameState, GameError> {
        if state.status.current_event != GameEvent::ReadyRequested {
            return Err(GameError::InvalidAction);
        }
        let mut gs = state.clone();
        for player in gs.players.iter_mut() {
            player.allowed_actions.clear();
        }
        gs.status.current_event = if gs.meta.ante > 0 {
            GameEvent::AnteRequested
        } else {
            GameEvent::BlindsRequested
        };
        Ok(gs)
    }

    fn pay_ante(&self, state: &GameState) -> Result<GameState, GameError> {
        if state.status.current_event != GameEvent::AnteRequested {
            return Err(GameError::InvalidAction);
        }
        let mut gs = state.clone();
        let ante = gs.meta.ante;
        for player in gs.players.iter_mut() {
            let take = ante.min(player.stack_size);
            player.pot += take;
            player.stack_size -= take;
            player.allowed_actions.clear();
        }
        gs.status.current_event = GameEvent::BlindsRequested;
        Ok(gs)
    }

    fn pay_blinds(&self, state: &GameState) -> Result<GameState, GameError> {
        if state.status.current_event != GameEvent::BlindsRequested {
            return Err(GameError::InvalidAction);
        }
        let mut gs = state.clone();
        let blind = gs.meta.blind;
        let mut bb_idx = None;
        for player in gs.players.iter_mut() {
            player.allowed_actions.clear();
            let owed = if player.positions.contains(&Position::Bb) {
                bb_idx = Some(player.idx);
                blind.bb
            } else if player.positions.contains(&Position::Sb) {
                blind.sb
            } else if player.positions.contains(&Position::Dealer) {
                blind.dealer
            } else {
                0
            };
            let take = owed.min(player.stack_size);
            player.wager += take;
            player.stack_size -= take;
        }

        gs.status.current_wager = gs.players.iter().map(|p| p.wager).max().unwrap_or(0);
        gs.status.current_raiser = gs
            .players
            .iter()
            .max_by_key(|p| p.wager)
            .filter(|p| p.wager > 0)
            .map(|p| p.idx);
        gs.status.round = Round::Preflop;

        let n = gs.players.len();
        let anchor = bb_idx.or(gs.status.current_raiser).unwrap_or(0);
        let actor = (1..=n)
            .map(|offset| (anchor + offset) % n)
            .find(|&idx| {
                let p = &gs.players[idx];
                !p.fold && p.stack_size > 0 && !p.acted
            });
        match actor {
            Some(idx) => Self::set_actor(&mut gs, idx),
            None => Self::close_round(&mut gs),
        }
        Ok(gs)
    }

    fn next(&self, state: &GameState) -> Result<GameState, GameError> {
        if state.status.current_event != GameEvent::RoundClosed {
            return Err(GameError::InvalidAction);
        }
        let mut gs = state.clone();
        for player in gs.players.iter_mut() {
            player.pot += player.wager;
            player.wager = 0;
            player.acted = false;
            player.did_action = None;
            player.allowed_actions.clear();
        }
        gs.status.current_wager = 0;

        let alive: Vec<usize> = gs
            .players
            .iter()
            .filter(|p| !p.fold)
            .map(|p| p.idx)
            .collect();
        if alive.len() <= 1 || gs.status.round == Round::River {
            return Ok(self.close_game(gs));
        }

        gs.status.round = match gs.status.round {
            Round::Ante | Round::Preflop => Round::Flop,
            Round::Flop => Round::Turn,
            Round::Turn | Round::River => Round::River,
        };

        let can_bet = gs
            .players
            .iter()
            .filter(|p| !p.fold && p.stack_size > 0)
            .count()
            >= 2;
        if !can_bet {
            Self::close_round(&mut gs);
            return Ok(gs);
        }

        let n = gs.players.len();
        let actor = (1..=n)
            .map(|offset| offset % n)
            .find(|&idx| {
                let p = &gs.players[idx];
                !p.fold && p.stack_size > 0
            });
        match actor {
            Some(idx) => Self::set_actor(&mut gs, idx),
            None => Self::close_round(&mut gs),
        }
        Ok(gs)
    }

    fn pay(&self, _state: &GameState, _chips: i64) -> Result<GameState, GameError> {
        Err(GameError::InvalidAction)
    }

    fn fold(&self, state: &GameState) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            let player = &mut gs.players[actor];
            player.fold = true;
            player.did_action = Some(GameAction::Fold);
            Ok(())
        })
    }

    fn check(&self, state: &GameState) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            let current_wager = gs.status.current_wager;
            let player = &mut gs.players[actor];
            if current_wager - player.wager > 0 {
                return Err(GameError::InvalidAction);
            }
            player.did_action = Some(GameAction::Check);
            Ok(())
        })
    }

    fn call(&self, state: &GameState) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            let current_wager = gs.status.current_wager;
            let player = &mut gs.players[actor];
            let to_call = current_wager - player.wager;
            if to_call <= 0 {
                return Err(GameError::InvalidAction);
            }
            let pay = to_call.min(player.stack_size);
            player.wager += pay;
            player.stack_size -= pay;
            player.did_action = Some(GameAction::Call);
            Ok(())
        })
    }

    fn allin(&self, state: &GameState) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            let stake = gs.players[actor].stack_size;
            if stake <= 0 {
                return Err(GameError::InvalidAction);
            }
            gs.players[actor].wager += stake;
            gs.players[actor].stack_size = 0;
            gs.players[actor].did_action = Some(GameAction::Allin);
            if gs.players[actor].wager > gs.status.current_wager {
                gs.status.current_wager = gs.players[actor].wager;
                gs.status.current_raiser = Some(actor);
                Self::reopen_action(gs, actor);
            }
            Ok(())
        })
    }

    fn bet(&self, state: &GameState, chips: i64) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            if gs.status.current_wager != 0 || chips <= 0 || chips > gs.players[actor].stack_size
            {
                return Err(GameError::InvalidAction);
            }
            gs.players[actor].wager = chips;
            gs.players[actor].stack_size -= chips;
            gs.players[actor].did_action = Some(GameAction::Bet);
            gs.status.current_wager = chips;
            gs.status.current_raiser = Some(actor);
            Self::reopen_action(gs, actor);
            Ok(())
        })
    }

    fn raise(&self, state: &GameState, chip_level: i64) -> Result<GameState, GameError> {
        self.step(state, |gs, actor| {
            if chip_level <= gs.status.current_wager {
                return Err(GameError::InvalidAction);
            }
            let delta = chip_level - gs.players[actor].wager;
            if delta <= 0 || delta > gs.players[actor].stack_size {
                return Err(GameError::InvalidAction);
            }
            gs.players[actor].wager = chip_level;
            gs.players[actor].stack_size -= delta;
            gs.players[actor].did_action = Some(GameAction::Raise);
            gs.status.current_wager = chip_level;
            gs.status.current_raiser = Some(actor);
            Self::reopen_action(gs, actor);
            Ok(())
        })
    }

    fn pass(&self, _state: &GameState) -> Result<GameState, GameError> {
        Err(GameError::InvalidAction)
    }
}

/// Seat ring wrapper that fails the first N position initializations.
pub struct FlakySeatRing {
    inner: SeatRing,
    failures_left: usize,
    pub init_calls: Arc<AtomicUsize>,
}

impl FlakySeatRing {
    pub fn new(inner: SeatRing, failures: usize, init_calls: Arc<AtomicUsize>) -> Self {
        Self {
            inner,
            failures_left: failures,
            init_calls,
        }
    }
}

impl SeatManager for FlakySeatRing {
    fn assign_seats(&mut self, requests: &HashMap<String, usize>) -> Result<(), SeatError> {
        self.inner.assign_seats(requests)
    }

    fn random_assign_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        self.inner.random_assign_seats(player_ids)
    }

    fn join_players(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        self.inner.join_players(player_ids)
    }

    fn update_player_has_chips(
        &mut self,
        player_id: &str,
        has_chips: bool,
    ) -> Result<(), SeatError> {
        self.inner.update_player_has_chips(player_id, has_chips)
    }

    fn is_player_active(&self, player_id: &str) -> Result<bool, SeatError> {
        self.inner.is_player_active(player_id)
    }

    fn remove_seats(&mut self, player_ids: &[String]) -> Result<(), SeatError> {
        self.inner.remove_seats(player_ids)
    }

    fn is_init_positions(&self) -> bool {
        self.inner.is_init_positions()
    }

    fn init_positions(&mut self, random_dealer: bool) -> Result<(), SeatError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SeatError::NotEnoughActivePlayers);
        }
        self.inner.init_positions(random_dealer)
    }

    fn rotate_positions(&mut self) -> Result<(), SeatError> {
        self.inner.rotate_positions()
    }

    fn current_dealer_seat(&self) -> Option<usize> {
        self.inner.current_dealer_seat()
    }

    fn current_sb_seat(&self) -> Option<usize> {
        self.inner.current_sb_seat()
    }

    fn current_bb_seat(&self) -> Option<usize> {
        self.inner.current_bb_seat()
    }

    fn seat_of(&self, player_id: &str) -> Result<usize, SeatError> {
        self.inner.seat_of(player_id)
    }

    fn seats(&self) -> &[Seat] {
        self.inner.seats()
    }
}

/// Everything the callbacks can report, forwarded into one channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Updated(Table),
    StateEvent(TableStateEvent, Table),
    ReadyOpen {
        game_count: u64,
        players: Vec<TablePlayerState>,
    },
    PlayerAction(TablePlayerGameAction),
    AutoOpenEnd,
    Error(TableEngineError),
}

pub fn channel_callbacks() -> (TableEngineCallbacks, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let sender = tx.clone();
    let on_table_updated = Arc::new(move |table: &Table| {
        let _ = sender.send(EngineEvent::Updated(table.clone()));
    });
    let sender = tx.clone();
    let on_table_state_updated = Arc::new(move |event: TableStateEvent, table: &Table| {
        let _ = sender.send(EngineEvent::StateEvent(event, table.clone()));
    });
    let sender = tx.clone();
    let on_ready_open_first_table_game = Arc::new(
        move |_competition_id: &str, _table_id: &str, game_count: u64, players: &[TablePlayerState]| {
            let _ = sender.send(EngineEvent::ReadyOpen {
                game_count,
                players: players.to_vec(),
            });
        },
    );
    let sender = tx.clone();
    let on_game_player_action_updated = Arc::new(move |action: &TablePlayerGameAction| {
        let _ = sender.send(EngineEvent::PlayerAction(action.clone()));
    });
    let sender = tx.clone();
    let on_auto_game_open_end = Arc::new(move |_competition_id: &str, _table_id: &str| {
        let _ = sender.send(EngineEvent::AutoOpenEnd);
    });
    let sender = tx;
    let on_table_error_updated = Arc::new(move |_table: &Table, err: &TableEngineError| {
        let _ = sender.send(EngineEvent::Error(err.clone()));
    });

    let callbacks = TableEngineCallbacks {
        on_table_updated,
        on_table_error_updated,
        on_table_state_updated,
        on_game_player_action_updated,
        on_auto_game_open_end,
        on_ready_open_first_table_game,
        ..TableEngineCallbacks::default()
    };
    (callbacks, rx)
}

pub fn default_table_settings(join_players: Vec<JoinPlayer>) -> TableSettings {
    TableSettings {
        table_id: Uuid::new_v4().to_string(),
        meta: TableMeta {
            competition_id: "1005c477-84b4-4d1b-9fca-3a6ad84e0fe7".to_string(),
            rule: CompetitionRule::Default,
            mode: CompetitionMode::Ct,
            max_duration: 300,
            table_max_seat_count: 9,
            table_min_player_count: 2,
            min_chip_unit: 10,
            action_time: 10,
        },
        blind: TableBlindState {
            level: 1,
            ante: 0,
            dealer: 0,
            sb: 10,
            bb: 20,
        },
        join_players,
    }
}

pub fn join_player(player_id: &str, chips: i64) -> JoinPlayer {
    JoinPlayer {
        player_id: player_id.to_string(),
        redeem_chips: chips,
        seat: None,
    }
}

/// Mirror of the acting-player lookup used when driving scripted hands.
pub fn current_player_move(table: &Table) -> Option<(String, Vec<GameAction>)> {
    let gs = table.state.game_state.as_ref()?;
    let current = gs.status.current_player?;
    let player_idx = table.player_idx_from_game_player_idx(current)?;
    let player_id = table.state.player_states.get(player_idx)?.player_id.clone();
    Some((player_id, gs.players.get(current)?.allowed_actions.clone()))
}

pub fn find_player_id(table: &Table, position: Position) -> Option<String> {
    for &player_idx in &table.state.game_player_indexes {
        let player = table.state.player_states.get(player_idx)?;
        if player.positions.contains(&position) {
            return Some(player.player_id.clone());
        }
    }
    None
}

pub fn participants_of(players: &[TablePlayerState]) -> HashMap<String, usize> {
    players
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.player_id.clone(), idx))
        .collect()
}
