//! Hand lifecycle transitions: open, start, settle and continue.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    AUTO_OPEN_END_NOTIFY_DELAY_SECS, OPEN_GAME_RETRY_LIMIT, OPEN_GAME_RETRY_PAUSE_SECS,
};
use crate::game::{
    BlindSetting, Game, GameAction, GameEvent, GameOptions, GamePlayerSetting, GameState,
    Position, Rank, Round,
};
use crate::seats::Seat;

use super::engine::{EngineCore, TableEngine};
use super::model::{
    CompetitionMode, CompetitionRule, Table, TablePlayerState, TableStateEvent, TableStatus,
};
use super::statistics::{self, TablePlayerGameStatistics};
use super::TableEngineError;

impl TableEngine {
    /// Open the next hand, retrying transient seat/rotation failures. Returns
    /// cleanly when the blind level is breaking or another path already
    /// opened the hand.
    pub(crate) fn table_game_open(&self) -> Result<(), TableEngineError> {
        {
            if self.is_released.load(std::sync::atomic::Ordering::SeqCst) {
                return Ok(());
            }
            let core = self.lock_core();
            let Some(table) = core.table.as_ref() else {
                return Ok(());
            };
            if table.state.status == TableStatus::Closed {
                return Ok(());
            }
            if table.state.game_state.is_some() {
                log::debug!(
                    "table {} game (count {}) is already opened",
                    table.id,
                    table.state.game_count
                );
                return Ok(());
            }
        }

        let mut attempts = 0;
        loop {
            match self.open_game() {
                Ok(()) => break,
                Err(TableEngineError::OpenGameFailedInBlindBreakingLevel) => {
                    log::info!("not opening game while blind level is breaking");
                    return Ok(());
                }
                Err(TableEngineError::OpenGameFailed) => {
                    attempts += 1;
                    log::warn!("failed to open game, attempt {attempts}");
                    if attempts > OPEN_GAME_RETRY_LIMIT {
                        return Err(TableEngineError::OpenGameFailed);
                    }
                    std::thread::sleep(Duration::from_secs(OPEN_GAME_RETRY_PAUSE_SECS));

                    let core = self.lock_core();
                    if let Some(table) = core.table.as_ref() {
                        if table.state.status.is_game_running() {
                            // Another path opened the hand while we slept.
                            return Ok(());
                        }
                    }
                }
                Err(other) => return Err(other),
            }
        }

        {
            let mut core = self.lock_core();
            self.emit_event(&mut core, "TableGameOpen", "");
        }
        self.start_game()
    }

    /// One open attempt: stage every mutation on a clone of the table and
    /// commit it only when the whole computation succeeded.
    fn open_game(&self) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();
        let EngineCore {
            table: table_slot,
            seat_manager: sm_slot,
            ..
        } = &mut *core;
        let table = table_slot.as_mut().ok_or(TableEngineError::OpenGameFailed)?;
        let sm = sm_slot.as_mut().ok_or(TableEngineError::OpenGameFailed)?;

        if !table.state.blind_state.is_set() {
            return Err(TableEngineError::OpenGameFailed);
        }
        if table.state.blind_state.is_breaking() {
            return Err(TableEngineError::OpenGameFailedInBlindBreakingLevel);
        }

        let mut staged = table.clone();
        staged.state.status = TableStatus::GameOpened;

        if !sm.is_init_positions() {
            sm.init_positions(true)
                .map_err(|_| TableEngineError::OpenGameFailed)?;
        } else {
            sm.rotate_positions()
                .map_err(|_| TableEngineError::OpenGameFailed)?;
        }

        for player in staged.state.player_states.iter_mut() {
            player.is_participated = sm.is_player_active(&player.player_id)?;
        }

        staged.state.game_player_indexes = calc_game_player_indexes(
            staged.meta.rule,
            sm.current_dealer_seat(),
            sm.current_sb_seat(),
            sm.current_bb_seat(),
            &staged.state.seat_map,
            &staged.state.player_states,
            sm.seats(),
        );
        let rule = staged.meta.rule;
        assign_player_positions(&mut staged, rule);

        staged.state.game_count += 1;
        staged.state.current_dealer_seat = sm.current_dealer_seat();
        staged.state.current_sb_seat = sm.current_sb_seat();
        staged.state.current_bb_seat = sm.current_bb_seat();

        log::info!(
            "table {} opened game {} with {} players",
            staged.id,
            staged.state.game_count,
            staged.state.game_player_indexes.len()
        );
        *table = staged;
        Ok(())
    }

    /// Build the hand options, wire the driver callbacks and start playing.
    pub(crate) fn start_game(&self) -> Result<(), TableEngineError> {
        let mut core = self.lock_core();

        let (options, blind) = {
            let table = core.table.as_ref().ok_or(TableEngineError::OpenGameFailed)?;
            let rule = table.meta.rule;
            let blind = table.state.blind_state;

            let mut options = match rule {
                CompetitionRule::ShortDeck => GameOptions::short_deck(),
                _ => GameOptions::standard(),
            };
            if rule == CompetitionRule::Omaha {
                options.hole_cards_count = 4;
                options.required_hole_cards_count = 2;
            }
            options.ante = blind.ante;
            options.blind = BlindSetting {
                dealer: blind.dealer,
                sb: blind.sb,
                bb: blind.bb,
            };

            let mut player_settings = Vec::with_capacity(table.state.game_player_indexes.len());
            for &player_idx in &table.state.game_player_indexes {
                let player = table
                    .state
                    .player_states
                    .get(player_idx)
                    .ok_or(TableEngineError::OpenGameFailed)?;
                player_settings.push(GamePlayerSetting {
                    bankroll: player.bankroll,
                    positions: player.positions.clone(),
                });
            }
            if player_settings.is_empty() {
                return Err(TableEngineError::OpenGameFailed);
            }
            // Heads-up guard: the first game player is always the button.
            if !player_settings[0].positions.contains(&Position::Dealer) {
                player_settings[0].positions.push(Position::Dealer);
            }
            options.players = player_settings;
            (options, blind)
        };

        let game = Game::new(Arc::clone(&self.backend), options, self.handle.clone());

        let weak = self.me.clone();
        game.on_game_state_updated(move |gs| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_game_state_updated(gs.clone());
            }
        });
        let weak = self.me.clone();
        game.on_game_error_updated(move |gs, err| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_game_error(gs, err.clone());
            }
        });
        let weak = self.me.clone();
        game.on_antes_received(move |gs| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_antes_received(gs);
            }
        });
        let weak = self.me.clone();
        game.on_blinds_received(move |gs| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_blinds_received(gs);
            }
        });
        let weak = self.me.clone();
        game.on_game_round_closed(move |_| {
            if let Some(engine) = weak.upgrade() {
                engine.clear_action_deadline();
            }
        });

        core.game = Some(Arc::clone(&game));
        game.start()?;

        if let Some(table) = core.table.as_mut() {
            table.state.status = TableStatus::Playing;
            table.state.game_blind_state = Some(blind);
        }
        Ok(())
    }

    /// New state from the hand driver.
    pub(crate) fn handle_game_state_updated(&self, gs: GameState) {
        let event = gs.status.current_event;
        let mut closed = false;
        let mut unknown = false;
        {
            let mut core = self.lock_core();
            {
                let Some(table) = core.table.as_mut() else {
                    return;
                };
                table.state.game_state = Some(gs.clone());
                if table.state.status == TableStatus::Playing {
                    statistics::refresh_current_player_chances(&mut table.state, &gs);
                }
                match event {
                    GameEvent::Unknown => unknown = true,
                    GameEvent::GameClosed => closed = true,
                    _ => {
                        let action_time = table.meta.action_time;
                        update_current_action_end_at(table, event, &gs, action_time);
                    }
                }
            }
            if !unknown && !closed {
                self.emit_event(&mut core, &event.to_string(), "");
                self.emit_table_state_event(&core, TableStateEvent::GameUpdated);
                if event == GameEvent::RoundClosed {
                    if let Some(table) = core.table.as_mut() {
                        table.state.last_player_game_action = None;
                    }
                }
            }
        }

        if unknown {
            self.emit_error_event(
                "handle_game_state",
                TableEngineError::Game(crate::game::GameError::UnknownEvent),
            );
        }
        if closed {
            if let Err(err) = self.on_game_closed() {
                self.emit_error_event("on_game_closed", err);
            }
        }
    }

    pub(crate) fn handle_game_error(&self, gs: &GameState, err: crate::game::GameError) {
        {
            let mut core = self.lock_core();
            if let Some(table) = core.table.as_mut() {
                table.state.game_state = Some(gs.clone());
            }
        }
        self.emit_error_event("game", TableEngineError::Game(err));
    }

    pub(crate) fn clear_action_deadline(&self) {
        let mut core = self.lock_core();
        if let Some(table) = core.table.as_mut() {
            table.state.current_action_end_at = 0;
        }
    }

    /// Emit a payment record per player once antes landed.
    pub(crate) fn handle_antes_received(&self, gs: &GameState) {
        let actions = {
            let core = self.lock_core();
            let Some(table) = core.table.as_ref() else {
                return;
            };
            let mut actions = Vec::new();
            for game_player in &gs.players {
                let Some(player_idx) = table.player_idx_from_game_player_idx(game_player.idx)
                else {
                    continue;
                };
                let Some(player) = table.state.player_states.get(player_idx) else {
                    continue;
                };
                let mut action = Self::create_player_game_action(
                    table,
                    &player.player_id,
                    player_idx,
                    GameAction::Pay,
                    player.bankroll,
                    Some(game_player),
                );
                action.round = Some(Round::Ante);
                actions.push(action);
            }
            actions
        };

        for action in &actions {
            self.emit_game_player_action_event(action);
        }
    }

    /// Emit a payment record for each blind position once blinds landed.
    pub(crate) fn handle_blinds_received(&self, gs: &GameState) {
        let actions = {
            let core = self.lock_core();
            let Some(table) = core.table.as_ref() else {
                return;
            };
            let mut actions = Vec::new();
            for game_player in &gs.players {
                let is_blind = game_player.positions.contains(&Position::Sb)
                    || game_player.positions.contains(&Position::Bb);
                if !is_blind {
                    continue;
                }
                let Some(player_idx) = table.player_idx_from_game_player_idx(game_player.idx)
                else {
                    continue;
                };
                let Some(player) = table.state.player_states.get(player_idx) else {
                    continue;
                };
                actions.push(Self::create_player_game_action(
                    table,
                    &player.player_id,
                    player_idx,
                    GameAction::Pay,
                    player.bankroll,
                    Some(game_player),
                ));
            }
            actions
        };

        for action in &actions {
            self.emit_game_player_action_event(action);
        }
    }

    fn on_game_closed(&self) -> Result<(), TableEngineError> {
        let alive_players = self.settle_game();
        self.continue_game(alive_players)
    }

    /// Apply the hand result to bankrolls and showdown statistics.
    pub(crate) fn settle_game(&self) -> Vec<TablePlayerState> {
        let mut core = self.lock_core();
        let alive_players = {
            let EngineCore {
                table: table_slot,
                seat_manager: sm_slot,
                ..
            } = &mut *core;
            let Some(table) = table_slot.as_mut() else {
                return Vec::new();
            };
            table.state.status = TableStatus::GameSettled;

            let Some(gs) = table.state.game_state.clone() else {
                log::error!("table {} settled without a game state", table.id);
                return Vec::new();
            };
            let Some(result) = gs.result.clone() else {
                log::error!("table {} settled without a game result", table.id);
                return Vec::new();
            };

            let not_fold_count = result
                .players
                .iter()
                .filter(|r| gs.get_player(r.idx).map(|p| !p.fold).unwrap_or(false))
                .count();

            let mut rank = Rank::new();
            for player in &gs.players {
                if !player.fold {
                    rank.add_contributor(player.combination_power, player.idx);
                }
            }
            rank.calculate();
            let mut winner_player_idxs = HashSet::new();
            for &winner in rank.get_winners() {
                match table.player_idx_from_game_player_idx(winner) {
                    Some(player_idx) => {
                        winner_player_idxs.insert(player_idx);
                    }
                    None => log::debug!("no table player for winning game player {winner}"),
                }
            }

            let mut alive_players = Vec::new();
            for row in &result.players {
                let Some(player_idx) = table.player_idx_from_game_player_idx(row.idx) else {
                    continue;
                };
                let Some(player) = table.state.player_states.get_mut(player_idx) else {
                    continue;
                };
                player.bankroll = row.final_chips;

                let not_folded = gs.get_player(row.idx).map(|p| !p.fold).unwrap_or(false);
                if not_folded && not_fold_count > 1 {
                    player.game_statistics.showdown_winning_chance = true;
                    if winner_player_idxs.contains(&player_idx) {
                        player.game_statistics.is_showdown_winning = true;
                    }
                } else {
                    player.game_statistics.showdown_winning_chance = false;
                }

                if player.bankroll > 0 {
                    alive_players.push(player.clone());
                }
            }

            let bb_seat = sm_slot.as_ref().and_then(|sm| sm.current_bb_seat());
            table.state.next_bb_order_player_ids = refresh_next_bb_order(
                bb_seat,
                table.meta.table_max_seat_count,
                &table.state.player_states,
                &table.state.seat_map,
            );

            alive_players
        };

        self.emit_event(&mut core, "SettleTableGameResult", "");
        self.emit_table_state_event(&core, TableStateEvent::GameSettled);
        alive_players
    }

    /// Reset per-hand state and schedule the next move: either the CT/Cash
    /// duration-expiry notification or the next automatic hand open.
    pub(crate) fn continue_game(
        &self,
        alive_players: Vec<TablePlayerState>,
    ) -> Result<(), TableEngineError> {
        let expired_ids = {
            let mut core = self.lock_core();
            let EngineCore {
                table: table_slot,
                seat_manager: sm_slot,
                ..
            } = &mut *core;
            let Some(table) = table_slot.as_mut() else {
                return Ok(());
            };
            let sm = sm_slot.as_mut().ok_or(TableEngineError::InvalidAction)?;

            table.state.status = TableStatus::Standby;
            table.state.game_player_indexes.clear();
            table.state.next_bb_order_player_ids.clear();
            table.state.current_action_end_at = 0;
            table.state.game_state = None;
            table.state.last_player_game_action = None;
            for player in table.state.player_states.iter_mut() {
                player.positions.clear();
                player.game_statistics = TablePlayerGameStatistics::default();
                sm.update_player_has_chips(&player.player_id, player.bankroll > 0)?;
                player.is_participated = sm.is_player_active(&player.player_id)?;
            }

            let auto_open_expired = matches!(
                table.meta.mode,
                CompetitionMode::Ct | CompetitionMode::Cash
            ) && table
                .state
                .start_at
                .map(|start_at| Utc::now().timestamp() > start_at + table.meta.max_duration)
                .unwrap_or(false);

            if auto_open_expired {
                Some((table.meta.competition_id.clone(), table.id.clone()))
            } else {
                None
            }
        };

        match expired_ids {
            Some((competition_id, table_id)) => {
                let callback = Arc::clone(&self.callbacks.on_auto_game_open_end);
                self.timebank.new_task(
                    Duration::from_secs(AUTO_OPEN_END_NOTIFY_DELAY_SECS),
                    move |cancelled| {
                        if cancelled {
                            return;
                        }
                        log::info!("table {table_id}: auto game open window ended");
                        callback(&competition_id, &table_id);
                    },
                );
            }
            None => {
                let participants: HashMap<String, usize> = alive_players
                    .iter()
                    .enumerate()
                    .map(|(idx, player)| (player.player_id.clone(), idx))
                    .collect();
                let weak = self.me.clone();
                self.timebank.new_task(
                    Duration::from_secs(self.options.game_continue_interval),
                    move |cancelled| {
                        if cancelled {
                            return;
                        }
                        if let Some(engine) = weak.upgrade() {
                            engine.continue_next_move(participants);
                        }
                    },
                );
            }
        }
        Ok(())
    }

    /// Runs when the continuation delay elapses: pause on a blind break,
    /// otherwise set up the next hand if the table still qualifies.
    fn continue_next_move(&self, participants: HashMap<String, usize>) {
        if self.is_released.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let next_game_count = {
            let mut core = self.lock_core();
            let decision = {
                let Some(table) = core.table.as_mut() else {
                    return;
                };
                if table.state.status == TableStatus::Closed {
                    return;
                }
                if table.should_pause() {
                    table.state.status = TableStatus::Pausing;
                    ContinueDecision::Pause
                } else if table.state.status == TableStatus::Standby
                    && table.alive_players().len() >= table.meta.table_min_player_count
                {
                    ContinueDecision::Open(table.state.game_count + 1)
                } else {
                    log::debug!(
                        "table {}: continuation has nothing to do in status {}",
                        table.id,
                        table.state.status
                    );
                    ContinueDecision::Nothing
                }
            };

            match decision {
                ContinueDecision::Pause => {
                    self.emit_event(&mut core, "ContinueGame -> Pause", "");
                    self.emit_table_state_event(&core, TableStateEvent::StatusUpdated);
                    None
                }
                ContinueDecision::Open(count) => Some(count),
                ContinueDecision::Nothing => None,
            }
        };

        if let Some(game_count) = next_game_count {
            self.set_up_table_game(game_count, participants);
        }
    }
}

enum ContinueDecision {
    Pause,
    Open(u64),
    Nothing,
}

/// Arm the action deadline when a betting state puts a not-yet-moved player
/// on the clock with wager actions only.
fn update_current_action_end_at(
    table: &mut Table,
    event: GameEvent,
    gs: &GameState,
    action_time: i64,
) {
    if event != GameEvent::RoundStarted || table.state.status != TableStatus::Playing {
        return;
    }
    if !gs.status.round.is_betting_round() {
        return;
    }
    let Some(current) = gs.status.current_player else {
        return;
    };
    let Some(player) = gs.get_player(current) else {
        return;
    };

    let unmoved = !player.allowed_actions.is_empty() && !player.acted;
    let wager_only = player.allowed_actions.iter().all(|a| a.is_wager());
    if unmoved && wager_only {
        table.state.current_action_end_at = Utc::now().timestamp() + action_time;
    }
}

/// Participating player indexes in action order.
///
/// Short-deck walks the player list ring from the dealer's player index.
/// Other rules walk seats clockwise from the dealer seat; if the button's
/// seat emptied mid-rotation, the first active seat counter-clockwise from
/// the SB (or BB when the SB seat is empty too) stands in for ordering.
pub(crate) fn calc_game_player_indexes(
    rule: CompetitionRule,
    dealer_seat: Option<usize>,
    sb_seat: Option<usize>,
    bb_seat: Option<usize>,
    seat_map: &[Option<usize>],
    players: &[TablePlayerState],
    seats: &[Seat],
) -> Vec<usize> {
    let mut order = Vec::new();

    if rule == CompetitionRule::ShortDeck {
        if players.is_empty() {
            return order;
        }
        let dealer_player_idx = dealer_seat
            .and_then(|seat| seat_map.get(seat).copied().flatten())
            .unwrap_or(0);
        for offset in 0..players.len() {
            let player_idx = (dealer_player_idx + offset) % players.len();
            if players[player_idx].is_participated {
                order.push(player_idx);
            }
        }
        return order;
    }

    let mut dealer_player = None;
    let mut sb_player = None;
    for (player_idx, player) in players.iter().enumerate() {
        if !player.is_participated {
            continue;
        }
        if dealer_seat.is_some() && player.seat == dealer_seat {
            dealer_player = Some(player_idx);
        }
        if sb_seat.is_some() && player.seat == sb_seat {
            sb_player = Some(player_idx);
        }
    }

    let start_seat = if dealer_player.is_some() {
        dealer_seat
    } else {
        let anchor = if sb_player.is_none() { bb_seat } else { sb_seat };
        anchor.and_then(|start| {
            let n = seats.len();
            (1..=n)
                .map(|offset| (start + n - offset) % n)
                .find(|&seat| seats[seat].is_active())
        })
    };
    let Some(start_seat) = start_seat else {
        return order;
    };

    let n = seat_map.len();
    for offset in 0..n {
        let seat = (start_seat + offset) % n;
        if let Some(player_idx) = seat_map.get(seat).copied().flatten() {
            if players
                .get(player_idx)
                .map(|p| p.is_participated)
                .unwrap_or(false)
            {
                order.push(player_idx);
            }
        }
    }
    order
}

/// Position labels by action order: dealer, blinds, an under-the-gun chain,
/// then hijack and cutoff closing the ring.
pub(crate) fn position_labels(rule: CompetitionRule, count: usize, order_idx: usize) -> Vec<Position> {
    if rule == CompetitionRule::ShortDeck {
        return if order_idx == 0 {
            vec![Position::Dealer]
        } else {
            Vec::new()
        };
    }
    if count == 2 {
        return if order_idx == 0 {
            vec![Position::Dealer, Position::Sb]
        } else {
            vec![Position::Bb]
        };
    }
    match order_idx {
        0 => vec![Position::Dealer],
        1 => vec![Position::Sb],
        2 => vec![Position::Bb],
        _ if order_idx == count - 1 && count >= 4 => vec![Position::Co],
        _ if order_idx == count - 2 && count >= 6 => vec![Position::Hj],
        _ => vec![match order_idx {
            3 => Position::Ug,
            4 => Position::Ug2,
            5 => Position::Ug3,
            6 => Position::Ug4,
            _ => Position::Ug5,
        }],
    }
}

fn assign_player_positions(staged: &mut Table, rule: CompetitionRule) {
    let order = staged.state.game_player_indexes.clone();
    let count = order.len();
    for (order_idx, &player_idx) in order.iter().enumerate() {
        if let Some(player) = staged.state.player_states.get_mut(player_idx) {
            player.positions = position_labels(rule, count, order_idx);
        }
    }
}

/// Seats in clockwise order starting one past the current BB, keeping only
/// occupants who still have chips.
pub(crate) fn refresh_next_bb_order(
    bb_seat: Option<usize>,
    max_seat_count: usize,
    players: &[TablePlayerState],
    seat_map: &[Option<usize>],
) -> Vec<String> {
    let mut order = Vec::new();
    if max_seat_count == 0 {
        return order;
    }
    let start = bb_seat.map(|seat| seat + 1).unwrap_or(0);
    for offset in 0..max_seat_count {
        let seat = (start + offset) % max_seat_count;
        if let Some(player_idx) = seat_map.get(seat).copied().flatten() {
            if let Some(player) = players.get(player_idx) {
                if player.bankroll > 0 {
                    order.push(player.player_id.clone());
                }
            }
        }
    }
    order
}
