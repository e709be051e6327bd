//! Per-player rolling statistics.
//!
//! Chance flags are computed for the player about to act every time a new
//! acting state arrives; realized flags are set by the action intake when the
//! player takes the matching action. Everything resets per hand.

use serde::{Deserialize, Serialize};

use crate::game::{GameAction, GameEvent, GameState, Position, Round};

use super::model::{TablePlayerState, TableState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlayerGameStatistics {
    pub action_times: u32,
    pub raise_times: u32,
    pub call_times: u32,
    pub check_times: u32,
    pub is_fold: bool,
    pub fold_round: Option<Round>,

    // preflop: voluntarily put money in pot
    pub is_vpip_chance: bool,
    pub is_vpip: bool,

    // preflop: raise
    pub is_pfr_chance: bool,
    pub is_pfr: bool,

    // preflop: attempt to steal
    pub is_ats_chance: bool,
    pub is_ats: bool,

    // preflop: 3-bet
    pub is_3b_chance: bool,
    pub is_3b: bool,

    // preflop: fold to 3-bet
    pub is_ft3b_chance: bool,
    pub is_ft3b: bool,

    // postflop: check-raise
    pub is_check_raise_chance: bool,
    pub is_check_raise: bool,

    // postflop: continuation bet
    pub is_c_bet_chance: bool,
    pub is_c_bet: bool,

    // postflop: fold to continuation bet
    pub is_ftcb_chance: bool,
    pub is_ftcb: bool,

    // settlement
    pub showdown_winning_chance: bool,
    pub is_showdown_winning: bool,
}

/// Refresh chance flags for the player about to act on `gs`.
pub(crate) fn refresh_current_player_chances(state: &mut TableState, gs: &GameState) {
    let Some(current_gp_idx) = gs.status.current_player else {
        return;
    };
    let Some(&player_idx) = state.game_player_indexes.get(current_gp_idx) else {
        log::debug!("no table player for game player index {current_gp_idx}");
        return;
    };
    if player_idx >= state.player_states.len() {
        return;
    }

    let vpip = is_vpip_chance(gs, current_gp_idx, &state.player_states, player_idx);
    let pfr = is_pfr_chance(gs, current_gp_idx);
    let ats = is_ats_chance(gs, current_gp_idx);
    let three_bet = is_3b_chance(gs, current_gp_idx);
    let ft3b = is_ft3b_chance(gs, current_gp_idx, &state.player_states, player_idx);
    let check_raise = is_check_raise_chance(gs, current_gp_idx);
    let c_bet = is_c_bet_chance(gs, current_gp_idx);
    let ftcb = is_ftcb_chance(gs, current_gp_idx, &state.player_states, player_idx);

    let stats = &mut state.player_states[player_idx].game_statistics;
    stats.is_vpip_chance |= vpip;
    stats.is_pfr_chance |= pfr;
    stats.is_ats_chance |= ats;
    stats.is_3b_chance |= three_bet;
    stats.is_ft3b_chance |= ft3b;
    stats.is_check_raise_chance |= check_raise;
    stats.is_c_bet_chance |= c_bet;
    stats.is_ftcb_chance |= ftcb;
}

/// A raise re-assigns the 3-bettor label: any existing label is cleared, and
/// if the raiser had a 3-bet chance the label lands on them alone.
pub(crate) fn refresh_three_bet(players: &mut [TablePlayerState], player_idx: usize) {
    if players.iter().any(|p| p.game_statistics.is_3b) {
        for player in players.iter_mut() {
            player.game_statistics.is_3b = false;
        }
    }

    if players
        .get(player_idx)
        .map(|p| p.game_statistics.is_3b_chance)
        .unwrap_or(false)
    {
        for (idx, player) in players.iter_mut().enumerate() {
            player.game_statistics.is_3b = idx == player_idx;
        }
    }
}

/// The state describes `gp_idx` about to take a wager action.
fn valid_acting_state(gs: &GameState, gp_idx: usize) -> bool {
    if gs.status.current_event != GameEvent::RoundStarted
        || !gs.status.round.is_betting_round()
    {
        return false;
    }
    let Some(player) = gs.get_player(gp_idx) else {
        return false;
    };
    !player.acted
        && !player.allowed_actions.is_empty()
        && player.allowed_actions.iter().all(|a| a.is_wager())
}

fn is_vpip_chance(
    gs: &GameState,
    gp_idx: usize,
    players: &[TablePlayerState],
    player_idx: usize,
) -> bool {
    valid_acting_state(gs, gp_idx)
        && gs.status.round.is_preflop()
        && !players[player_idx].game_statistics.is_vpip
}

/// Preflop and every other player has limped in or folded.
fn is_pfr_chance(gs: &GameState, gp_idx: usize) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_preflop() {
        return false;
    }

    let mut allin_call = 0;
    let mut call = 0;
    let mut fold = 0;
    for player in &gs.players {
        if player.idx == gp_idx {
            continue;
        }
        match player.did_action {
            Some(GameAction::Allin) if gs.status.current_raiser != Some(player.idx) => {
                allin_call += 1
            }
            Some(GameAction::Call) => call += 1,
            Some(GameAction::Fold) => fold += 1,
            _ => {}
        }
    }
    allin_call + call + fold == gs.players.len() - 1
}

/// Preflop steal chance: actor holds SB/CO/Dealer and every player who already
/// acted has folded.
fn is_ats_chance(gs: &GameState, gp_idx: usize) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_preflop() {
        return false;
    }

    let mut acted = 0;
    let mut folded = 0;
    for player in &gs.players {
        if player.idx != gp_idx && player.acted {
            acted += 1;
            if player.fold {
                folded += 1;
            }
        }
    }

    let steal_position = gs.has_position(gp_idx, Position::Sb)
        || gs.has_position(gp_idx, Position::Co)
        || gs.has_position(gp_idx, Position::Dealer);
    folded == acted && steal_position
}

/// Preflop and exactly one other player has raised (or gone all-in as the
/// raiser).
fn is_3b_chance(gs: &GameState, gp_idx: usize) -> bool {
    if !gs.status.round.is_preflop() {
        return false;
    }

    let mut allin_raiser = 0;
    let mut raiser = 0;
    for player in &gs.players {
        if player.idx == gp_idx {
            continue;
        }
        match player.did_action {
            Some(GameAction::Allin) if gs.status.current_raiser == Some(player.idx) => {
                allin_raiser += 1
            }
            Some(GameAction::Raise) => raiser += 1,
            _ => {}
        }
    }
    (allin_raiser == 1 && raiser == 0) || (allin_raiser == 0 && raiser == 1)
}

fn is_ft3b_chance(
    gs: &GameState,
    gp_idx: usize,
    players: &[TablePlayerState],
    player_idx: usize,
) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_preflop() {
        return false;
    }
    players
        .iter()
        .enumerate()
        .any(|(idx, p)| idx != player_idx && p.game_statistics.is_3b)
}

fn is_check_raise_chance(gs: &GameState, gp_idx: usize) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_postflop() {
        return false;
    }
    let Some(player) = gs.get_player(gp_idx) else {
        return false;
    };
    if player.did_action != Some(GameAction::Check) {
        return false;
    }

    let can_raise = player.allowed_actions.contains(&GameAction::Raise);
    let can_allin_raise = player.allowed_actions.contains(&GameAction::Allin)
        && player.stack_size > gs.status.mini_bet;
    can_raise || can_allin_raise
}

/// Postflop and the actor carried the betting lead into this street.
fn is_c_bet_chance(gs: &GameState, gp_idx: usize) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_postflop() {
        return false;
    }
    let Some(player) = gs.get_player(gp_idx) else {
        return false;
    };
    if gs.status.current_raiser != Some(gp_idx) {
        return false;
    }

    let can_bet = player.allowed_actions.contains(&GameAction::Bet);
    let can_raise = player.allowed_actions.contains(&GameAction::Raise);
    let can_allin_raise = player.allowed_actions.contains(&GameAction::Allin)
        && player.stack_size > gs.status.mini_bet;
    can_bet || can_raise || can_allin_raise
}

fn is_ftcb_chance(
    gs: &GameState,
    gp_idx: usize,
    players: &[TablePlayerState],
    player_idx: usize,
) -> bool {
    if !valid_acting_state(gs, gp_idx) || !gs.status.round.is_postflop() {
        return false;
    }
    players
        .iter()
        .enumerate()
        .any(|(idx, p)| idx != player_idx && p.game_statistics.is_c_bet)
}
