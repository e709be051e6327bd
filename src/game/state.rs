//! Hand-state data model shared between the table engine and game backends.
//!
//! A backend is a pure step function over [`GameState`]: it receives the
//! current state and returns a new one. Everything the engine reads during a
//! hand (current event, acting player, allowed actions, wagers, results) lives
//! here, so the wire shape is owned by this crate rather than by any backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Events a backend can surface through `GameState::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    ReadyRequested,
    AnteRequested,
    BlindsRequested,
    RoundStarted,
    RoundClosed,
    GameClosed,
    /// Anything this engine version does not recognize.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameEvent::ReadyRequested => "ready_requested",
            GameEvent::AnteRequested => "ante_requested",
            GameEvent::BlindsRequested => "blinds_requested",
            GameEvent::RoundStarted => "round_started",
            GameEvent::RoundClosed => "round_closed",
            GameEvent::GameClosed => "game_closed",
            GameEvent::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Betting rounds of a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Round {
    Ante,
    Preflop,
    Flop,
    Turn,
    River,
}

impl Round {
    pub fn is_preflop(&self) -> bool {
        matches!(self, Round::Preflop)
    }

    pub fn is_postflop(&self) -> bool {
        matches!(self, Round::Flop | Round::Turn | Round::River)
    }

    /// Rounds in which players act on their own turn.
    pub fn is_betting_round(&self) -> bool {
        matches!(self, Round::Preflop | Round::Flop | Round::Turn | Round::River)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Round::Ante => "ante",
            Round::Preflop => "preflop",
            Round::Flop => "flop",
            Round::Turn => "turn",
            Round::River => "river",
        };
        write!(f, "{s}")
    }
}

/// Player actions, wagers and protocol acknowledgements alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameAction {
    Bet,
    Raise,
    Call,
    Check,
    Fold,
    Allin,
    Ready,
    Pay,
    Pass,
}

impl GameAction {
    /// Wager-type actions drive statistics and the action deadline; `ready`,
    /// `pay` and `pass` are protocol actions.
    pub fn is_wager(&self) -> bool {
        matches!(
            self,
            GameAction::Bet
                | GameAction::Raise
                | GameAction::Call
                | GameAction::Check
                | GameAction::Fold
                | GameAction::Allin
        )
    }
}

impl fmt::Display for GameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameAction::Bet => "bet",
            GameAction::Raise => "raise",
            GameAction::Call => "call",
            GameAction::Check => "check",
            GameAction::Fold => "fold",
            GameAction::Allin => "allin",
            GameAction::Ready => "ready",
            GameAction::Pay => "pay",
            GameAction::Pass => "pass",
        };
        write!(f, "{s}")
    }
}

/// Table positions. Only `dealer`, `sb`, `bb` and `co` carry engine semantics;
/// the rest label the remaining seats in action order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Dealer,
    Sb,
    Bb,
    Ug,
    Ug2,
    Ug3,
    Ug4,
    Ug5,
    Hj,
    Co,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Position::Dealer => "dealer",
            Position::Sb => "sb",
            Position::Bb => "bb",
            Position::Ug => "ug",
            Position::Ug2 => "ug2",
            Position::Ug3 => "ug3",
            Position::Ug4 => "ug4",
            Position::Ug5 => "ug5",
            Position::Hj => "hj",
            Position::Co => "co",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckKind {
    Standard,
    Short,
}

/// Blind amounts owed per position. A zero amount means the position owes
/// nothing this hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSetting {
    pub dealer: i64,
    pub sb: i64,
    pub bb: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMeta {
    pub ante: i64,
    pub blind: BlindSetting,
    pub deck: DeckKind,
    pub hole_cards_count: usize,
    pub required_hole_cards_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStatus {
    pub current_event: GameEvent,
    pub round: Round,
    pub current_player: Option<usize>,
    pub current_raiser: Option<usize>,
    pub current_wager: i64,
    pub mini_bet: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayer {
    pub idx: usize,
    pub positions: Vec<Position>,
    pub bankroll: i64,
    pub initial_stack_size: i64,
    pub stack_size: i64,
    pub pot: i64,
    pub wager: i64,
    pub fold: bool,
    pub acted: bool,
    pub did_action: Option<GameAction>,
    pub allowed_actions: Vec<GameAction>,
    /// Relative hand strength at showdown; higher wins.
    pub combination_power: i64,
}

impl GamePlayer {
    pub fn allow_action(&mut self, action: GameAction) {
        if !self.allowed_actions.contains(&action) {
            self.allowed_actions.push(action);
        }
    }

    pub fn revoke_action(&mut self, action: GameAction) {
        self.allowed_actions.retain(|a| *a != action);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayerResult {
    pub idx: usize,
    #[serde(rename = "final")]
    pub final_chips: i64,
    pub changed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub players: Vec<GamePlayerResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub game_id: String,
    pub meta: GameMeta,
    pub status: GameStatus,
    pub players: Vec<GamePlayer>,
    pub result: Option<GameResult>,
}

impl GameState {
    pub fn get_player(&self, idx: usize) -> Option<&GamePlayer> {
        self.players.get(idx)
    }

    pub fn get_player_mut(&mut self, idx: usize) -> Option<&mut GamePlayer> {
        self.players.get_mut(idx)
    }

    pub fn has_action(&self, idx: usize, action: GameAction) -> bool {
        self.get_player(idx)
            .map(|p| p.allowed_actions.contains(&action))
            .unwrap_or(false)
    }

    pub fn has_position(&self, idx: usize, position: Position) -> bool {
        self.get_player(idx)
            .map(|p| p.positions.contains(&position))
            .unwrap_or(false)
    }
}

/// Per-player input to game creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlayerSetting {
    pub bankroll: i64,
    pub positions: Vec<Position>,
}

/// Options handed to `GameBackend::create_game`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOptions {
    pub ante: i64,
    pub blind: BlindSetting,
    pub deck: DeckKind,
    pub hole_cards_count: usize,
    pub required_hole_cards_count: usize,
    pub players: Vec<GamePlayerSetting>,
}

impl GameOptions {
    /// Standard-deck hold'em options.
    pub fn standard() -> Self {
        Self {
            ante: 0,
            blind: BlindSetting::default(),
            deck: DeckKind::Standard,
            hole_cards_count: 2,
            required_hole_cards_count: 0,
            players: Vec::new(),
        }
    }

    /// Short-deck options: no SB/BB positions, dealer blind instead.
    pub fn short_deck() -> Self {
        Self {
            ante: 0,
            blind: BlindSetting::default(),
            deck: DeckKind::Short,
            hole_cards_count: 2,
            required_hole_cards_count: 0,
            players: Vec::new(),
        }
    }
}
