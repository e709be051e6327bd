//! Table data model: identity, immutable meta and mutable hand-by-hand state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::game::{GameAction, GameState, Position, Round};

use super::statistics::TablePlayerGameStatistics;

/// Lifecycle label of a table. Serialized names are part of the public
/// contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Created,
    Balancing,
    Pausing,
    Standby,
    GameOpened,
    Playing,
    GameSettled,
    Closed,
}

impl TableStatus {
    /// A hand is in flight (opened, being played or being settled).
    pub fn is_game_running(&self) -> bool {
        matches!(
            self,
            TableStatus::GameOpened | TableStatus::Playing | TableStatus::GameSettled
        )
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Created => "created",
            TableStatus::Balancing => "balancing",
            TableStatus::Pausing => "pausing",
            TableStatus::Standby => "standby",
            TableStatus::GameOpened => "game_opened",
            TableStatus::Playing => "playing",
            TableStatus::GameSettled => "game_settled",
            TableStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionMode {
    Ct,
    Mtt,
    Cash,
}

impl fmt::Display for CompetitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompetitionMode::Ct => "ct",
            CompetitionMode::Mtt => "mtt",
            CompetitionMode::Cash => "cash",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionRule {
    Default,
    ShortDeck,
    Omaha,
}

impl fmt::Display for CompetitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompetitionRule::Default => "default",
            CompetitionRule::ShortDeck => "short_deck",
            CompetitionRule::Omaha => "omaha",
        };
        write!(f, "{s}")
    }
}

/// Coarse lifecycle events fanned out to the state-updated callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStateEvent {
    Created,
    StatusUpdated,
    GameUpdated,
    GameSettled,
    PlayersLeave,
}

impl fmt::Display for TableStateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStateEvent::Created => "created",
            TableStateEvent::StatusUpdated => "status_updated",
            TableStateEvent::GameUpdated => "game_updated",
            TableStateEvent::GameSettled => "game_settled",
            TableStateEvent::PlayersLeave => "players_leave",
        };
        write!(f, "{s}")
    }
}

/// Immutable table configuration fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub competition_id: String,
    pub rule: CompetitionRule,
    pub mode: CompetitionMode,
    /// Seconds after the first hand during which CT/Cash tables keep
    /// auto-opening hands.
    pub max_duration: i64,
    pub table_max_seat_count: usize,
    pub table_min_player_count: usize,
    pub min_chip_unit: i64,
    /// Seconds a player has to act once it is their turn.
    pub action_time: i64,
}

/// Blind level currently applied to the table. Level -1 marks a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBlindState {
    pub level: i64,
    pub ante: i64,
    pub dealer: i64,
    pub sb: i64,
    pub bb: i64,
}

impl TableBlindState {
    pub fn is_set(&self) -> bool {
        self.level != 0 && self.sb > 0 && self.bb > 0
    }

    pub fn is_breaking(&self) -> bool {
        self.level == -1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePlayerState {
    pub player_id: String,
    pub seat: Option<usize>,
    pub positions: Vec<Position>,
    pub bankroll: i64,
    /// Player has physically joined the table.
    pub is_in: bool,
    /// Player is eligible for the current hand.
    pub is_participated: bool,
    pub game_statistics: TablePlayerGameStatistics,
}

/// One player action record, built after every accepted game action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePlayerGameAction {
    pub competition_id: String,
    pub table_id: String,
    pub game_id: String,
    pub game_count: u64,
    pub update_at: i64,
    pub player_id: String,
    pub action: GameAction,
    pub round: Option<Round>,
    pub chips: i64,
    pub seat: Option<usize>,
    pub positions: Vec<Position>,
    pub bankroll: i64,
    pub initial_stack_size: i64,
    pub stack_size: i64,
    pub pot: i64,
    pub wager: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    pub status: TableStatus,
    pub game_state: Option<GameState>,
    pub player_states: Vec<TablePlayerState>,
    /// Table player indexes participating this hand, in action order starting
    /// from the dealer.
    pub game_player_indexes: Vec<usize>,
    pub game_count: u64,
    pub start_at: Option<i64>,
    pub blind_state: TableBlindState,
    pub current_dealer_seat: Option<usize>,
    pub current_sb_seat: Option<usize>,
    pub current_bb_seat: Option<usize>,
    /// Seat index to player index.
    pub seat_map: Vec<Option<usize>>,
    pub next_bb_order_player_ids: Vec<String>,
    pub last_player_game_action: Option<TablePlayerGameAction>,
    /// Epoch seconds; 0 means no pending action deadline.
    pub current_action_end_at: i64,
    /// Blind level snapshot fixed when the hand opened.
    pub game_blind_state: Option<TableBlindState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub meta: TableMeta,
    pub state: TableState,
    pub update_at: i64,
    pub update_serial: u64,
}

impl Table {
    pub fn find_player_idx(&self, player_id: &str) -> Option<usize> {
        self.state
            .player_states
            .iter()
            .position(|p| p.player_id == player_id)
    }

    pub fn find_game_player_idx(&self, player_id: &str) -> Option<usize> {
        self.state
            .game_player_indexes
            .iter()
            .position(|&player_idx| {
                self.state
                    .player_states
                    .get(player_idx)
                    .map(|p| p.player_id == player_id)
                    .unwrap_or(false)
            })
    }

    pub fn player_idx_from_game_player_idx(&self, game_player_idx: usize) -> Option<usize> {
        self.state.game_player_indexes.get(game_player_idx).copied()
    }

    pub fn player_seat_map(&self) -> HashMap<String, usize> {
        self.state
            .player_states
            .iter()
            .filter_map(|p| p.seat.map(|seat| (p.player_id.clone(), seat)))
            .collect()
    }

    pub fn alive_players(&self) -> Vec<&TablePlayerState> {
        self.state
            .player_states
            .iter()
            .filter(|p| p.bankroll > 0)
            .collect()
    }

    pub fn should_pause(&self) -> bool {
        self.state.blind_state.is_breaking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table {
            id: "t-1".to_string(),
            meta: TableMeta {
                competition_id: "c-1".to_string(),
                rule: CompetitionRule::Default,
                mode: CompetitionMode::Ct,
                max_duration: 30,
                table_max_seat_count: 9,
                table_min_player_count: 2,
                min_chip_unit: 10,
                action_time: 10,
            },
            state: TableState {
                status: TableStatus::Standby,
                game_state: None,
                player_states: vec![
                    TablePlayerState {
                        player_id: "alice".to_string(),
                        seat: Some(2),
                        positions: vec![Position::Dealer],
                        bankroll: 1000,
                        is_in: true,
                        is_participated: true,
                        game_statistics: TablePlayerGameStatistics::default(),
                    },
                    TablePlayerState {
                        player_id: "bob".to_string(),
                        seat: Some(5),
                        positions: vec![Position::Bb],
                        bankroll: 0,
                        is_in: true,
                        is_participated: false,
                        game_statistics: TablePlayerGameStatistics::default(),
                    },
                ],
                game_player_indexes: vec![0, 1],
                game_count: 3,
                start_at: Some(1_700_000_000),
                blind_state: TableBlindState {
                    level: 2,
                    ante: 0,
                    dealer: 0,
                    sb: 10,
                    bb: 20,
                },
                current_dealer_seat: Some(2),
                current_sb_seat: Some(2),
                current_bb_seat: Some(5),
                seat_map: vec![None, None, Some(0), None, None, Some(1), None, None, None],
                next_bb_order_player_ids: vec!["alice".to_string()],
                last_player_game_action: None,
                current_action_end_at: 0,
                game_blind_state: None,
            },
            update_at: 1_700_000_100,
            update_serial: 42,
        }
    }

    #[test]
    fn status_strings_are_bit_exact() {
        for (status, s) in [
            (TableStatus::Created, "\"created\""),
            (TableStatus::Balancing, "\"balancing\""),
            (TableStatus::Pausing, "\"pausing\""),
            (TableStatus::Standby, "\"standby\""),
            (TableStatus::GameOpened, "\"game_opened\""),
            (TableStatus::Playing, "\"playing\""),
            (TableStatus::GameSettled, "\"game_settled\""),
            (TableStatus::Closed, "\"closed\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), s);
        }
    }

    #[test]
    fn clone_round_trips_through_serialization() {
        let table = sample_table();
        let cloned = table.clone();
        assert_eq!(table, cloned);

        let json = serde_json::to_string(&table).unwrap();
        let restored: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(table, restored);
    }

    #[test]
    fn player_lookups() {
        let table = sample_table();
        assert_eq!(table.find_player_idx("alice"), Some(0));
        assert_eq!(table.find_player_idx("zed"), None);
        assert_eq!(table.find_game_player_idx("bob"), Some(1));
        assert_eq!(table.player_idx_from_game_player_idx(0), Some(0));
        assert_eq!(table.player_idx_from_game_player_idx(9), None);
    }

    #[test]
    fn alive_players_excludes_busted() {
        let table = sample_table();
        let alive = table.alive_players();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].player_id, "alice");
    }

    #[test]
    fn blind_break_detection() {
        let mut table = sample_table();
        assert!(!table.should_pause());
        table.state.blind_state.level = -1;
        assert!(table.should_pause());
        assert!(table.state.blind_state.is_breaking());
    }
}
