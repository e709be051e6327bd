//! Creation settings, engine options and collaborator callbacks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{DEFAULT_GAME_CONTINUE_INTERVAL_SECS, DEFAULT_OPEN_GAME_TIMEOUT_SECS};

use super::model::{
    Table, TableBlindState, TableMeta, TablePlayerGameAction, TablePlayerState, TableStateEvent,
};
use super::TableEngineError;

/// One joining player; `seat` of `None` requests a random empty seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPlayer {
    pub player_id: String,
    pub redeem_chips: i64,
    pub seat: Option<usize>,
}

/// Everything needed to create a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSettings {
    pub table_id: String,
    pub meta: TableMeta,
    pub blind: TableBlindState,
    pub join_players: Vec<JoinPlayer>,
}

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEngineOptions {
    /// Seconds between settlement and the next automatic hand open.
    pub game_continue_interval: u64,
    /// Seconds the open-game barrier waits for settlement acknowledgements.
    pub open_game_timeout: u64,
}

impl Default for TableEngineOptions {
    fn default() -> Self {
        Self {
            game_continue_interval: DEFAULT_GAME_CONTINUE_INTERVAL_SECS,
            open_game_timeout: DEFAULT_OPEN_GAME_TIMEOUT_SECS,
        }
    }
}

/// Collaborator callbacks, registered before the table is created.
///
/// All callbacks run on engine threads while the engine lock may be held:
/// they must return quickly and must not call back into the engine
/// synchronously. Forwarding snapshots through a channel is the intended
/// consumption pattern.
#[derive(Clone)]
pub struct TableEngineCallbacks {
    pub on_table_updated: Arc<dyn Fn(&Table) + Send + Sync>,
    pub on_table_error_updated: Arc<dyn Fn(&Table, &TableEngineError) + Send + Sync>,
    pub on_table_state_updated: Arc<dyn Fn(TableStateEvent, &Table) + Send + Sync>,
    pub on_table_player_state_updated: Arc<dyn Fn(&str, &str, &TablePlayerState) + Send + Sync>,
    pub on_table_player_reserved: Arc<dyn Fn(&str, &str, &TablePlayerState) + Send + Sync>,
    pub on_game_player_action_updated: Arc<dyn Fn(&TablePlayerGameAction) + Send + Sync>,
    pub on_auto_game_open_end: Arc<dyn Fn(&str, &str) + Send + Sync>,
    pub on_ready_open_first_table_game:
        Arc<dyn Fn(&str, &str, u64, &[TablePlayerState]) + Send + Sync>,
}

impl Default for TableEngineCallbacks {
    fn default() -> Self {
        Self {
            on_table_updated: Arc::new(|_| {}),
            on_table_error_updated: Arc::new(|_, _| {}),
            on_table_state_updated: Arc::new(|_, _| {}),
            on_table_player_state_updated: Arc::new(|_, _, _| {}),
            on_table_player_reserved: Arc::new(|_, _, _| {}),
            on_game_player_action_updated: Arc::new(|_| {}),
            on_auto_game_open_end: Arc::new(|_, _| {}),
            on_ready_open_first_table_game: Arc::new(|_, _, _, _| {}),
        }
    }
}
