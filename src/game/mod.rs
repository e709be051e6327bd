//! Single-hand machinery: the state contract, the backend trait, the hand
//! driver and winner ranking.
//!
//! This module provides:
//! - [`state`]: the typed hand state exchanged with backends
//! - [`backend`]: the step-function facade over a poker-hand engine
//! - [`driver`]: [`Game`], which routes backend events through readiness
//!   barriers and raises business callbacks
//! - [`settlement`]: winner computation from per-player hand powers

pub mod backend;
pub mod driver;
pub mod settlement;
pub mod state;

pub use backend::GameBackend;
pub use driver::Game;
pub use settlement::Rank;
pub use state::{
    BlindSetting, DeckKind, GameAction, GameEvent, GameMeta, GameOptions, GamePlayer,
    GamePlayerResult, GamePlayerSetting, GameResult, GameState, GameStatus, Position, Round,
};

use thiserror::Error;

/// Errors raised while driving a hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("game: player not found")]
    PlayerNotFound,

    #[error("game: invalid action")]
    InvalidAction,

    #[error("game: unknown event")]
    UnknownEvent,

    #[error("game: unknown event handler")]
    UnknownEventHandler,

    #[error("game backend: {0}")]
    Backend(String),
}
