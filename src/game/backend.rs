//! Step-function facade over a poker-hand engine.

use super::state::{GameOptions, GameState};
use super::GameError;

/// A hand engine viewed as a pure step function: every call takes the current
/// state and returns a new one, leaving the input untouched. The driver only
/// ever hands a backend its own snapshot, so a backend that mutates in place
/// cannot corrupt table state.
///
/// Errors are opaque to the engine; they surface through the game error
/// callback without aborting the table.
pub trait GameBackend: Send + Sync {
    fn create_game(&self, options: &GameOptions) -> Result<GameState, GameError>;
    fn ready_for_all(&self, state: &GameState) -> Result<GameState, GameError>;
    fn pay_ante(&self, state: &GameState) -> Result<GameState, GameError>;
    fn pay_blinds(&self, state: &GameState) -> Result<GameState, GameError>;
    fn next(&self, state: &GameState) -> Result<GameState, GameError>;
    fn pay(&self, state: &GameState, chips: i64) -> Result<GameState, GameError>;
    fn fold(&self, state: &GameState) -> Result<GameState, GameError>;
    fn check(&self, state: &GameState) -> Result<GameState, GameError>;
    fn call(&self, state: &GameState) -> Result<GameState, GameError>;
    fn allin(&self, state: &GameState) -> Result<GameState, GameError>;
    fn bet(&self, state: &GameState, chips: i64) -> Result<GameState, GameError>;
    fn raise(&self, state: &GameState, chip_level: i64) -> Result<GameState, GameError>;
    fn pass(&self, state: &GameState) -> Result<GameState, GameError>;
}
