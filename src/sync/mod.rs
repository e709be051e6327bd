//! Coordination primitives shared by the table engine: the in-hand readiness
//! barrier, the cross-hand settlement-ack barrier and the cancellable
//! scheduled task used for deferred continuation.

pub mod open_game;
pub mod ready_group;
pub mod timebank;

pub use open_game::{OpenGameManager, OpenGameState};
pub use ready_group::ReadyGroup;
pub use timebank::TimeBank;
