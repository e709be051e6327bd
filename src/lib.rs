//! # pokertable
//!
//! A table engine for one multi-seat poker table: it coordinates seat
//! assignment and rotation, per-hand participant selection, blind-level
//! progression, player readiness, action intake, settlement and automatic
//! continuation into the next hand.
//!
//! Card dealing, hand ranking and pot construction are not implemented here:
//! they belong to an injected [`GameBackend`], a step function over
//! [`game::GameState`]. Blind schedules and table open/close decisions come
//! from the embedding competition runtime through the engine's public surface
//! and callbacks.
//!
//! ## Architecture
//!
//! - [`table::TableEngine`] guards one table with a coarse mutex and drives
//!   the lifecycle state machine (created → standby → opened → playing →
//!   settled → standby, with pausing and a terminal closed state).
//! - [`game::Game`] drives a single hand, serializing backend states through
//!   a bounded channel with one consumer task.
//! - [`sync::ReadyGroup`] gates in-hand stages (join, ante, blinds, ready) on
//!   participant acknowledgements with timeouts.
//! - [`sync::OpenGameManager`] gates the next hand on settlement
//!   acknowledgements from the previous one.
//! - [`sync::TimeBank`] schedules the cancellable continuation between hands.
//! - [`Manager`] registers engines by table id.
//!
//! The engine requires a tokio runtime: timer and consumer tasks are spawned
//! on the runtime handle captured when the engine is constructed.

pub mod constants;
pub mod game;
pub mod manager;
pub mod seats;
pub mod sync;
pub mod table;

pub use game::{GameBackend, GameError};
pub use manager::{Manager, ManagerError};
pub use seats::{SeatError, SeatManager, SeatRing};
pub use table::{
    CompetitionMode, CompetitionRule, JoinPlayer, Table, TableBlindState, TableEngine,
    TableEngineCallbacks, TableEngineError, TableEngineOptions, TableMeta, TablePlayerState,
    TableSettings, TableStateEvent, TableStatus,
};
