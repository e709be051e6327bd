//! Engine-wide tunables.

/// Capacity of the hand driver's incoming-state channel.
pub const GAME_STATE_CHANNEL_CAPACITY: usize = 1024;

/// Seconds a ReadyGroup waits before force-readying stragglers.
pub const DEFAULT_READY_GROUP_TIMEOUT_SECS: u64 = 17;

/// Seconds between settlement and the next automatic hand open.
pub const DEFAULT_GAME_CONTINUE_INTERVAL_SECS: u64 = 1;

/// Seconds the OpenGameManager waits for settlement acknowledgements.
pub const DEFAULT_OPEN_GAME_TIMEOUT_SECS: u64 = 2;

/// Attempts made to open a hand after a seat/rotation failure.
pub const OPEN_GAME_RETRY_LIMIT: usize = 10;

/// Seconds between open-game retry attempts.
pub const OPEN_GAME_RETRY_PAUSE_SECS: u64 = 3;

/// Seconds granted to the CT/Cash duration-expiry notification task.
pub const AUTO_OPEN_END_NOTIFY_DELAY_SECS: u64 = 1;
