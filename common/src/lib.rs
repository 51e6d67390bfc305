mod messages;
mod partition;
mod player;
mod snapshot;

pub use messages::*;
pub use partition::*;
pub use player::*;
pub use snapshot::*;

/// Leaderboard depth used when a request does not name one.
pub const DEFAULT_TOP_K: usize = 10;

/// Upper bound for any requested limit.
pub const MAX_LIMIT: usize = 100;
