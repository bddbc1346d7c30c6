//! Queue bridge between a live game loop and a step/reset environment.
//!
//! - [`queues`] — the four FIFO queues and their game-side ([`GameLink`])
//!   and adapter-side ([`EnvLink`]) ends
//! - [`env`](mod@env) — [`CelesteEnv`], the blocking `step`/`reset` adapter
//! - [`stub`] — [`StubGame`], a deterministic producer for offline runs
//! - [`replay`] — [`ActionScript`], scripted action playback

pub mod env;
pub mod error;
pub mod queues;
pub mod replay;
pub mod stub;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use env::CelesteEnv;
pub use error::BridgeError;
pub use queues::{EnvLink, GameLink, QueueDepths, channel};
pub use replay::{ActionScript, ReplayError, ReplaySummary};
pub use stub::{StubGame, StubLevel, StubStats};

pub mod prelude {
    pub use crate::{
        ActionScript, BridgeError, CelesteEnv, EnvLink, GameLink, QueueDepths, StubGame,
        StubLevel, channel,
    };
}
