//! Game-side client: routing, the episode loop and its reward forwarder.
//!
//! - [`routing`] — worker index from the install directory, shard endpoint
//! - [`episode_loop`] — [`EpisodeLoop`], the start/act/step/end cycle
//! - [`returns`] — [`ReturnsForwarder`], the reward logging thread
//! - [`logging`] — log file setup and fatal-error reporting

pub mod episode_loop;
pub mod error;
pub mod logging;
pub mod returns;
pub mod routing;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use episode_loop::{EpisodeLoop, EpisodeReport, LoopState, RunSummary, StopReason};
pub use error::ClientError;
pub use returns::{ForwarderStats, ReturnsForwarder};
pub use routing::{Route, Router, WorkerIdentity};

pub mod prelude {
    pub use crate::{
        ClientError, EpisodeLoop, LoopState, ReturnsForwarder, Router, RunSummary, StopReason,
        WorkerIdentity,
    };
}
