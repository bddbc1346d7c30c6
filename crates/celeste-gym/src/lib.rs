//! Policy-server wire protocol, shards and the remote policy client.
//!
//! - [`protocol`] — request/response types, error codes, version constants
//! - [`framing`] — length-prefixed JSON wire format (4-byte LE `u32` + payload)
//! - [`state_machine`] — [`ProtocolStateMachine`] enforcing message ordering
//! - [`episodes`] — [`EpisodeRegistry`] and the bounded sample queue
//! - [`port_lock`] — directory-based port reservation across processes
//! - [`server`] — [`PolicyServer`] shard listener
//! - [`client`] — [`RemotePolicyClient`], a `PolicySource` over TCP
//!
//! Connections begin with an `init` handshake that checks the protocol
//! major version and the observation schema, then carry any number of
//! `start_episode` / `get_action` / `log_returns` / `end_episode` calls.

pub mod client;
pub mod episodes;
pub mod framing;
pub mod port_lock;
pub mod protocol;
pub mod server;
pub mod state_machine;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use celeste_core::error::PolicyCallError;
pub use client::{RemotePolicyClient, ServerInfo};
pub use episodes::{EpisodeRegistry, RegistryStats, Trajectory};
pub use port_lock::{PortLockError, PortReservation};
pub use protocol::{
    ErrorCode, PROTOCOL_VERSION, ProtocolError, ProtocolState, Request, Response,
    negotiate_version,
};
pub use server::{PolicyServer, ServerHandle, ShardState};
pub use state_machine::ProtocolStateMachine;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        EpisodeRegistry, PolicyCallError, PolicyServer, PortReservation, ProtocolStateMachine,
        RemotePolicyClient, ServerHandle, ShardState,
        protocol::{PROTOCOL_VERSION, ProtocolError, ProtocolState, Request, Response},
    };
}
