use celeste_bridge::BridgeError;
use celeste_core::error::{ConfigError, PolicyCallError};
use celeste_gym::protocol::ProtocolError;
use thiserror::Error;

/// Errors that stop the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Policy call error: {0}")]
    Policy(#[from] PolicyCallError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reward forwarder thread is gone")]
    ForwarderGone,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
