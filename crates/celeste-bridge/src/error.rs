use std::time::Duration;

use celeste_core::error::{SchemaError, ValidationError};
use thiserror::Error;

/// Errors surfaced by the queue bridge and the environment adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Every handle on the other side of `queue` has been dropped.
    #[error("Bridge disconnected: no peer left on the {queue} queue")]
    Disconnected { queue: &'static str },

    #[error("No action arrived within {0:?}")]
    ActionTimeout(Duration),

    #[error("Invalid action: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid game tick: {0}")]
    Schema(#[from] SchemaError),
}

impl BridgeError {
    pub(crate) const fn disconnected(queue: &'static str) -> Self {
        Self::Disconnected { queue }
    }
}
