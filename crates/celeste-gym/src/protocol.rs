//! Policy-server message protocol.
//!
//! Defines the JSON-serialisable request/response types exchanged between a
//! game-side client and a policy-server shard.
//!
//! The protocol follows a simple command-response pattern:
//!
//! 1. Client sends a [`Request`]
//! 2. Server processes it and replies with exactly one [`Response`]
//!
//! Messages are framed by [`framing`](crate::framing). A connection opens
//! with an `init` handshake; after that any number of episodes may be
//! started, stepped and ended over it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use celeste_core::schema::SchemaVersion;
use celeste_core::types::{Action, ActionSpace, EpisodeId, Observation, ObservationSpace, StepInfo};

/// Protocol version spoken by this crate. Major versions must match.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Largest accepted payload (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request from a client to a policy-server shard.
///
/// # Example
///
/// ```
/// use celeste_gym::protocol::Request;
///
/// let json = r#"{"type":"start_episode","training_enabled":true}"#;
/// let req: Request = serde_json::from_str(json).unwrap();
/// assert!(matches!(
///     req,
///     Request::StartEpisode { training_enabled: true, episode_id: None }
/// ));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Handshake. Must be the first message on a connection.
    Init {
        protocol_version: String,
        client_name: String,
        schema: SchemaVersion,
    },
    /// Open an episode, optionally under a client-chosen id.
    StartEpisode {
        training_enabled: bool,
        #[serde(default)]
        episode_id: Option<EpisodeId>,
    },
    /// Compute (and record) the action for an observation.
    GetAction {
        episode_id: EpisodeId,
        observation: Observation,
    },
    /// Record an action chosen elsewhere (off-policy).
    LogAction {
        episode_id: EpisodeId,
        observation: Observation,
        action: Action,
    },
    /// Record the reward for the episode's latest action.
    LogReturns {
        episode_id: EpisodeId,
        reward: f32,
        #[serde(default)]
        info: StepInfo,
    },
    /// Retire an episode with its final observation.
    EndEpisode {
        episode_id: EpisodeId,
        observation: Observation,
    },
    Ping {
        timestamp: u64,
    },
    /// Close the connection.
    Close,
}

impl Request {
    /// Serde tag of this request.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::StartEpisode { .. } => "start_episode",
            Self::GetAction { .. } => "get_action",
            Self::LogAction { .. } => "log_action",
            Self::LogReturns { .. } => "log_returns",
            Self::EndEpisode { .. } => "end_episode",
            Self::Ping { .. } => "ping",
            Self::Close => "close",
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Error category carried by [`Response::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    VersionMismatch,
    SchemaMismatch,
    UnexpectedMessage,
    UnknownEpisode,
    DuplicateEpisode,
    TrainingDisabled,
    InvalidAction,
    Internal,
}

/// A response from a policy-server shard.
///
/// # Example
///
/// ```
/// use celeste_gym::protocol::Response;
///
/// let json = serde_json::to_string(&Response::Ack).unwrap();
/// assert_eq!(json, r#"{"type":"ack"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    InitResponse {
        protocol_version: String,
        server_name: String,
        schema: SchemaVersion,
        observation_space: ObservationSpace,
        action_space: ActionSpace,
    },
    EpisodeStarted {
        episode_id: EpisodeId,
    },
    Action {
        action: Action,
    },
    Ack,
    Pong {
        timestamp: u64,
        server_time: u64,
    },
    Close,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    /// Create an error response.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Serde tag of this response.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::InitResponse { .. } => "init_response",
            Self::EpisodeStarted { .. } => "episode_started",
            Self::Action { .. } => "action",
            Self::Ack => "ack",
            Self::Pong { .. } => "pong",
            Self::Close => "close",
            Self::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolState
// ---------------------------------------------------------------------------

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    /// TCP connection open, waiting for `init`.
    Connected,
    /// `init` received, response pending.
    Handshaking,
    /// Handshake done; episode calls allowed.
    Ready,
    /// `close` received, response pending.
    Closing,
    Disconnected,
    /// Handshake failed; the connection is dropped.
    Error,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload of {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Unexpected '{got}' in state {current_state} (expected one of {expected:?})")]
    UnexpectedMessage {
        current_state: ProtocolState,
        expected: Vec<String>,
        got: String,
    },

    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch { client: String, server: String },

    #[error("Schema mismatch: client {client}, server {server}")]
    SchemaMismatch {
        client: SchemaVersion,
        server: SchemaVersion,
    },

    #[error("Unknown episode {0}")]
    UnknownEpisode(EpisodeId),

    #[error("Episode {0} already exists")]
    DuplicateEpisode(EpisodeId),

    #[error("Episode {0} was started with training disabled")]
    TrainingDisabled(EpisodeId),

    #[error("Invalid action: {0}")]
    InvalidAction(#[from] celeste_core::error::ValidationError),

    /// Error reported by the peer.
    #[error("Remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },
}

impl ProtocolError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::UnexpectedMessage { .. } => ErrorCode::UnexpectedMessage,
            Self::UnknownEpisode(_) => ErrorCode::UnknownEpisode,
            Self::DuplicateEpisode(_) => ErrorCode::DuplicateEpisode,
            Self::TrainingDisabled(_) => ErrorCode::TrainingDisabled,
            Self::InvalidAction(_) => ErrorCode::InvalidAction,
            Self::Remote { code, .. } => *code,
            Self::Io(_) | Self::Json(_) | Self::PayloadTooLarge { .. } => ErrorCode::Internal,
        }
    }

    /// Convert into the error response sent to the peer.
    #[must_use]
    pub fn into_response(self) -> Response {
        Response::error(self.code(), self.to_string())
    }

    /// `true` for transport failures where reconnecting may help.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

// ---------------------------------------------------------------------------
// Version negotiation
// ---------------------------------------------------------------------------

fn major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// Check that `client` and `server` share a major version, returning the
/// version the server will speak.
pub fn negotiate_version(client: &str, server: &str) -> Result<String, ProtocolError> {
    match (major(client), major(server)) {
        (Some(c), Some(s)) if c == s => Ok(server.to_string()),
        _ => Err(ProtocolError::VersionMismatch {
            client: client.to_string(),
            server: server.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::Schema;

    use super::*;

    // ---- Request serialisation ----

    #[test]
    fn request_tags_match_type_names() {
        let obs = Schema::default().blank_observation();
        let id = EpisodeId::from("ep");
        let requests = [
            Request::Init {
                protocol_version: PROTOCOL_VERSION.into(),
                client_name: "test".into(),
                schema: SchemaVersion::V2,
            },
            Request::StartEpisode {
                training_enabled: true,
                episode_id: None,
            },
            Request::GetAction {
                episode_id: id.clone(),
                observation: obs.clone(),
            },
            Request::LogReturns {
                episode_id: id.clone(),
                reward: 1.0,
                info: StepInfo::default(),
            },
            Request::EndEpisode {
                episode_id: id,
                observation: obs,
            },
            Request::Ping { timestamp: 1 },
            Request::Close,
        ];
        for req in requests {
            let json = serde_json::to_value(&req).unwrap();
            assert_eq!(json["type"], req.type_name());
            let back: Request = serde_json::from_value(json).unwrap();
            assert_eq!(back, req);
        }
    }

    #[test]
    fn log_returns_info_defaults() {
        let json = r#"{"type":"log_returns","episode_id":"abc","reward":0.5}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        let Request::LogReturns { info, reward, .. } = req else {
            panic!("expected LogReturns");
        };
        assert_eq!(info, StepInfo::default());
        assert!((reward - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn get_action_observation_is_schema_tagged() {
        let req = Request::GetAction {
            episode_id: EpisodeId::from("e1"),
            observation: Schema::default().blank_observation(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["observation"]["schema"], "v2");
        assert_eq!(json["episode_id"], "e1");
    }

    #[test]
    fn raw_action_response() {
        let json = r#"{"type":"action","action":[0,2,1,0]}"#;
        let resp: Response = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp,
            Response::Action {
                action: Action::from(vec![0, 2, 1, 0])
            }
        );
    }

    // ---- Errors ----

    #[test]
    fn error_into_response_carries_code() {
        let err = ProtocolError::UnknownEpisode(EpisodeId::from("gone"));
        let Response::Error { code, message } = err.into_response() else {
            panic!("expected Error");
        };
        assert_eq!(code, ErrorCode::UnknownEpisode);
        assert!(message.contains("gone"));
    }

    #[test]
    fn io_errors_are_transport() {
        let err = ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_transport());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(!ProtocolError::UnknownEpisode(EpisodeId::from("x")).is_transport());
    }

    // ---- Version negotiation ----

    #[test]
    fn same_major_negotiates() {
        assert_eq!(negotiate_version("1.4.2", "1.0.0").unwrap(), "1.0.0");
    }

    #[test]
    fn different_major_rejected() {
        let err = negotiate_version("2.0.0", PROTOCOL_VERSION).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { .. }));
        assert!(negotiate_version("garbage", PROTOCOL_VERSION).is_err());
    }
}
