//! Per-connection protocol state machine.
//!
//! [`ProtocolStateMachine`] tracks the current [`ProtocolState`] and rejects
//! requests that are not legal in it. Episode bookkeeping lives in
//! [`EpisodeRegistry`](crate::episodes::EpisodeRegistry); this type only
//! guards message ordering.

use crate::protocol::{ProtocolError, ProtocolState, Request, Response};

const READY_REQUESTS: &[&str] = &[
    "start_episode",
    "get_action",
    "log_action",
    "log_returns",
    "end_episode",
    "ping",
    "close",
];

/// Tracks protocol state and enforces valid transitions.
///
/// # Example
///
/// ```
/// use celeste_gym::protocol::{ProtocolState, Request};
/// use celeste_gym::state_machine::ProtocolStateMachine;
///
/// let mut sm = ProtocolStateMachine::new();
/// assert_eq!(sm.state(), ProtocolState::Connected);
/// assert!(sm.on_request(&Request::Close).is_err());
/// ```
#[derive(Debug)]
pub struct ProtocolStateMachine {
    state: ProtocolState,
}

impl ProtocolStateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ProtocolState::Connected,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// `true` once the handshake has completed and until close.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, ProtocolState::Ready)
    }

    /// Validate and apply the transition for an incoming request.
    pub fn on_request(&mut self, request: &Request) -> Result<(), ProtocolError> {
        let msg_type = request.type_name();
        let allowed = self.allowed_request_types();
        if !allowed.contains(&msg_type) {
            return Err(ProtocolError::UnexpectedMessage {
                current_state: self.state,
                expected: allowed.iter().map(|s| (*s).to_string()).collect(),
                got: msg_type.to_string(),
            });
        }

        self.state = match request {
            Request::Init { .. } => ProtocolState::Handshaking,
            Request::Close => ProtocolState::Closing,
            _ => self.state,
        };
        Ok(())
    }

    /// Update state after sending a response.
    pub const fn on_response(&mut self, response: &Response) {
        match (&self.state, response) {
            (ProtocolState::Handshaking, Response::InitResponse { .. }) => {
                self.state = ProtocolState::Ready;
            }
            (ProtocolState::Handshaking, Response::Error { .. }) => {
                self.state = ProtocolState::Error;
            }
            (ProtocolState::Closing, Response::Close) => {
                self.state = ProtocolState::Disconnected;
            }
            _ => {}
        }
    }

    pub const fn enter_error(&mut self) {
        self.state = ProtocolState::Error;
    }

    /// Message types allowed in the current state.
    pub const fn allowed_request_types(&self) -> &'static [&'static str] {
        match self.state {
            ProtocolState::Connected => &["init"],
            ProtocolState::Ready => READY_REQUESTS,
            ProtocolState::Handshaking
            | ProtocolState::Closing
            | ProtocolState::Disconnected
            | ProtocolState::Error => &[],
        }
    }
}

impl Default for ProtocolStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::{Schema, SchemaVersion};
    use celeste_core::types::EpisodeId;

    use super::*;
    use crate::protocol::{ErrorCode, PROTOCOL_VERSION};

    fn init_request() -> Request {
        Request::Init {
            protocol_version: PROTOCOL_VERSION.into(),
            client_name: "test".into(),
            schema: SchemaVersion::V2,
        }
    }

    fn init_response() -> Response {
        let schema = Schema::default();
        Response::InitResponse {
            protocol_version: PROTOCOL_VERSION.into(),
            server_name: "shard-0".into(),
            schema: schema.version,
            observation_space: schema.observation_space(),
            action_space: schema.action_space(),
        }
    }

    fn ready_sm() -> ProtocolStateMachine {
        let mut sm = ProtocolStateMachine::new();
        sm.on_request(&init_request()).unwrap();
        sm.on_response(&init_response());
        assert!(sm.is_ready());
        sm
    }

    #[test]
    fn default_starts_connected() {
        assert_eq!(ProtocolStateMachine::default().state(), ProtocolState::Connected);
    }

    #[test]
    fn connected_accepts_only_init() {
        let mut sm = ProtocolStateMachine::new();
        let err = sm
            .on_request(&Request::StartEpisode {
                training_enabled: true,
                episode_id: None,
            })
            .unwrap_err();
        let ProtocolError::UnexpectedMessage { expected, got, .. } = err else {
            panic!("expected UnexpectedMessage");
        };
        assert_eq!(expected, vec!["init".to_string()]);
        assert_eq!(got, "start_episode");

        sm.on_request(&init_request()).unwrap();
        assert_eq!(sm.state(), ProtocolState::Handshaking);
    }

    #[test]
    fn handshaking_rejects_everything() {
        let mut sm = ProtocolStateMachine::new();
        sm.on_request(&init_request()).unwrap();
        assert!(sm.on_request(&Request::Ping { timestamp: 0 }).is_err());
    }

    #[test]
    fn ready_accepts_episode_calls_without_moving() {
        let mut sm = ready_sm();
        let id = EpisodeId::from("e");
        let obs = Schema::default().blank_observation();
        let requests = [
            Request::StartEpisode {
                training_enabled: false,
                episode_id: None,
            },
            Request::GetAction {
                episode_id: id.clone(),
                observation: obs.clone(),
            },
            Request::LogReturns {
                episode_id: id.clone(),
                reward: 1.0,
                info: celeste_core::types::StepInfo::default(),
            },
            Request::EndEpisode {
                episode_id: id,
                observation: obs,
            },
            Request::Ping { timestamp: 9 },
        ];
        for req in &requests {
            sm.on_request(req).unwrap();
            assert_eq!(sm.state(), ProtocolState::Ready);
        }
    }

    #[test]
    fn ready_rejects_second_init() {
        let mut sm = ready_sm();
        assert!(sm.on_request(&init_request()).is_err());
        assert!(sm.is_ready());
    }

    #[test]
    fn close_from_ready() {
        let mut sm = ready_sm();
        sm.on_request(&Request::Close).unwrap();
        assert_eq!(sm.state(), ProtocolState::Closing);
        sm.on_response(&Response::Close);
        assert_eq!(sm.state(), ProtocolState::Disconnected);
        assert!(sm.allowed_request_types().is_empty());
    }

    #[test]
    fn handshake_error_transitions_to_error() {
        let mut sm = ProtocolStateMachine::new();
        sm.on_request(&init_request()).unwrap();
        sm.on_response(&Response::error(ErrorCode::SchemaMismatch, "v1 vs v2"));
        assert_eq!(sm.state(), ProtocolState::Error);
    }

    #[test]
    fn error_after_ready_keeps_connection_usable() {
        let mut sm = ready_sm();
        sm.on_response(&Response::error(ErrorCode::UnknownEpisode, "gone"));
        assert!(sm.is_ready());
    }

    #[test]
    fn error_state_rejects_all() {
        let mut sm = ready_sm();
        sm.enter_error();
        assert!(sm.on_request(&Request::Close).is_err());
    }
}
