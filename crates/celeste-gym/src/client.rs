//! Remote [`PolicySource`] over the wire protocol.
//!
//! [`RemotePolicyClient`] holds one TCP connection to a shard. Calls are
//! serialised through a mutex, so the client can be shared between the
//! episode loop and the reward forwarder thread.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use celeste_core::error::PolicyCallError;
use celeste_core::schema::SchemaVersion;
use celeste_core::traits::PolicySource;
use celeste_core::types::{
    Action, ActionSpace, EpisodeId, Observation, ObservationSpace, StepInfo,
};

use crate::framing::{read_message, write_message};
use crate::protocol::{PROTOCOL_VERSION, ProtocolError, Request, Response};

/// What the shard reported during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub protocol_version: String,
    pub server_name: String,
    pub schema: SchemaVersion,
    pub observation_space: ObservationSpace,
    pub action_space: ActionSpace,
}

/// Policy source backed by a policy-server shard.
pub struct RemotePolicyClient {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    info: ServerInfo,
}

impl RemotePolicyClient {
    /// Connect and perform the `init` handshake.
    ///
    /// # Errors
    ///
    /// Fails on connection errors or if the shard rejects the handshake.
    pub fn connect(
        addr: impl ToSocketAddrs,
        client_name: &str,
        schema: SchemaVersion,
    ) -> Result<Self, ProtocolError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let init = Request::Init {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_name: client_name.to_string(),
            schema,
        };
        let info = match exchange(&mut stream, &init)? {
            Response::InitResponse {
                protocol_version,
                server_name,
                schema,
                observation_space,
                action_space,
            } => ServerInfo {
                protocol_version,
                server_name,
                schema,
                observation_space,
                action_space,
            },
            Response::Error { code, message } => {
                return Err(ProtocolError::Remote { code, message });
            }
            other => return Err(unexpected("init_response", &other)),
        };
        tracing::info!(server = %info.server_name, %peer, schema = %info.schema, "Connected to policy server");

        Ok(Self {
            stream: Mutex::new(stream),
            peer,
            info,
        })
    }

    /// [`connect`](Self::connect), retrying transport failures.
    ///
    /// A shard that is still starting refuses connections for a moment;
    /// handshake rejections are returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once `attempts` are used up.
    pub fn connect_with_retry(
        addr: &str,
        client_name: &str,
        schema: SchemaVersion,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, ProtocolError> {
        let mut attempt = 1;
        loop {
            match Self::connect(addr, client_name, schema) {
                Ok(client) => return Ok(client),
                Err(e) if e.is_transport() && attempt < attempts => {
                    tracing::warn!(addr, attempt, error = %e, "Policy server not reachable, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub const fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one request and wait for its response.
    ///
    /// `error` responses come back as [`ProtocolError::Remote`].
    ///
    /// # Errors
    ///
    /// Fails on transport errors, a closed connection, or a remote error.
    pub fn request(&self, request: &Request) -> Result<Response, ProtocolError> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match exchange(&mut stream, request)? {
            Response::Error { code, message } => Err(ProtocolError::Remote { code, message }),
            response => Ok(response),
        }
    }

    /// Record an action chosen by the client for a training episode.
    ///
    /// # Errors
    ///
    /// Fails if the episode is unknown or was started without training.
    pub fn log_action(
        &self,
        episode: &EpisodeId,
        obs: &Observation,
        action: &Action,
    ) -> Result<(), ProtocolError> {
        let request = Request::LogAction {
            episode_id: episode.clone(),
            observation: obs.clone(),
            action: action.clone(),
        };
        expect_ack(&self.request(&request)?)
    }

    /// Round-trip a ping, returning the server clock in milliseconds.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub fn ping(&self, timestamp: u64) -> Result<u64, ProtocolError> {
        match self.request(&Request::Ping { timestamp })? {
            Response::Pong { server_time, .. } => Ok(server_time),
            other => Err(unexpected("pong", &other)),
        }
    }

    /// Close the connection politely.
    ///
    /// # Errors
    ///
    /// Fails on transport errors.
    pub fn close(self) -> Result<(), ProtocolError> {
        match self.request(&Request::Close)? {
            Response::Close => Ok(()),
            other => Err(unexpected("close", &other)),
        }
    }
}

impl PolicySource for RemotePolicyClient {
    fn start_episode(&self, training_enabled: bool) -> Result<EpisodeId, PolicyCallError> {
        let request = Request::StartEpisode {
            training_enabled,
            episode_id: None,
        };
        match self.request(&request) {
            Ok(Response::EpisodeStarted { episode_id }) => Ok(episode_id),
            Ok(other) => Err(call_error("start_episode", &unexpected("episode_started", &other))),
            Err(e) => Err(call_error("start_episode", &e)),
        }
    }

    fn get_action(&self, episode: &EpisodeId, obs: &Observation) -> Result<Action, PolicyCallError> {
        let request = Request::GetAction {
            episode_id: episode.clone(),
            observation: obs.clone(),
        };
        match self.request(&request) {
            Ok(Response::Action { action }) => Ok(action),
            Ok(other) => Err(call_error("get_action", &unexpected("action", &other))),
            Err(e) => Err(call_error("get_action", &e)),
        }
    }

    fn log_returns(
        &self,
        episode: &EpisodeId,
        reward: f32,
        info: StepInfo,
    ) -> Result<(), PolicyCallError> {
        let request = Request::LogReturns {
            episode_id: episode.clone(),
            reward,
            info,
        };
        self.request(&request)
            .and_then(|r| expect_ack(&r))
            .map_err(|e| call_error("log_returns", &e))
    }

    fn end_episode(&self, episode: &EpisodeId, obs: &Observation) -> Result<(), PolicyCallError> {
        let request = Request::EndEpisode {
            episode_id: episode.clone(),
            observation: obs.clone(),
        };
        self.request(&request)
            .and_then(|r| expect_ack(&r))
            .map_err(|e| call_error("end_episode", &e))
    }

    fn name(&self) -> &str {
        &self.info.server_name
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn exchange(stream: &mut TcpStream, request: &Request) -> Result<Response, ProtocolError> {
    write_message(stream, request)?;
    read_message(stream)?.ok_or_else(|| {
        ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "policy server closed the connection",
        ))
    })
}

fn expect_ack(response: &Response) -> Result<(), ProtocolError> {
    match response {
        Response::Ack => Ok(()),
        other => Err(unexpected("ack", other)),
    }
}

fn unexpected(expected: &str, got: &Response) -> ProtocolError {
    ProtocolError::Remote {
        code: crate::protocol::ErrorCode::UnexpectedMessage,
        message: format!("expected '{expected}', got '{}'", got.type_name()),
    }
}

fn call_error(call: &'static str, err: &ProtocolError) -> PolicyCallError {
    if err.is_transport() {
        PolicyCallError::retryable(call, err.to_string())
    } else {
        PolicyCallError::fatal(call, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
