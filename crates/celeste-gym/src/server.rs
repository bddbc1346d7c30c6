//! Policy-server shard over TCP.
//!
//! A [`PolicyServer`] owns one listen port and serves any number of client
//! connections, one thread each. All connections share a [`ShardState`]:
//! the shard's policy, schema and [`EpisodeRegistry`]. The policy is
//! evaluated outside the registry lock so slow inference on one connection
//! does not stall bookkeeping on the others.

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use celeste_core::config::ServerConfig;
use celeste_core::schema::Schema;
use celeste_core::traits::Policy;
use celeste_core::types::{EpisodeId, Observation};

use crate::episodes::{EpisodeRegistry, RegistryStats, Trajectory};
use crate::framing::{read_message, write_message};
use crate::port_lock::{PortLockError, PortReservation};
use crate::protocol::{
    PROTOCOL_VERSION, ProtocolError, ProtocolState, Request, Response, negotiate_version,
};
use crate::state_machine::ProtocolStateMachine;

// ---------------------------------------------------------------------------
// ShardState
// ---------------------------------------------------------------------------

/// State shared by every connection of one shard.
pub struct ShardState {
    name: String,
    schema: Schema,
    policy: Box<dyn Policy>,
    registry: Mutex<EpisodeRegistry>,
}

impl ShardState {
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        policy: Box<dyn Policy>,
        config: &ServerConfig,
        seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            policy,
            registry: Mutex::new(EpisodeRegistry::new(config.max_sample_queue_size, seed)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn registry(&self) -> MutexGuard<'_, EpisodeRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry().stats()
    }

    /// Drain completed training trajectories.
    pub fn take_samples(&self) -> Vec<Trajectory> {
        self.registry().take_samples()
    }

    fn check_observation(&self, obs: &Observation) -> Result<(), ProtocolError> {
        if obs.schema() == self.schema.version {
            Ok(())
        } else {
            Err(ProtocolError::SchemaMismatch {
                client: obs.schema(),
                server: self.schema.version,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyServer
// ---------------------------------------------------------------------------

/// TCP listener for one shard.
pub struct PolicyServer {
    listener: TcpListener,
    state: Arc<ShardState>,
}

impl PolicyServer {
    /// Bind to the given address (e.g. `"127.0.0.1:9900"`).
    ///
    /// # Errors
    ///
    /// Returns an IO error if the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs, state: Arc<ShardState>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, state })
    }

    /// Claim a port at or above `start_port` through the lock directory,
    /// bind it on `host`, and release the lock after the configured grace.
    ///
    /// # Errors
    ///
    /// Fails if no port could be claimed or the claimed port cannot be bound.
    pub fn bind_reserved(
        host: &str,
        start_port: u16,
        config: &ServerConfig,
        state: Arc<ShardState>,
    ) -> Result<Self, PortLockError> {
        let reservation =
            PortReservation::reserve(&config.lock_dir, start_port, config.max_port_attempts)?;
        let listener = TcpListener::bind((host, reservation.port()))?;
        tracing::info!(
            shard = %state.name,
            port = reservation.port(),
            "Shard bound reserved port"
        );
        // Detached: the lock goes away on its own once the grace expires.
        drop(reservation.release_after(config.lock_grace()));
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &Arc<ShardState> {
        &self.state
    }

    /// Accept one client connection and serve it on the current thread.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if communication fails.
    pub fn serve_one(&self) -> Result<(), ProtocolError> {
        let (stream, _addr) = self.listener.accept()?;
        handle_connection(stream, &self.state)
    }

    /// Accept connections until `shutdown` is set, one thread each.
    ///
    /// A blocked `accept` only notices the flag on the next connection;
    /// [`ServerHandle::shutdown`] makes that connection itself.
    pub fn run(&self, shutdown: &AtomicBool) {
        for stream in self.listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(shard = %self.state.name, error = %e, "Accept failed");
                    continue;
                }
            };
            let state = Arc::clone(&self.state);
            std::thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(e) = handle_connection(stream, &state) {
                    tracing::warn!(shard = %state.name, ?peer, error = %e, "Connection ended with error");
                }
            });
        }
    }

    /// Run the accept loop on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the local address cannot be read.
    pub fn spawn(self) -> std::io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let state = Arc::clone(&self.state);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = std::thread::spawn(move || self.run(&flag));
        Ok(ServerHandle {
            addr,
            state,
            shutdown,
            thread,
        })
    }
}

/// Handle to a shard running on a background thread.
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<ShardState>,
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub const fn state(&self) -> &Arc<ShardState> {
        &self.state
    }

    /// Stop accepting connections and join the accept loop.
    ///
    /// Connections already open keep their threads until the peer closes.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocked accept.
        let _ = TcpStream::connect(self.addr);
        if self.thread.join().is_err() {
            tracing::error!(addr = %self.addr, "Accept loop panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

fn handle_connection(stream: TcpStream, state: &ShardState) -> Result<(), ProtocolError> {
    let mut started = HashSet::new();
    let result = serve_connection(stream, state, &mut started);
    let abandoned = state.registry().abandon(&started);
    if abandoned > 0 {
        tracing::warn!(shard = %state.name, abandoned, "Client left with episodes still open");
    }
    result
}

fn serve_connection(
    stream: TcpStream,
    state: &ShardState,
    started: &mut HashSet<EpisodeId>,
) -> Result<(), ProtocolError> {
    stream.set_nodelay(true)?;
    let mut reader = stream.try_clone()?;
    let mut writer = stream;
    let mut sm = ProtocolStateMachine::new();

    loop {
        let Some(request) = read_message::<Request>(&mut reader)? else {
            break;
        };

        let response = match sm.on_request(&request) {
            Ok(()) => dispatch(state, request).unwrap_or_else(ProtocolError::into_response),
            Err(e) => e.into_response(),
        };

        if let Response::EpisodeStarted { episode_id } = &response {
            started.insert(episode_id.clone());
        }
        sm.on_response(&response);
        write_message(&mut writer, &response)?;

        if matches!(
            sm.state(),
            ProtocolState::Disconnected | ProtocolState::Error
        ) {
            break;
        }
    }

    Ok(())
}

fn dispatch(state: &ShardState, request: Request) -> Result<Response, ProtocolError> {
    match request {
        Request::Init {
            protocol_version,
            client_name,
            schema,
        } => {
            let version = negotiate_version(&protocol_version, PROTOCOL_VERSION)?;
            if schema != state.schema.version {
                return Err(ProtocolError::SchemaMismatch {
                    client: schema,
                    server: state.schema.version,
                });
            }
            tracing::info!(shard = %state.name, client = %client_name, "Client connected");
            Ok(Response::InitResponse {
                protocol_version: version,
                server_name: state.name.clone(),
                schema: state.schema.version,
                observation_space: state.schema.observation_space(),
                action_space: state.schema.action_space(),
            })
        }
        Request::StartEpisode {
            training_enabled,
            episode_id,
        } => {
            let episode_id = state.registry().start(training_enabled, episode_id)?;
            tracing::debug!(shard = %state.name, episode = %episode_id, training_enabled, "Episode started");
            Ok(Response::EpisodeStarted { episode_id })
        }
        Request::GetAction {
            episode_id,
            observation,
        } => {
            state.check_observation(&observation)?;
            if !state.registry().contains(&episode_id) {
                return Err(ProtocolError::UnknownEpisode(episode_id));
            }
            let action = state.policy.get_action(&observation);
            state.schema.action_space().validate(&action)?;
            state
                .registry()
                .record_action(&episode_id, observation, action.clone())?;
            Ok(Response::Action { action })
        }
        Request::LogAction {
            episode_id,
            observation,
            action,
        } => {
            state.check_observation(&observation)?;
            state.schema.action_space().validate(&action)?;
            state
                .registry()
                .log_action(&episode_id, observation, action)?;
            Ok(Response::Ack)
        }
        Request::LogReturns {
            episode_id,
            reward,
            info,
        } => {
            match state.registry().log_returns(&episode_id, reward, info) {
                Ok(()) => {}
                Err(ProtocolError::UnknownEpisode(id)) => {
                    tracing::warn!(shard = %state.name, episode = %id, reward, "Dropping returns for unknown episode");
                }
                Err(e) => return Err(e),
            }
            Ok(Response::Ack)
        }
        Request::EndEpisode {
            episode_id,
            observation,
        } => {
            let summary = state.registry().end(&episode_id, observation)?;
            tracing::info!(
                shard = %state.name,
                episode = %episode_id,
                steps = summary.steps,
                total_reward = summary.total_reward,
                training_enabled = summary.training_enabled,
                "Episode ended"
            );
            Ok(Response::Ack)
        }
        Request::Ping { timestamp } => Ok(Response::Pong {
            timestamp,
            server_time: unix_millis(),
        }),
        Request::Close => Ok(Response::Close),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
