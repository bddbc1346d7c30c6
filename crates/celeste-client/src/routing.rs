//! Worker-to-shard routing.
//!
//! Each game copy runs from its own directory (`…/Celeste_0`,
//! `…/Celeste_1`, …). The worker index parsed from that directory decides
//! which policy-server shard the client talks to: consecutive workers are
//! packed onto the same shard, `clients_per_server` at a time, and any
//! overflow lands on the last shard.

use std::path::Path;

use celeste_core::config::RoutingConfig;

const WORKER_DIR_PREFIX: &str = "Celeste_";

// ---------------------------------------------------------------------------
// WorkerIdentity
// ---------------------------------------------------------------------------

/// Which game copy this process belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub index: usize,
    /// `false` for the base game install (no `Celeste_<n>` directory).
    pub is_worker: bool,
}

impl WorkerIdentity {
    /// Parse the worker index from a path ending in `Celeste_<n>`.
    ///
    /// The last `Celeste_<digits>` occurrence wins and it must not start the
    /// path. Anything else is the base game: index 0, not a worker.
    ///
    /// ```
    /// use celeste_client::routing::WorkerIdentity;
    ///
    /// let id = WorkerIdentity::from_path("/games/workers/Celeste_3".as_ref());
    /// assert_eq!(id.index, 3);
    /// assert!(id.is_worker);
    /// assert!(!WorkerIdentity::from_path("/games/Celeste".as_ref()).is_worker);
    /// ```
    pub fn from_path(path: &Path) -> Self {
        let text = path.to_string_lossy();
        text.rmatch_indices(WORKER_DIR_PREFIX)
            .filter(|(pos, _)| *pos > 0)
            .find_map(|(pos, prefix)| {
                let rest = &text[pos + prefix.len()..];
                let end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                rest[..end].parse().ok()
            })
            .map_or_else(Self::default, |index| Self {
                index,
                is_worker: true,
            })
    }

    /// Identity of the current working directory.
    pub fn from_current_dir() -> Self {
        std::env::current_dir().map_or_else(|_| Self::default(), |dir| Self::from_path(&dir))
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_worker {
            write!(f, "worker {}", self.index)
        } else {
            f.write_str("base game")
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Maps worker indices onto shard endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    num_shards: usize,
    clients_per_server: usize,
    base_port: u16,
    host: String,
}

impl Router {
    pub fn new(config: &RoutingConfig) -> Self {
        let num_shards = config.num_server_shards.max(1);
        Self {
            num_shards,
            clients_per_server: (config.num_client_workers / num_shards).max(1),
            base_port: config.base_port,
            host: config.host.clone(),
        }
    }

    pub const fn clients_per_server(&self) -> usize {
        self.clients_per_server
    }

    pub const fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Shard serving `worker`, clamped to the last shard.
    pub fn shard_for(&self, worker: usize) -> usize {
        (worker / self.clients_per_server).min(self.num_shards - 1)
    }

    /// Listen port of `shard`.
    pub fn port_for(&self, shard: usize) -> u16 {
        let offset = u16::try_from(shard).unwrap_or(u16::MAX);
        self.base_port.saturating_add(offset)
    }

    /// `host:port` endpoint for `worker`.
    pub fn endpoint(&self, worker: usize) -> String {
        format!("{}:{}", self.host, self.port_for(self.shard_for(worker)))
    }

    /// Resolve `identity` and log the assignment.
    pub fn route(&self, identity: WorkerIdentity) -> Route {
        let shard = self.shard_for(identity.index);
        let route = Route {
            identity,
            shard,
            endpoint: format!("{}:{}", self.host, self.port_for(shard)),
        };
        tracing::info!(
            worker = identity.index,
            is_worker = identity.is_worker,
            clients_per_server = self.clients_per_server,
            num_shards = self.num_shards,
            shard,
            endpoint = %route.endpoint,
            "Routed client to shard"
        );
        route
    }
}

/// Result of [`Router::route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub identity: WorkerIdentity,
    pub shard: usize,
    pub endpoint: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
