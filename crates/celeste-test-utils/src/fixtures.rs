//! Ready-made environments and shards.

use std::sync::Arc;
use std::thread::JoinHandle;

use celeste_bridge::{BridgeError, CelesteEnv, StubGame, StubLevel, StubStats, channel};
use celeste_core::config::{BridgeConfig, ServerConfig};
use celeste_core::schema::Schema;
use celeste_core::traits::Policy;
use celeste_gym::server::{PolicyServer, ServerHandle, ShardState};

/// A [`CelesteEnv`] fed by a [`StubGame`] on a background thread.
pub fn stub_env(
    schema: &Schema,
    level: StubLevel,
) -> (CelesteEnv, JoinHandle<Result<StubStats, BridgeError>>) {
    let config = BridgeConfig::default();
    let (game, link) = channel(schema.clone(), &config);
    let handle = StubGame::new(game, level).spawn();
    (CelesteEnv::new(link, schema.clone(), &config), handle)
}

/// A policy-server shard on an ephemeral loopback port.
///
/// # Panics
///
/// Panics if the loopback port cannot be bound.
pub fn spawn_shard(schema: &Schema, policy: Box<dyn Policy>) -> ServerHandle {
    let state = Arc::new(ShardState::new(
        "test-shard",
        schema.clone(),
        policy,
        &ServerConfig::default(),
        0,
    ));
    PolicyServer::bind("127.0.0.1:0", state)
        .and_then(PolicyServer::spawn)
        .expect("bind loopback shard")
}

/// A [`ServerConfig`] whose lock directory lives in a fresh temp dir.
///
/// Keep the returned guard alive for as long as the locks are needed.
///
/// # Panics
///
/// Panics if the temp dir cannot be created.
pub fn temp_server_config() -> (ServerConfig, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp lock dir");
    let config = ServerConfig {
        lock_dir: dir.path().to_path_buf(),
        lock_grace_ms: 0,
        ..ServerConfig::default()
    };
    (config, dir)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::types::Action;
    use celeste_policy::policies::NoopPolicy;

    use super::*;

    #[test]
    fn stub_env_resets_and_steps() {
        let schema = Schema::default();
        let (mut env, handle) = stub_env(&schema, StubLevel::default());
        env.reset().unwrap();
        assert!(!env.step(Action::noop(4)).unwrap().terminated);
        drop(env);
        assert_eq!(handle.join().unwrap().unwrap().ticks, 1);
    }

    #[test]
    fn shard_accepts_connections() {
        let shard = spawn_shard(&Schema::default(), Box::new(NoopPolicy::new(4)));
        assert!(std::net::TcpStream::connect(shard.addr()).is_ok());
        shard.shutdown();
    }

    #[test]
    fn temp_config_points_at_temp_dir() {
        let (config, dir) = temp_server_config();
        assert_eq!(config.lock_dir, dir.path());
    }
}
