use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::Schema;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_reward_timeout_ms() -> u64 {
    500
}
const fn default_action_timeout_ms() -> Option<u64> {
    Some(5000)
}
const fn default_num_client_workers() -> usize {
    4
}
const fn default_num_server_shards() -> usize {
    4
}
const fn default_base_port() -> u16 {
    9900
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("celeste-port-locks")
}
const fn default_lock_grace_ms() -> u64 {
    5000
}
const fn default_max_port_attempts() -> u16 {
    100
}
const fn default_max_sample_queue_size() -> usize {
    1_000_000
}
const fn default_true() -> bool {
    true
}
const fn default_flush_timeout_ms() -> u64 {
    1000
}
fn default_client_name() -> String {
    "celeste-client".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_path() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_LOG_FILE))
}

/// Log file written in the working directory unless configured otherwise.
pub const DEFAULT_LOG_FILE: &str = "celeste_logs.txt";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

/// Timeouts of the queue bridge between the game and the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bounded wait for a step's reward before substituting 0.0.
    #[serde(default = "default_reward_timeout_ms")]
    pub reward_timeout_ms: u64,

    /// Bound on the game side's wait for the next action. `None` blocks.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reward_timeout_ms: default_reward_timeout_ms(),
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    pub const fn reward_timeout(&self) -> Duration {
        Duration::from_millis(self.reward_timeout_ms)
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// RoutingConfig
// ---------------------------------------------------------------------------

/// Worker-to-shard topology: `num_client_workers` game processes spread
/// over `num_server_shards` server ports starting at `base_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_num_client_workers")]
    pub num_client_workers: usize,

    #[serde(default = "default_num_server_shards")]
    pub num_server_shards: usize,

    #[serde(default = "default_base_port")]
    pub base_port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            num_client_workers: default_num_client_workers(),
            num_server_shards: default_num_server_shards(),
            base_port: default_base_port(),
            host: default_host(),
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_client_workers == 0 {
            return Err(ConfigError::invalid("routing.num_client_workers", "must be >= 1"));
        }
        if self.num_server_shards == 0 {
            return Err(ConfigError::invalid("routing.num_server_shards", "must be >= 1"));
        }
        let last = usize::from(self.base_port) + self.num_server_shards - 1;
        if last > usize::from(u16::MAX) {
            return Err(ConfigError::invalid(
                "routing.base_port",
                format!("shard ports run past 65535 (last would be {last})"),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::invalid("routing.host", "must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Policy-server shard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding one lock subdirectory per reserved port.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// How long a port lock is held after the listener is bound.
    #[serde(default = "default_lock_grace_ms")]
    pub lock_grace_ms: u64,

    /// Ports tried above the starting port before giving up.
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,

    /// Steps kept in the sample queue before the oldest trajectories are
    /// dropped.
    #[serde(default = "default_max_sample_queue_size")]
    pub max_sample_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            lock_grace_ms: default_lock_grace_ms(),
            max_port_attempts: default_max_port_attempts(),
            max_sample_queue_size: default_max_sample_queue_size(),
        }
    }
}

impl ServerConfig {
    pub const fn lock_grace(&self) -> Duration {
        Duration::from_millis(self.lock_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Where actions are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Every action is a round trip to the policy server.
    #[default]
    Remote,
    /// Actions come from an in-process policy.
    Local,
}

/// Client episode-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_true")]
    pub training_enabled: bool,

    #[serde(default)]
    pub inference_mode: InferenceMode,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Bounded wait for the reward forwarder to drain before `end_episode`.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Stop after this many completed episodes. Runs forever when unset.
    #[serde(default)]
    pub max_episodes: Option<u64>,

    /// Stop once the mean episode reward reaches this value.
    #[serde(default)]
    pub stop_reward: Option<f32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            training_enabled: true,
            inference_mode: InferenceMode::default(),
            client_name: default_client_name(),
            flush_timeout_ms: default_flush_timeout_ms(),
            max_episodes: None,
            stop_reward: None,
        }
    }
}

impl ClientConfig {
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file, truncated at start. An empty path sends logs to stderr.
    #[serde(default = "default_log_path")]
    pub path: Option<PathBuf>,

    /// Default level filter; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// The file to log to, or `None` for stderr.
    pub fn log_file(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

// ---------------------------------------------------------------------------
// CelesteConfig
// ---------------------------------------------------------------------------

/// Complete configuration loaded from TOML. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CelesteConfig {
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CelesteConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schema.validate()?;
        self.routing.validate()?;
        if self.bridge.reward_timeout_ms == 0 {
            return Err(ConfigError::invalid("bridge.reward_timeout_ms", "must be > 0"));
        }
        if self.bridge.action_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "bridge.action_timeout_ms",
                "must be > 0 (omit it to block)",
            ));
        }
        if self.server.max_port_attempts == 0 {
            return Err(ConfigError::invalid("server.max_port_attempts", "must be >= 1"));
        }
        if self.server.max_sample_queue_size == 0 {
            return Err(ConfigError::invalid("server.max_sample_queue_size", "must be >= 1"));
        }
        if self.client.max_episodes == Some(0) {
            return Err(ConfigError::invalid("client.max_episodes", "must be >= 1"));
        }
        if self.client.stop_reward.is_some_and(|r| !r.is_finite()) {
            return Err(ConfigError::invalid("client.stop_reward", "must be finite"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, LOG_LEVELS.join(", ")),
            ));
        }
        Ok(())
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaVersion;

    // ---- defaults ----

    #[test]
    fn default_values() {
        let cfg = CelesteConfig::default();
        assert_eq!(cfg.schema.version, SchemaVersion::V2);
        assert_eq!(cfg.bridge.reward_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.bridge.action_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(cfg.routing.num_client_workers, 4);
        assert_eq!(cfg.routing.num_server_shards, 4);
        assert_eq!(cfg.routing.base_port, 9900);
        assert_eq!(cfg.routing.host, "127.0.0.1");
        assert_eq!(cfg.server.max_port_attempts, 100);
        assert_eq!(cfg.server.lock_grace(), Duration::from_secs(5));
        assert_eq!(cfg.server.max_sample_queue_size, 1_000_000);
        assert!(cfg.client.training_enabled);
        assert_eq!(cfg.client.inference_mode, InferenceMode::Remote);
        assert!(cfg.client.max_episodes.is_none());
        assert_eq!(cfg.logging.log_file(), Some(Path::new(DEFAULT_LOG_FILE)));
    }

    #[test]
    fn empty_log_path_means_stderr() {
        let cfg = CelesteConfig::from_toml("[logging]\npath = \"\"\n").unwrap();
        assert_eq!(cfg.logging.log_file(), None);
        let cfg = CelesteConfig::from_toml("[logging]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(cfg.logging.log_file(), Some(Path::new(DEFAULT_LOG_FILE)));
    }

    #[test]
    fn default_validates() {
        assert!(CelesteConfig::default().validate().is_ok());
    }

    // ---- validate ----

    #[test]
    fn zero_shards_rejected() {
        let cfg = CelesteConfig {
            routing: RoutingConfig {
                num_server_shards: 0,
                ..RoutingConfig::default()
            },
            ..CelesteConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("num_server_shards"));
    }

    #[test]
    fn ports_past_u16_rejected() {
        let routing = RoutingConfig {
            base_port: 65_534,
            num_server_shards: 4,
            ..RoutingConfig::default()
        };
        assert!(routing.validate().is_err());
    }

    #[test]
    fn zero_reward_timeout_rejected() {
        let mut cfg = CelesteConfig::default();
        cfg.bridge.reward_timeout_ms = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_log_level_rejected() {
        let mut cfg = CelesteConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
        cfg.logging.level = "DEBUG".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_finite_stop_reward_rejected() {
        let mut cfg = CelesteConfig::default();
        cfg.client.stop_reward = Some(f32::NAN);
        assert!(cfg.validate().is_err());
    }

    // ---- TOML ----

    #[test]
    fn toml_partial_sections_use_defaults() {
        let cfg = CelesteConfig::from_toml(
            r#"
            [schema]
            version = "v3"
            delay_buckets = 6

            [routing]
            num_client_workers = 8

            [client]
            inference_mode = "local"
            max_episodes = 3
        "#,
        )
        .unwrap();
        assert_eq!(cfg.schema.version, SchemaVersion::V3);
        assert_eq!(cfg.schema.action_space().nvec(), &[3, 3, 4, 2, 6]);
        assert_eq!(cfg.routing.num_client_workers, 8);
        assert_eq!(cfg.routing.num_server_shards, 4);
        assert_eq!(cfg.client.inference_mode, InferenceMode::Local);
        assert_eq!(cfg.client.max_episodes, Some(3));
        assert_eq!(cfg.bridge.reward_timeout_ms, 500);
    }

    #[test]
    fn toml_empty_document_is_default() {
        let cfg = CelesteConfig::from_toml("").unwrap();
        assert_eq!(cfg, CelesteConfig::default());
    }

    #[test]
    fn toml_unknown_schema_version_fails() {
        let result = CelesteConfig::from_toml("[schema]\nversion = \"v7\"\n");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    // ---- from_file ----

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("celeste.toml");
        std::fs::write(
            &path,
            r#"
            [bridge]
            reward_timeout_ms = 250

            [server]
            lock_grace_ms = 10
            lock_dir = "locks"

            [logging]
            path = "client.log"
            level = "debug"
        "#,
        )
        .unwrap();

        let cfg = CelesteConfig::from_file(&path).unwrap();
        assert_eq!(cfg.bridge.reward_timeout_ms, 250);
        assert_eq!(cfg.server.lock_grace_ms, 10);
        assert_eq!(cfg.server.lock_dir, PathBuf::from("locks"));
        assert_eq!(cfg.logging.path, Some(PathBuf::from("client.log")));
    }

    #[test]
    fn from_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server]\nmax_port_attempts = 0\n").unwrap();
        assert!(CelesteConfig::from_file(&path).is_err());
    }

    #[test]
    fn from_file_not_found() {
        let result = CelesteConfig::from_file("/nonexistent/path/celeste.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
