//! Celeste RL bridge CLI.
//!
//! - `serve`: start policy-server shards on reserved ports
//! - `client`: run the episode loop against the stub level
//! - `route`: show which shard a worker directory maps to
//! - `replay`: play an action script into the stub level
//! - `info`: print crate versions and the schema's spaces

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use celeste_bridge::{ActionScript, CelesteEnv, StubGame, StubLevel, channel};
use celeste_client::{EpisodeLoop, Router, WorkerIdentity, logging};
use celeste_core::config::{CelesteConfig, InferenceMode};
use celeste_core::schema::SchemaVersion;
use celeste_core::traits::PolicySource;
use celeste_gym::{PolicyServer, RemotePolicyClient, ShardState};
use celeste_policy::PolicyKind;
use celeste_policy::local::LocalPolicySource;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Bridge between a live Celeste game loop and an RL policy server.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Observation schema revision (overrides the config file).
    #[arg(long, global = true)]
    schema: Option<SchemaVersion>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start policy-server shards.
    Serve {
        /// Number of shards (overrides `routing.num_server_shards`).
        #[arg(short = 'n', long)]
        shards: Option<usize>,

        /// Policy answering `get_action`.
        #[arg(short, long, default_value = "random")]
        policy: PolicyKind,

        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Seconds between shard statistics log lines.
        #[arg(long, default_value_t = 30)]
        stats_interval: u64,
    },

    /// Run the client episode loop against the stub level.
    Client {
        /// Game install directory (defaults to the working directory).
        #[arg(long)]
        worker_dir: Option<PathBuf>,

        /// Total client workers (overrides `routing.num_client_workers`).
        #[arg(long, env = "NUM_CLIENT_WORKERS")]
        num_workers: Option<usize>,

        /// Serve actions in-process with this policy instead of a shard.
        #[arg(long)]
        local: Option<PolicyKind>,

        /// Stop after this many episodes.
        #[arg(short = 'n', long)]
        episodes: Option<u64>,

        /// Run evaluation episodes (no training samples).
        #[arg(long)]
        no_training: bool,
    },

    /// Print the shard endpoint for a worker.
    Route {
        /// Worker install directory; defaults to the working directory.
        worker_dir: Option<PathBuf>,

        #[arg(long, env = "NUM_CLIENT_WORKERS")]
        num_workers: Option<usize>,
    },

    /// Play an action script (JSON array or chord lines) into the stub level.
    Replay { script: PathBuf },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<CelesteConfig> {
    let mut config = match &cli.config {
        Some(path) => CelesteConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CelesteConfig::default(),
    };
    if let Some(version) = cli.schema {
        config.schema.version = version;
    }
    Ok(config)
}

fn run_serve(
    mut config: CelesteConfig,
    shards: Option<usize>,
    policy: PolicyKind,
    seed: u64,
    stats_interval: u64,
) -> Result<()> {
    if let Some(n) = shards {
        config.routing.num_server_shards = n;
    }
    config.validate()?;

    let mut handles = Vec::new();
    for shard in 0..config.routing.num_server_shards {
        let shard_seed = seed.wrapping_add(shard as u64);
        let state = Arc::new(ShardState::new(
            format!("shard-{shard}"),
            config.schema.clone(),
            policy.build(&config.schema, shard_seed),
            &config.server,
            shard_seed,
        ));
        let server = PolicyServer::bind_reserved(
            &config.routing.host,
            config.routing.base_port,
            &config.server,
            state,
        )
        .with_context(|| format!("starting shard {shard}"))?;
        let handle = server.spawn()?;
        tracing::info!(
            shard,
            addr = %handle.addr(),
            policy = handle.state().policy_name(),
            schema = %config.schema.version,
            "Shard listening"
        );
        println!("shard {shard} listening on {}", handle.addr());
        handles.push(handle);
    }

    loop {
        std::thread::sleep(Duration::from_secs(stats_interval.max(1)));
        for handle in &handles {
            let stats = handle.state().stats();
            tracing::info!(
                shard = handle.state().name(),
                active = stats.active,
                completed = stats.completed,
                total_steps = stats.total_steps,
                queued_steps = stats.queued_steps,
                dropped = stats.dropped_trajectories,
                "Shard stats"
            );
        }
    }
}

fn run_client(
    mut config: CelesteConfig,
    worker_dir: Option<&Path>,
    num_workers: Option<usize>,
    local: Option<PolicyKind>,
    episodes: Option<u64>,
    no_training: bool,
) -> Result<()> {
    if let Some(n) = num_workers {
        config.routing.num_client_workers = n;
    }
    if let Some(kind) = local {
        config.client.inference_mode = InferenceMode::Local;
        tracing::info!(policy = ?kind, "Local inference");
    }
    if episodes.is_some() {
        config.client.max_episodes = episodes;
    }
    if no_training {
        config.client.training_enabled = false;
    }
    config.validate()?;

    let identity = worker_dir.map_or_else(WorkerIdentity::from_current_dir, WorkerIdentity::from_path);
    tracing::info!(%identity, "Client started");

    let source: Arc<dyn PolicySource> = match config.client.inference_mode {
        InferenceMode::Local => {
            let policy = local
                .unwrap_or_default()
                .build(&config.schema, identity.index as u64);
            Arc::new(LocalPolicySource::new(policy, identity.index as u64))
        }
        InferenceMode::Remote => {
            let route = Router::new(&config.routing).route(identity);
            Arc::new(
                RemotePolicyClient::connect_with_retry(
                    &route.endpoint,
                    &config.client.client_name,
                    config.schema.version,
                    10,
                    Duration::from_millis(500),
                )
                .with_context(|| format!("connecting to {}", route.endpoint))?,
            )
        }
    };

    let (game, link) = channel(config.schema.clone(), &config.bridge);
    let _game = StubGame::new(game, StubLevel::default()).spawn();
    let env = CelesteEnv::new(link, config.schema.clone(), &config.bridge);

    let mut episode_loop = EpisodeLoop::new(env, source, config.client);
    let summary = episode_loop.run()?;
    let forwarded = episode_loop.shutdown();
    println!(
        "episodes={} steps={} mean_reward={:.3} returns_forwarded={} stop={:?}",
        summary.episodes, summary.total_steps, summary.mean_reward, forwarded.forwarded, summary.reason
    );
    Ok(())
}

fn run_route(mut config: CelesteConfig, worker_dir: Option<&Path>, num_workers: Option<usize>) -> Result<()> {
    if let Some(n) = num_workers {
        config.routing.num_client_workers = n;
    }
    config.validate()?;
    let identity = worker_dir.map_or_else(WorkerIdentity::from_current_dir, WorkerIdentity::from_path);
    let router = Router::new(&config.routing);
    let route = router.route(identity);
    println!(
        "{identity}: clients_per_server={} shard={} endpoint={}",
        router.clients_per_server(),
        route.shard,
        route.endpoint
    );
    Ok(())
}

fn run_replay(config: &CelesteConfig, script: &Path) -> Result<()> {
    config.validate()?;
    let script = ActionScript::from_file(script, &config.schema)?;
    tracing::info!(actions = script.len(), "Replaying action script");
    let (game, link) = channel(config.schema.clone(), &config.bridge);
    let _game = StubGame::new(game, StubLevel::default()).spawn();
    let mut env = CelesteEnv::new(link, config.schema.clone(), &config.bridge);
    let summary = script.run(&mut env)?;
    println!(
        "steps={} episodes_finished={} total_reward={:.3}",
        summary.steps, summary.episodes_finished, summary.total_reward
    );
    Ok(())
}

fn run_info(config: &CelesteConfig) {
    let schema = &config.schema;
    println!("celeste v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    for name in [
        "celeste-core",
        "celeste-bridge",
        "celeste-policy",
        "celeste-gym",
        "celeste-client",
    ] {
        println!("  {name:<16} {}", env!("CARGO_PKG_VERSION"));
    }
    println!();
    println!("protocol: {}", celeste_gym::PROTOCOL_VERSION);
    println!(
        "schema: {} (vision {}x{}, entity max {})",
        schema.version,
        schema.version.vision_size(),
        schema.version.vision_size(),
        schema.version.entity_max()
    );
    println!("action space: {:?}", schema.action_space().nvec());
    println!("observation keys:");
    for (key, values) in schema.blank_observation().features() {
        println!("  {key:<20} {}", values.len());
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn run(cli: Cli, config: CelesteConfig) -> Result<()> {
    match cli.command {
        Commands::Serve {
            shards,
            policy,
            seed,
            stats_interval,
        } => run_serve(config, shards, policy, seed, stats_interval),
        Commands::Client {
            worker_dir,
            num_workers,
            local,
            episodes,
            no_training,
        } => run_client(
            config,
            worker_dir.as_deref(),
            num_workers,
            local,
            episodes,
            no_training,
        ),
        Commands::Route {
            worker_dir,
            num_workers,
        } => run_route(config, worker_dir.as_deref(), num_workers),
        Commands::Replay { script } => run_replay(&config, &script),
        Commands::Info => {
            run_info(&config);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    let log_path = config.logging.log_file().map(Path::to_path_buf);

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::log_fatal(log_path.as_deref(), e.as_ref(), Some(e.backtrace()));
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
