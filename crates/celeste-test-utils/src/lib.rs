//! Shared test fixtures for the Celeste RL bridge crates.
//!
//! Deterministic RNG and random game ticks, a recording policy source, and
//! ready-made stub environments and loopback policy-server shards.

pub mod fixtures;
pub mod mocks;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{spawn_shard, stub_env, temp_server_config};
pub use mocks::{RecordingSource, SourceCall};
pub use rng::{random_tick, seeded_rng};
