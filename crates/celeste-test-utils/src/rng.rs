//! Deterministic randomness for reproducible tests.

use celeste_core::schema::{GameTick, Schema};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a deterministic `ChaCha8Rng` from a seed.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// A game tick with random but valid contents for `schema`.
///
/// Continuous fields may fall outside the schema's ranges so that clamping
/// is exercised; vision cells always stay within the entity bound. Death and
/// level-finish flags are left clear.
pub fn random_tick(schema: &Schema, seed: u64) -> GameTick {
    let mut rng = seeded_rng(seed);
    let size = schema.version.vision_size();
    let max = i64::from(schema.version.entity_max());
    let mut tick = GameTick::blank(size);
    for row in &mut tick.vision {
        for cell in row.iter_mut() {
            *cell = rng.gen_range(0..=max);
        }
    }
    let mut pair = |bound: f32| [rng.gen_range(-bound..bound), rng.gen_range(-bound..bound)];
    tick.speed_x_y = pair(1500.0);
    tick.position = pair(12_000.0);
    tick.screen_position = pair(500.0);
    tick.target = pair(500.0);
    tick.stamina = rng.gen_range(-1.5..1.5);
    tick.can_dash = rng.r#gen();
    tick.is_climbing = rng.r#gen();
    tick.on_ground = rng.r#gen();
    tick
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
