//! Deterministic stand-in for the game process.
//!
//! [`StubGame`] drives a [`GameLink`] the way the real game does: one
//! observation up front, then for every action one tick (observation,
//! reward, termination). The player walks on a flat strip; reaching
//! `target_x` finishes the level and falling `pit_depth` below the start
//! kills it. After a terminal tick the stub respawns and pushes a lone
//! observation for the adapter's `reset`.

use std::thread::{self, JoinHandle};

use celeste_core::controls::Controls;
use celeste_core::schema::GameTick;
use celeste_core::types::Action;

use crate::error::BridgeError;
use crate::queues::GameLink;

/// Layout and rewards of the stub level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StubLevel {
    /// Distance moved per axis step.
    pub step: f32,
    /// Horizontal position that finishes the level.
    pub target_x: f32,
    /// Downward distance that kills the player.
    pub pit_depth: f32,
    pub finish_bonus: f32,
    pub death_penalty: f32,
    /// Stop after this many ticks. `None` runs until the adapter goes away.
    pub max_ticks: Option<u64>,
}

impl Default for StubLevel {
    fn default() -> Self {
        Self {
            step: 8.0,
            target_x: 64.0,
            pit_depth: 24.0,
            finish_bonus: 10.0,
            death_penalty: -5.0,
            max_ticks: None,
        }
    }
}

/// Counters reported when the stub stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubStats {
    pub ticks: u64,
    pub deaths: u64,
    pub finishes: u64,
    pub invalid_actions: u64,
}

/// Stub game producer.
#[derive(Debug)]
pub struct StubGame {
    link: GameLink,
    level: StubLevel,
    position: [f32; 2],
    speed: [f32; 2],
    can_dash: bool,
    stats: StubStats,
}

impl StubGame {
    pub fn new(link: GameLink, level: StubLevel) -> Self {
        Self {
            link,
            level,
            position: [0.0; 2],
            speed: [0.0; 2],
            can_dash: true,
            stats: StubStats::default(),
        }
    }

    /// Run on a background thread.
    pub fn spawn(self) -> JoinHandle<Result<StubStats, BridgeError>> {
        thread::spawn(move || self.run())
    }

    /// Serve actions until the adapter drops its end or `max_ticks` is hit.
    pub fn run(mut self) -> Result<StubStats, BridgeError> {
        self.link.push_observation(self.link.schema().observe(&self.tick())?)?;
        loop {
            if self.level.max_ticks.is_some_and(|max| self.stats.ticks >= max) {
                break;
            }
            let action = match self.link.pop_action() {
                Ok(action) => action,
                Err(BridgeError::Disconnected { .. }) => break,
                Err(err) => return Err(err),
            };
            self.advance(&action)?;
        }
        tracing::debug!(stats = ?self.stats, "Stub game stopped");
        Ok(self.stats)
    }

    fn advance(&mut self, action: &Action) -> Result<(), BridgeError> {
        let controls = Controls::decode(action, self.link.schema()).unwrap_or_else(|err| {
            tracing::warn!(%err, "Stub game treating invalid action as NOOP");
            self.stats.invalid_actions += 1;
            Controls::default()
        });

        let mut stride = self.level.step;
        if controls.dash() && self.can_dash {
            stride *= 2.0;
            self.can_dash = false;
        }
        let dx = f32::from(controls.move_x()) * stride;
        let dy = f32::from(controls.move_y()) * stride;
        self.position[0] += dx;
        self.position[1] += dy;
        self.speed = [dx, dy];
        self.stats.ticks += 1;

        let mut tick = self.tick();
        tick.death_flag = self.position[1] >= self.level.pit_depth;
        tick.finished_level = self.position[0] >= self.level.target_x;

        let mut reward = dx / self.level.step;
        if tick.death_flag {
            reward += self.level.death_penalty;
        } else if tick.finished_level {
            reward += self.level.finish_bonus;
        }

        self.link.push_tick(&tick)?;
        self.link.push_reward(reward)?;

        if tick.termination().is_terminal() {
            if tick.death_flag {
                self.stats.deaths += 1;
            } else {
                self.stats.finishes += 1;
            }
            self.respawn();
            self.link.push_observation(self.link.schema().observe(&self.tick())?)?;
        }
        Ok(())
    }

    fn respawn(&mut self) {
        self.position = [0.0; 2];
        self.speed = [0.0; 2];
        self.can_dash = true;
    }

    fn tick(&self) -> GameTick {
        let size = self.link.schema().version.vision_size();
        let mut tick = GameTick::blank(size);
        // Solid floor along the bottom row.
        if let Some(floor) = tick.vision.last_mut() {
            floor.fill(1);
        }
        tick.position = self.position;
        tick.screen_position = self.position;
        tick.speed_x_y = self.speed;
        tick.can_dash = self.can_dash;
        tick.on_ground = self.position[1] <= 0.0;
        tick.target = [self.level.target_x, 0.0];
        tick
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::config::BridgeConfig;
    use celeste_core::schema::{Schema, SchemaVersion};

    use super::*;
    use crate::env::CelesteEnv;
    use crate::queues::channel;

    fn setup(level: StubLevel) -> (CelesteEnv, JoinHandle<Result<StubStats, BridgeError>>) {
        let schema = Schema::new(SchemaVersion::V2);
        let config = BridgeConfig::default();
        let (game, link) = channel(schema.clone(), &config);
        let handle = StubGame::new(game, level).spawn();
        (CelesteEnv::new(link, schema, &config), handle)
    }

    #[test]
    fn noop_is_idempotent() {
        let (mut env, handle) = setup(StubLevel::default());
        let first = env.reset().unwrap().observation;
        for _ in 0..10 {
            let result = env.step(Action::noop(4)).unwrap();
            assert_eq!(result.observation, first);
            assert!(!result.terminated);
            assert!(result.reward.abs() < f32::EPSILON);
        }
        drop(env);
        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.ticks, 10);
    }

    #[test]
    fn walking_right_finishes_level() {
        let (mut env, handle) = setup(StubLevel::default());
        env.reset().unwrap();
        let right = Action::new(vec![0, 2, 0, 0]);
        let mut total = 0.0;
        let mut steps = 0;
        loop {
            let result = env.step(right.clone()).unwrap();
            total += result.reward;
            steps += 1;
            if result.terminated {
                assert!(result.info.finished_level);
                break;
            }
        }
        assert_eq!(steps, 8);
        assert!((total - 18.0).abs() < 1e-4);

        // Respawn observation is waiting for reset.
        let obs = env.reset().unwrap().observation;
        assert_eq!(obs.position(), Some([0.0, 0.0]));
        drop(env);
        assert_eq!(handle.join().unwrap().unwrap().finishes, 1);
    }

    #[test]
    fn falling_into_pit_dies() {
        let (mut env, handle) = setup(StubLevel::default());
        env.reset().unwrap();
        let down = Action::new(vec![2, 0, 0, 0]);
        let results: Vec<_> = (0..3).map(|_| env.step(down.clone()).unwrap()).collect();
        assert!(!results[1].terminated);
        assert!(results[2].terminated);
        assert!(results[2].info.died);
        drop(env);
        assert_eq!(handle.join().unwrap().unwrap().deaths, 1);
    }

    #[test]
    fn max_ticks_stops_producer() {
        let level = StubLevel {
            max_ticks: Some(2),
            ..StubLevel::default()
        };
        let (mut env, handle) = setup(level);
        env.reset().unwrap();
        env.step(Action::noop(4)).unwrap();
        env.step(Action::noop(4)).unwrap();
        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.ticks, 2);
        assert!(matches!(
            env.step(Action::noop(4)),
            Err(BridgeError::Disconnected { .. })
        ));
    }
}
