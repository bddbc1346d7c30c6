//! Gymnasium-style `step`/`reset` over the queue bridge.
//!
//! [`CelesteEnv`] turns the externally clocked game loop into a blocking
//! environment: `reset` waits for the next observation, `step` enqueues an
//! action and then waits for one observation, one reward (bounded) and one
//! termination event, in that order.

use std::time::Duration;

use celeste_core::config::BridgeConfig;
use celeste_core::schema::Schema;
use celeste_core::types::{
    Action, ActionSpace, ObservationSpace, ResetInfo, ResetResult, StepResult,
};

use crate::error::BridgeError;
use crate::queues::{EnvLink, QueueDepths};

// ---------------------------------------------------------------------------
// CelesteEnv
// ---------------------------------------------------------------------------

/// Blocking environment adapter over an [`EnvLink`].
#[derive(Debug)]
pub struct CelesteEnv {
    link: EnvLink,
    schema: Schema,
    obs_space: ObservationSpace,
    act_space: ActionSpace,
    reward_timeout: Duration,
    steps: u64,
}

impl CelesteEnv {
    #[must_use]
    pub fn new(link: EnvLink, schema: Schema, config: &BridgeConfig) -> Self {
        Self {
            obs_space: schema.observation_space(),
            act_space: schema.action_space(),
            link,
            schema,
            reward_timeout: config.reward_timeout(),
            steps: 0,
        }
    }

    /// Observation space descriptor.
    #[must_use]
    pub const fn observation_space(&self) -> &ObservationSpace {
        &self.obs_space
    }

    /// Action space descriptor.
    #[must_use]
    pub const fn action_space(&self) -> &ActionSpace {
        &self.act_space
    }

    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Steps taken since construction.
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.link.queue_depths()
    }

    /// Wait for the next observation from the game.
    pub fn reset(&mut self) -> Result<ResetResult, BridgeError> {
        let observation = self.link.get_observation()?;
        Ok(ResetResult {
            observation,
            info: ResetInfo::default(),
        })
    }

    /// Take one step with the given action.
    ///
    /// An action with fewer axes than the action space is padded with NOOP
    /// axes (and logged); any other mismatch is rejected before it reaches
    /// the queue.
    pub fn step(&mut self, action: Action) -> Result<StepResult, BridgeError> {
        let action = self.prepare(action)?;
        self.link.add_action(action)?;

        let observation = self.link.get_observation()?;
        let reward = self.link.get_reward(self.reward_timeout)?;
        let event = self.link.get_termination()?;
        self.steps += 1;

        Ok(StepResult {
            observation,
            reward,
            terminated: event.is_terminal(),
            truncated: false,
            info: event.info(),
        })
    }

    fn prepare(&self, action: Action) -> Result<Action, BridgeError> {
        let expected = self.act_space.len();
        let action = if action.len() < expected {
            tracing::error!(
                got = action.len(),
                expected,
                "Short action {:?}, padding with NOOP",
                action.as_slice()
            );
            action.padded(expected)
        } else {
            action
        };
        self.act_space.validate(&action)?;
        Ok(action)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::error::ValidationError;
    use celeste_core::schema::{GameTick, SchemaVersion};

    use super::*;
    use crate::queues::{GameLink, channel};

    fn env_pair(version: SchemaVersion) -> (GameLink, CelesteEnv) {
        let schema = Schema::new(version);
        let config = BridgeConfig {
            reward_timeout_ms: 20,
            ..BridgeConfig::default()
        };
        let (game, link) = channel(schema.clone(), &config);
        (game, CelesteEnv::new(link, schema, &config))
    }

    fn tick(death: bool, finished: bool) -> GameTick {
        let mut tick = GameTick::blank(20);
        tick.death_flag = death;
        tick.finished_level = finished;
        tick
    }

    #[test]
    fn reset_returns_queued_observation() {
        let (game, mut env) = env_pair(SchemaVersion::V2);
        game.add_observation(&tick(false, false)).unwrap();
        let reset = env.reset().unwrap();
        assert!(env.observation_space().contains(&reset.observation));
        assert_eq!(reset.info, ResetInfo::default());
    }

    #[test]
    fn step_maps_termination_events() {
        let cases = [
            ((false, false), false),
            ((true, false), true),
            ((false, true), true),
            ((true, true), true),
        ];
        for ((death, finished), terminated) in cases {
            let (game, mut env) = env_pair(SchemaVersion::V2);
            game.add_observation(&tick(death, finished)).unwrap();
            game.add_reward(2.5).unwrap();

            let result = env.step(Action::noop(4)).unwrap();
            assert_eq!(result.terminated, terminated);
            assert!(!result.truncated);
            assert_eq!(result.info.died, death);
            assert_eq!(result.info.finished_level, finished && !death);
            assert!((result.reward - 2.5).abs() < f32::EPSILON);
            assert!(game.pop_action().unwrap().is_noop());
        }
    }

    #[test]
    fn step_substitutes_zero_reward_on_timeout() {
        let (game, mut env) = env_pair(SchemaVersion::V2);
        game.add_observation(&tick(false, false)).unwrap();
        let result = env.step(Action::noop(4)).unwrap();
        assert!(result.reward.abs() < f32::EPSILON);
        assert_eq!(env.steps(), 1);
    }

    #[test]
    fn short_action_is_padded() {
        let (game, mut env) = env_pair(SchemaVersion::V3);
        let mut raw = GameTick::blank(40);
        raw.on_ground = false;
        game.add_observation(&raw).unwrap();
        game.add_reward(0.0).unwrap();
        env.step(Action::new(vec![1, 2])).unwrap();
        assert_eq!(game.pop_action().unwrap().as_slice(), &[1, 2, 0, 0, 0]);
    }

    #[test]
    fn out_of_range_action_rejected_before_queue() {
        let (game, mut env) = env_pair(SchemaVersion::V1);
        let err = env.step(Action::new(vec![0, 0, 3, 0])).unwrap_err();
        assert_eq!(
            err,
            BridgeError::Validation(ValidationError::ActionOutOfRange {
                axis: 2,
                value: 3,
                max: 3
            })
        );
        let long = env.step(Action::new(vec![0, 0, 0, 0, 0])).unwrap_err();
        assert!(matches!(long, BridgeError::Validation(_)));
        assert_eq!(game.queue_depths().actions, 0);
    }

    #[test]
    fn spaces_follow_schema() {
        let (_game, env) = env_pair(SchemaVersion::V3);
        assert_eq!(env.action_space().nvec(), &[3, 3, 4, 2, 4]);
        assert_eq!(env.schema().version, SchemaVersion::V3);
    }

    #[test]
    fn step_fails_when_game_is_gone() {
        let (game, mut env) = env_pair(SchemaVersion::V2);
        drop(game);
        assert!(matches!(
            env.step(Action::noop(4)),
            Err(BridgeError::Disconnected { .. })
        ));
    }
}
