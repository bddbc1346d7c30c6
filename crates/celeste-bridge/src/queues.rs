//! The four FIFO queues between a live game loop and the step/reset adapter.
//!
//! [`channel`] returns the two ends. The game side holds a [`GameLink`]: it
//! is the only producer of observations, rewards and termination events and
//! the only consumer of actions. The adapter side holds an [`EnvLink`] with
//! the mirror-image roles. Queues are unbounded and each one is FIFO on its
//! own; there is no atomicity across queues, so a producer that skips one
//! queue for a tick shifts every later step by one item on that queue.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde::{Deserialize, Serialize};

use celeste_core::config::BridgeConfig;
use celeste_core::schema::{GameTick, Schema};
use celeste_core::termination::TerminationEvent;
use celeste_core::types::{Action, Observation};

use crate::error::BridgeError;

// ---------------------------------------------------------------------------
// QueueDepths
// ---------------------------------------------------------------------------

/// Snapshot of the number of items waiting in each queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub observations: usize,
    pub rewards: usize,
    pub terminations: usize,
    pub actions: usize,
}

impl QueueDepths {
    /// `true` when the three inbound queues hold the same number of items.
    pub const fn is_aligned(&self) -> bool {
        self.observations == self.rewards && self.rewards == self.terminations
    }
}

// ---------------------------------------------------------------------------
// channel
// ---------------------------------------------------------------------------

/// Create a bridge for `schema`, returning the game-side and adapter-side
/// ends.
pub fn channel(schema: Schema, config: &BridgeConfig) -> (GameLink, EnvLink) {
    let (obs_tx, obs_rx) = unbounded();
    let (reward_tx, reward_rx) = unbounded();
    let (term_tx, term_rx) = unbounded();
    let (action_tx, action_rx) = unbounded();

    let game = GameLink {
        schema,
        action_timeout: config.action_timeout(),
        obs_tx,
        reward_tx,
        term_tx,
        action_rx: action_rx.clone(),
    };
    let env = EnvLink {
        obs_rx,
        reward_rx,
        term_rx,
        action_tx,
        action_rx,
    };
    (game, env)
}

// ---------------------------------------------------------------------------
// GameLink
// ---------------------------------------------------------------------------

/// Game-side end of the bridge.
///
/// Cloneable so the game's observation callback and its input thread can
/// each hold one. The adapter sees [`BridgeError::Disconnected`] once every
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct GameLink {
    schema: Schema,
    action_timeout: Option<Duration>,
    obs_tx: Sender<Observation>,
    reward_tx: Sender<f32>,
    term_tx: Sender<TerminationEvent>,
    action_rx: Receiver<Action>,
}

impl GameLink {
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn push_observation(&self, obs: Observation) -> Result<(), BridgeError> {
        self.obs_tx
            .send(obs)
            .map_err(|_| BridgeError::disconnected("observation"))
    }

    pub fn push_reward(&self, reward: f32) -> Result<(), BridgeError> {
        self.reward_tx
            .send(reward)
            .map_err(|_| BridgeError::disconnected("reward"))
    }

    pub fn push_termination(&self, event: TerminationEvent) -> Result<(), BridgeError> {
        self.term_tx
            .send(event)
            .map_err(|_| BridgeError::disconnected("termination"))
    }

    /// Convert a raw tick through the schema and push its observation, then
    /// its termination event. Nothing is pushed if the tick is rejected.
    pub fn push_tick(&self, tick: &GameTick) -> Result<(), BridgeError> {
        let obs = self.schema.observe(tick)?;
        self.push_observation(obs)?;
        self.push_termination(tick.termination())
    }

    /// Block until the adapter enqueues the next action.
    pub fn pop_action(&self) -> Result<Action, BridgeError> {
        self.action_rx
            .recv()
            .map_err(|_| BridgeError::disconnected("action"))
    }

    /// Like [`pop_action`](Self::pop_action) but gives up after `timeout`.
    pub fn pop_action_timeout(&self, timeout: Duration) -> Result<Action, BridgeError> {
        match self.action_rx.recv_timeout(timeout) {
            Ok(action) => Ok(action),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::ActionTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::disconnected("action")),
        }
    }

    /// Drop every action still waiting, returning how many were discarded.
    pub fn flush_actions(&self) -> usize {
        let flushed = self.action_rx.try_iter().count();
        if flushed > 0 {
            tracing::warn!(flushed, "Flushed pending actions from the action queue");
        }
        flushed
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            observations: self.obs_tx.len(),
            rewards: self.reward_tx.len(),
            terminations: self.term_tx.len(),
            actions: self.action_rx.len(),
        }
    }

    // ---- game-interop surface ----

    /// Observation callback: one call per game tick.
    pub fn add_observation(&self, tick: &GameTick) -> Result<(), BridgeError> {
        self.push_tick(tick)
    }

    /// Reward callback: one call per game tick, after the observation.
    pub fn add_reward(&self, reward: f32) -> Result<(), BridgeError> {
        self.push_reward(reward)
    }

    /// Next action as plain integers, waiting at most the configured action
    /// timeout (forever when none is configured).
    pub fn next_action(&self) -> Result<Vec<i64>, BridgeError> {
        let action = match self.action_timeout {
            Some(timeout) => self.pop_action_timeout(timeout),
            None => self.pop_action(),
        };
        match action {
            Ok(action) => Ok(action.into_vec().into_iter().map(i64::from).collect()),
            Err(err) => {
                tracing::error!(error = %err, "Action retrieval failed");
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EnvLink
// ---------------------------------------------------------------------------

/// Adapter-side end of the bridge. Owned by [`CelesteEnv`](crate::env::CelesteEnv).
#[derive(Debug)]
pub struct EnvLink {
    obs_rx: Receiver<Observation>,
    reward_rx: Receiver<f32>,
    term_rx: Receiver<TerminationEvent>,
    action_tx: Sender<Action>,
    // Only used for depth snapshots.
    action_rx: Receiver<Action>,
}

impl EnvLink {
    /// Enqueue a decided action for the game.
    pub fn add_action(&self, action: Action) -> Result<(), BridgeError> {
        self.action_tx
            .send(action)
            .map_err(|_| BridgeError::disconnected("action"))
    }

    pub fn get_observation(&self) -> Result<Observation, BridgeError> {
        self.obs_rx
            .recv()
            .map_err(|_| BridgeError::disconnected("observation"))
    }

    pub fn get_termination(&self) -> Result<TerminationEvent, BridgeError> {
        self.term_rx
            .recv()
            .map_err(|_| BridgeError::disconnected("termination"))
    }

    /// Wait up to `timeout` for the next reward, substituting 0.0 when none
    /// arrives in time.
    pub fn get_reward(&self, timeout: Duration) -> Result<f32, BridgeError> {
        match self.reward_rx.recv_timeout(timeout) {
            Ok(reward) => Ok(reward),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    queue_size = self.reward_rx.len(),
                    "Reward queue empty after {timeout:?}, returning 0.0 reward"
                );
                Ok(0.0)
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::disconnected("reward")),
        }
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            observations: self.obs_rx.len(),
            rewards: self.reward_rx.len(),
            terminations: self.term_rx.len(),
            actions: self.action_rx.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn link() -> (GameLink, EnvLink) {
        channel(Schema::default(), &BridgeConfig::default())
    }

    #[test]
    fn push_tick_enqueues_observation_and_termination() {
        let (game, env) = link();
        let mut tick = GameTick::blank(20);
        tick.death_flag = true;
        game.push_tick(&tick).unwrap();

        let depths = env.queue_depths();
        assert_eq!(depths.observations, 1);
        assert_eq!(depths.terminations, 1);
        assert_eq!(depths.rewards, 0);

        env.get_observation().unwrap();
        assert_eq!(env.get_termination().unwrap(), TerminationEvent::Death);
    }

    #[test]
    fn rejected_tick_pushes_nothing() {
        let (game, env) = link();
        let err = game.push_tick(&GameTick::blank(7)).unwrap_err();
        assert!(matches!(err, BridgeError::Schema(_)));
        assert_eq!(env.queue_depths(), QueueDepths::default());
    }

    #[test]
    fn queues_stay_aligned_over_many_ticks() {
        let (game, env) = link();
        for i in 0..50_u8 {
            game.add_observation(&GameTick::blank(20)).unwrap();
            game.add_reward(f32::from(i)).unwrap();
        }
        assert!(env.queue_depths().is_aligned());
        for i in 0..50_u8 {
            env.get_observation().unwrap();
            let reward = env.get_reward(Duration::from_millis(10)).unwrap();
            assert!((reward - f32::from(i)).abs() < f32::EPSILON);
            env.get_termination().unwrap();
        }
        assert_eq!(game.queue_depths(), QueueDepths::default());
    }

    #[test]
    fn reward_timeout_returns_zero_within_bound() {
        let (_game, env) = link();
        let start = Instant::now();
        let reward = env.get_reward(Duration::from_millis(50)).unwrap();
        let elapsed = start.elapsed();
        assert!(reward.abs() < f32::EPSILON);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn actions_flow_to_game_in_order() {
        let (game, env) = link();
        env.add_action(Action::new(vec![1, 0, 0, 0])).unwrap();
        env.add_action(Action::new(vec![2, 0, 0, 0])).unwrap();
        assert_eq!(game.queue_depths().actions, 2);
        assert_eq!(game.pop_action().unwrap().axis(0), 1);
        assert_eq!(game.next_action().unwrap(), vec![2, 0, 0, 0]);
    }

    #[test]
    fn pop_action_timeout_reports_timeout() {
        let (game, _env) = link();
        let err = game.pop_action_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, BridgeError::ActionTimeout(Duration::from_millis(20)));
    }

    #[test]
    fn flush_discards_pending_actions() {
        let (game, env) = link();
        for _ in 0..3 {
            env.add_action(Action::noop(4)).unwrap();
        }
        assert_eq!(game.flush_actions(), 3);
        assert_eq!(game.flush_actions(), 0);
    }

    #[test]
    fn dropped_game_side_disconnects_consumer() {
        let (game, env) = link();
        let other = game.clone();
        drop(game);
        other.add_observation(&GameTick::blank(20)).unwrap();
        drop(other);

        // Items already queued are still delivered.
        env.get_observation().unwrap();
        assert_eq!(
            env.get_observation().unwrap_err(),
            BridgeError::disconnected("observation")
        );
        assert!(env.get_reward(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn dropped_env_side_disconnects_producer() {
        let (game, env) = link();
        drop(env);
        assert!(matches!(
            game.push_reward(1.0),
            Err(BridgeError::Disconnected { queue: "reward" })
        ));
    }

    #[test]
    fn blocking_observation_wakes_on_push() {
        let (game, env) = link();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            game.add_observation(&GameTick::blank(20)).unwrap();
        });
        env.get_observation().unwrap();
        producer.join().unwrap();
    }
}
