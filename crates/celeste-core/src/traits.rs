use std::sync::Arc;

use crate::error::PolicyCallError;
use crate::types::{Action, EpisodeId, Observation, StepInfo};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A policy that maps observations to actions.
pub trait Policy: Send + Sync + 'static {
    /// Given an observation, produce an action.
    fn get_action(&self, obs: &Observation) -> Action;

    /// Human-readable name for this policy.
    fn name(&self) -> &str;

    /// Whether this policy is deterministic (no randomness).
    fn is_deterministic(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// PolicySource
// ---------------------------------------------------------------------------

/// Episode-scoped source of actions and sink of returns.
///
/// Implemented by the remote policy client and by the in-process source.
/// Methods take `&self` so one source can be shared between the episode
/// loop and the reward-forwarding thread.
pub trait PolicySource: Send + Sync {
    /// Open a new episode and return its id.
    fn start_episode(&self, training_enabled: bool) -> Result<EpisodeId, PolicyCallError>;

    /// Compute the action for `obs` within `episode`.
    fn get_action(&self, episode: &EpisodeId, obs: &Observation)
    -> Result<Action, PolicyCallError>;

    /// Record the reward obtained by the last action of `episode`.
    fn log_returns(
        &self,
        episode: &EpisodeId,
        reward: f32,
        info: StepInfo,
    ) -> Result<(), PolicyCallError>;

    /// Retire `episode`, passing its final observation.
    fn end_episode(&self, episode: &EpisodeId, obs: &Observation) -> Result<(), PolicyCallError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<T: PolicySource + ?Sized> PolicySource for Arc<T> {
    fn start_episode(&self, training_enabled: bool) -> Result<EpisodeId, PolicyCallError> {
        (**self).start_episode(training_enabled)
    }

    fn get_action(
        &self,
        episode: &EpisodeId,
        obs: &Observation,
    ) -> Result<Action, PolicyCallError> {
        (**self).get_action(episode, obs)
    }

    fn log_returns(
        &self,
        episode: &EpisodeId,
        reward: f32,
        info: StepInfo,
    ) -> Result<(), PolicyCallError> {
        (**self).log_returns(episode, reward, info)
    }

    fn end_episode(&self, episode: &EpisodeId, obs: &Observation) -> Result<(), PolicyCallError> {
        (**self).end_episode(episode, obs)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
