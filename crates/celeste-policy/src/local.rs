//! In-process [`PolicySource`] for local inference.
//!
//! [`LocalPolicySource`] answers `get_action` from a boxed [`Policy`] and
//! keeps per-episode bookkeeping itself, so a client can run without a
//! policy server.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use celeste_core::error::PolicyCallError;
use celeste_core::traits::{Policy, PolicySource};
use celeste_core::types::{Action, EpisodeId, Observation, StepInfo};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, Default)]
struct EpisodeEntry {
    training_enabled: bool,
    steps: u64,
    total_reward: f32,
}

/// Summary of an episode retired by [`LocalPolicySource::end_episode`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedEpisode {
    pub id: EpisodeId,
    pub steps: u64,
    pub total_reward: f32,
    pub training_enabled: bool,
}

#[derive(Default)]
struct State {
    active: HashMap<EpisodeId, EpisodeEntry>,
    completed: Vec<CompletedEpisode>,
}

/// Policy source backed by an in-process [`Policy`].
pub struct LocalPolicySource {
    policy: Box<dyn Policy>,
    rng: Mutex<ChaCha8Rng>,
    state: Mutex<State>,
}

impl LocalPolicySource {
    /// `seed` drives episode id generation.
    pub fn new(policy: Box<dyn Policy>, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            state: Mutex::new(State::default()),
        }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Number of episodes started but not yet ended.
    pub fn active_episodes(&self) -> usize {
        self.state().active.len()
    }

    /// Episodes retired so far, oldest first.
    pub fn completed(&self) -> Vec<CompletedEpisode> {
        self.state().completed.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unknown(call: &'static str, episode: &EpisodeId) -> PolicyCallError {
        PolicyCallError::fatal(call, format!("unknown episode {episode}"))
    }
}

impl PolicySource for LocalPolicySource {
    fn start_episode(&self, training_enabled: bool) -> Result<EpisodeId, PolicyCallError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.state();
        let id = loop {
            let id = EpisodeId::random(&mut *rng);
            if !state.active.contains_key(&id) {
                break id;
            }
        };
        state.active.insert(
            id.clone(),
            EpisodeEntry {
                training_enabled,
                ..EpisodeEntry::default()
            },
        );
        tracing::debug!(episode = %id, training_enabled, "Local episode started");
        Ok(id)
    }

    fn get_action(
        &self,
        episode: &EpisodeId,
        obs: &Observation,
    ) -> Result<Action, PolicyCallError> {
        {
            let mut state = self.state();
            let entry = state
                .active
                .get_mut(episode)
                .ok_or_else(|| Self::unknown("get_action", episode))?;
            entry.steps += 1;
        }
        Ok(self.policy.get_action(obs))
    }

    fn log_returns(
        &self,
        episode: &EpisodeId,
        reward: f32,
        _info: StepInfo,
    ) -> Result<(), PolicyCallError> {
        let mut state = self.state();
        let entry = state
            .active
            .get_mut(episode)
            .ok_or_else(|| Self::unknown("log_returns", episode))?;
        entry.total_reward += reward;
        Ok(())
    }

    fn end_episode(&self, episode: &EpisodeId, _obs: &Observation) -> Result<(), PolicyCallError> {
        let mut state = self.state();
        let entry = state
            .active
            .remove(episode)
            .ok_or_else(|| Self::unknown("end_episode", episode))?;
        tracing::info!(
            episode = %episode,
            steps = entry.steps,
            total_reward = entry.total_reward,
            "Local episode ended"
        );
        state.completed.push(CompletedEpisode {
            id: episode.clone(),
            steps: entry.steps,
            total_reward: entry.total_reward,
            training_enabled: entry.training_enabled,
        });
        Ok(())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "LocalPolicySource"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::Schema;

    use super::*;
    use crate::policies::{ConstantPolicy, NoopPolicy};

    fn obs() -> Observation {
        Schema::default().blank_observation()
    }

    #[test]
    fn episode_lifecycle_accumulates_returns() {
        let source = LocalPolicySource::new(
            Box::new(ConstantPolicy::new(Action::from(vec![0, 2, 0, 0]))),
            7,
        );
        let id = source.start_episode(true).unwrap();
        assert_eq!(source.active_episodes(), 1);

        for _ in 0..3 {
            assert_eq!(source.get_action(&id, &obs()).unwrap().as_slice(), &[0, 2, 0, 0]);
            source.log_returns(&id, 0.5, StepInfo::default()).unwrap();
        }
        source.end_episode(&id, &obs()).unwrap();

        let completed = source.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].steps, 3);
        assert!((completed[0].total_reward - 1.5).abs() < f32::EPSILON);
        assert_eq!(source.active_episodes(), 0);
    }

    #[test]
    fn episode_ids_are_unique_and_seeded() {
        let a = LocalPolicySource::new(Box::new(NoopPolicy::new(4)), 1);
        let b = LocalPolicySource::new(Box::new(NoopPolicy::new(4)), 1);
        let a1 = a.start_episode(true).unwrap();
        let a2 = a.start_episode(false).unwrap();
        assert_ne!(a1, a2);
        assert_eq!(b.start_episode(true).unwrap(), a1);
    }

    #[test]
    fn unknown_episode_is_fatal() {
        let source = LocalPolicySource::new(Box::new(NoopPolicy::new(4)), 0);
        let ghost = EpisodeId::from("ghost");
        let err = source.get_action(&ghost, &obs()).unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.call(), "get_action");
        assert!(source.log_returns(&ghost, 1.0, StepInfo::default()).is_err());
        assert!(source.end_episode(&ghost, &obs()).is_err());
    }

    #[test]
    fn ended_episode_cannot_be_reused() {
        let source = LocalPolicySource::new(Box::new(NoopPolicy::new(4)), 0);
        let id = source.start_episode(true).unwrap();
        source.end_episode(&id, &obs()).unwrap();
        assert!(source.end_episode(&id, &obs()).is_err());
    }
}
