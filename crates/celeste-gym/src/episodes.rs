//! Server-side episode bookkeeping.
//!
//! A shard keeps one [`Trajectory`] per active episode. Ending an episode
//! that was started with training enabled moves its trajectory into the
//! [`SampleQueue`], where the learner collects it with
//! [`EpisodeRegistry::take_samples`]. Evaluation episodes are counted and
//! discarded.

use std::collections::{HashMap, VecDeque};

use celeste_core::types::{Action, EpisodeId, Observation, StepInfo};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::protocol::ProtocolError;

// ---------------------------------------------------------------------------
// Trajectory
// ---------------------------------------------------------------------------

/// Experience recorded for one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub id: EpisodeId,
    pub training_enabled: bool,
    pub observations: Vec<Observation>,
    pub actions: Vec<Action>,
    /// One entry per action; returns logged before the first action open
    /// their own entry.
    pub rewards: Vec<f32>,
    pub infos: Vec<StepInfo>,
    pub total_reward: f32,
    pub final_observation: Option<Observation>,
}

impl Trajectory {
    fn new(id: EpisodeId, training_enabled: bool) -> Self {
        Self {
            id,
            training_enabled,
            observations: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            infos: Vec::new(),
            total_reward: 0.0,
            final_observation: None,
        }
    }

    /// Number of recorded actions.
    pub const fn len(&self) -> usize {
        self.actions.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn record(&mut self, obs: Observation, action: Action) {
        self.observations.push(obs);
        self.actions.push(action);
    }

    fn add_return(&mut self, reward: f32, info: StepInfo) {
        self.total_reward += reward;
        if self.rewards.len() < self.actions.len() {
            self.rewards.push(reward);
            self.infos.push(info);
        } else if let (Some(last), Some(last_info)) = (self.rewards.last_mut(), self.infos.last_mut())
        {
            *last += reward;
            last_info.died |= info.died;
            last_info.finished_level |= info.finished_level;
        } else {
            self.rewards.push(reward);
            self.infos.push(info);
        }
    }
}

// ---------------------------------------------------------------------------
// SampleQueue
// ---------------------------------------------------------------------------

/// Completed trajectories awaiting the learner, bounded by total steps.
#[derive(Debug)]
pub struct SampleQueue {
    trajectories: VecDeque<Trajectory>,
    steps: usize,
    capacity: usize,
    dropped: u64,
}

impl SampleQueue {
    pub const fn new(capacity: usize) -> Self {
        Self {
            trajectories: VecDeque::new(),
            steps: 0,
            capacity,
            dropped: 0,
        }
    }

    /// Append a trajectory, evicting the oldest ones while over capacity.
    ///
    /// The newest trajectory is always kept, even if it alone exceeds the
    /// capacity.
    pub fn push(&mut self, trajectory: Trajectory) {
        self.steps += trajectory.len();
        self.trajectories.push_back(trajectory);
        while self.steps > self.capacity && self.trajectories.len() > 1 {
            if let Some(old) = self.trajectories.pop_front() {
                self.steps -= old.len();
                self.dropped += 1;
                tracing::warn!(
                    episode = %old.id,
                    steps = old.len(),
                    capacity = self.capacity,
                    "Sample queue full, dropping oldest trajectory"
                );
            }
        }
    }

    /// Remove and return every queued trajectory, oldest first.
    pub fn drain(&mut self) -> Vec<Trajectory> {
        self.steps = 0;
        self.trajectories.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Total steps across queued trajectories.
    pub const fn steps(&self) -> usize {
        self.steps
    }

    /// Trajectories evicted so far.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ---------------------------------------------------------------------------
// EpisodeRegistry
// ---------------------------------------------------------------------------

/// Summary returned when an episode ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub total_reward: f32,
    pub training_enabled: bool,
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub completed: u64,
    pub total_steps: u64,
    pub queued_trajectories: usize,
    pub queued_steps: usize,
    pub dropped_trajectories: u64,
    /// Episodes discarded because their client went away.
    pub abandoned: u64,
}

/// Active episodes of one shard.
#[derive(Debug)]
pub struct EpisodeRegistry {
    active: HashMap<EpisodeId, Trajectory>,
    samples: SampleQueue,
    rng: ChaCha8Rng,
    completed: u64,
    abandoned: u64,
    total_steps: u64,
}

impl EpisodeRegistry {
    /// `max_sample_steps` bounds the sample queue; `seed` drives id
    /// generation.
    pub fn new(max_sample_steps: usize, seed: u64) -> Self {
        Self {
            active: HashMap::new(),
            samples: SampleQueue::new(max_sample_steps),
            rng: ChaCha8Rng::seed_from_u64(seed),
            completed: 0,
            abandoned: 0,
            total_steps: 0,
        }
    }

    /// Open an episode, under `requested` if given or a fresh random id.
    pub fn start(
        &mut self,
        training_enabled: bool,
        requested: Option<EpisodeId>,
    ) -> Result<EpisodeId, ProtocolError> {
        let id = match requested {
            Some(id) if self.active.contains_key(&id) => {
                return Err(ProtocolError::DuplicateEpisode(id));
            }
            Some(id) => id,
            None => loop {
                let id = EpisodeId::random(&mut self.rng);
                if !self.active.contains_key(&id) {
                    break id;
                }
            },
        };
        self.active
            .insert(id.clone(), Trajectory::new(id.clone(), training_enabled));
        Ok(id)
    }

    pub fn contains(&self, id: &EpisodeId) -> bool {
        self.active.contains_key(id)
    }

    /// Record an action computed by the shard's policy.
    pub fn record_action(
        &mut self,
        id: &EpisodeId,
        obs: Observation,
        action: Action,
    ) -> Result<(), ProtocolError> {
        self.get_mut(id)?.record(obs, action);
        self.total_steps += 1;
        Ok(())
    }

    /// Record an action chosen by the client. Requires training enabled.
    pub fn log_action(
        &mut self,
        id: &EpisodeId,
        obs: Observation,
        action: Action,
    ) -> Result<(), ProtocolError> {
        if !self.get_mut(id)?.training_enabled {
            return Err(ProtocolError::TrainingDisabled(id.clone()));
        }
        self.record_action(id, obs, action)
    }

    pub fn log_returns(
        &mut self,
        id: &EpisodeId,
        reward: f32,
        info: StepInfo,
    ) -> Result<(), ProtocolError> {
        self.get_mut(id)?.add_return(reward, info);
        Ok(())
    }

    /// Retire an episode.
    pub fn end(
        &mut self,
        id: &EpisodeId,
        final_obs: Observation,
    ) -> Result<EpisodeSummary, ProtocolError> {
        let mut trajectory = self
            .active
            .remove(id)
            .ok_or_else(|| ProtocolError::UnknownEpisode(id.clone()))?;
        trajectory.final_observation = Some(final_obs);
        self.completed += 1;

        let summary = EpisodeSummary {
            steps: trajectory.len(),
            total_reward: trajectory.total_reward,
            training_enabled: trajectory.training_enabled,
        };
        if trajectory.training_enabled {
            self.samples.push(trajectory);
        }
        Ok(summary)
    }

    /// Discard those of `ids` that are still active. Their trajectories
    /// never reach the sample queue. Returns how many were removed.
    pub fn abandon<'a>(&mut self, ids: impl IntoIterator<Item = &'a EpisodeId>) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(trajectory) = self.active.remove(id) {
                tracing::warn!(episode = %id, steps = trajectory.len(), "Abandoned episode");
                removed += 1;
            }
        }
        self.abandoned += removed as u64;
        removed
    }

    /// Drain the sample queue.
    pub fn take_samples(&mut self) -> Vec<Trajectory> {
        self.samples.drain()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.active.len(),
            completed: self.completed,
            total_steps: self.total_steps,
            queued_trajectories: self.samples.len(),
            queued_steps: self.samples.steps(),
            dropped_trajectories: self.samples.dropped(),
            abandoned: self.abandoned,
        }
    }

    fn get_mut(&mut self, id: &EpisodeId) -> Result<&mut Trajectory, ProtocolError> {
        self.active
            .get_mut(id)
            .ok_or_else(|| ProtocolError::UnknownEpisode(id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::Schema;

    use super::*;

    fn obs() -> Observation {
        Schema::default().blank_observation()
    }

    fn run_steps(reg: &mut EpisodeRegistry, id: &EpisodeId, steps: usize, reward: f32) {
        for _ in 0..steps {
            reg.record_action(id, obs(), Action::noop(4)).unwrap();
            reg.log_returns(id, reward, StepInfo::default()).unwrap();
        }
    }

    #[test]
    fn start_generates_unique_ids() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let a = reg.start(true, None).unwrap();
        let b = reg.start(true, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.stats().active, 2);
    }

    #[test]
    fn requested_id_is_used_once() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let id = EpisodeId::from("mine");
        assert_eq!(reg.start(true, Some(id.clone())).unwrap(), id);
        let err = reg.start(false, Some(id)).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateEpisode(_)));
    }

    #[test]
    fn episode_lifecycle_reaches_sample_queue() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let id = reg.start(true, None).unwrap();
        run_steps(&mut reg, &id, 3, 1.5);

        let summary = reg.end(&id, obs()).unwrap();
        assert_eq!(summary.steps, 3);
        assert!((summary.total_reward - 4.5).abs() < 1e-6);
        assert!(!reg.contains(&id));

        let samples = reg.take_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].rewards, vec![1.5, 1.5, 1.5]);
        assert!(samples[0].final_observation.is_some());
        assert!(reg.take_samples().is_empty());
    }

    #[test]
    fn evaluation_episodes_are_not_queued() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let id = reg.start(false, None).unwrap();
        run_steps(&mut reg, &id, 2, 1.0);
        reg.end(&id, obs()).unwrap();

        let stats = reg.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_steps, 2);
        assert_eq!(stats.queued_trajectories, 0);
    }

    #[test]
    fn repeated_returns_accumulate_on_latest_step() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let id = reg.start(true, None).unwrap();
        reg.record_action(&id, obs(), Action::noop(4)).unwrap();
        reg.log_returns(&id, 1.0, StepInfo::default()).unwrap();
        reg.log_returns(
            &id,
            2.0,
            StepInfo {
                died: true,
                finished_level: false,
            },
        )
        .unwrap();
        reg.end(&id, obs()).unwrap();

        let traj = reg.take_samples().remove(0);
        assert_eq!(traj.rewards, vec![3.0]);
        assert!(traj.infos[0].died);
    }

    #[test]
    fn log_action_requires_training() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let eval = reg.start(false, None).unwrap();
        let err = reg.log_action(&eval, obs(), Action::noop(4)).unwrap_err();
        assert!(matches!(err, ProtocolError::TrainingDisabled(_)));

        let train = reg.start(true, None).unwrap();
        reg.log_action(&train, obs(), Action::noop(4)).unwrap();
        assert_eq!(reg.stats().total_steps, 1);
    }

    #[test]
    fn unknown_episode_errors() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let ghost = EpisodeId::from("ghost");
        assert!(matches!(
            reg.log_returns(&ghost, 1.0, StepInfo::default()),
            Err(ProtocolError::UnknownEpisode(_))
        ));
        assert!(reg.end(&ghost, obs()).is_err());
    }

    #[test]
    fn sample_queue_drops_oldest_when_full() {
        let mut reg = EpisodeRegistry::new(5, 0);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = reg.start(true, None).unwrap();
            run_steps(&mut reg, &id, 2, 0.0);
            reg.end(&id, obs()).unwrap();
            ids.push(id);
        }

        let stats = reg.stats();
        assert_eq!(stats.queued_trajectories, 2);
        assert_eq!(stats.queued_steps, 4);
        assert_eq!(stats.dropped_trajectories, 1);

        let samples = reg.take_samples();
        assert_eq!(samples[0].id, ids[1]);
        assert_eq!(samples[1].id, ids[2]);
    }

    #[test]
    fn oversized_trajectory_is_kept_alone() {
        let mut queue = SampleQueue::new(1);
        let mut traj = Trajectory::new(EpisodeId::from("big"), true);
        for _ in 0..3 {
            traj.record(obs(), Action::noop(4));
        }
        queue.push(traj);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.steps(), 3);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn abandon_removes_only_active_episodes() {
        let mut reg = EpisodeRegistry::new(100, 0);
        let ended = reg.start(true, None).unwrap();
        run_steps(&mut reg, &ended, 2, 1.0);
        reg.end(&ended, obs()).unwrap();
        let open = reg.start(true, None).unwrap();
        run_steps(&mut reg, &open, 3, 1.0);
        let other = reg.start(false, None).unwrap();

        assert_eq!(reg.abandon([&ended, &open]), 1);
        assert!(!reg.contains(&open));
        assert!(reg.contains(&other));

        let stats = reg.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queued_trajectories, 1);
    }
}
