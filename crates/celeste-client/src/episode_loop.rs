//! Client episode loop.
//!
//! Drives a [`CelesteEnv`] with actions from a [`PolicySource`]:
//!
//! ```text
//! StartingEpisode --reset + start_episode--> AwaitingAction
//! AwaitingAction  --get_action-----------> Stepping
//! Stepping        --step, not terminal---> AwaitingAction
//! Stepping        --step, terminal-------> EndingEpisode
//! EndingEpisode   --flush + end_episode--> StartingEpisode
//! ```
//!
//! Each step's reward goes to the policy source through the
//! [`ReturnsForwarder`] thread. Any error is logged with its context and
//! returned; the loop never retries on its own.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use celeste_bridge::CelesteEnv;
use celeste_core::config::ClientConfig;
use celeste_core::termination::TerminationEvent;
use celeste_core::traits::PolicySource;
use celeste_core::types::{Action, EpisodeId, Observation};

use crate::error::ClientError;
use crate::returns::{ForwarderStats, ReturnsForwarder};

/// Episodes averaged for the `stop_reward` check.
pub const REWARD_WINDOW: usize = 100;

// ---------------------------------------------------------------------------
// LoopState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    StartingEpisode,
    AwaitingAction,
    Stepping,
    EndingEpisode,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Loop state together with the data that state needs.
enum Phase {
    Starting,
    Awaiting { id: EpisodeId, obs: Observation },
    Stepping { id: EpisodeId, obs: Observation, action: Action },
    Ending { id: EpisodeId, obs: Observation, event: TerminationEvent },
}

impl Phase {
    const fn state(&self) -> LoopState {
        match self {
            Self::Starting => LoopState::StartingEpisode,
            Self::Awaiting { .. } => LoopState::AwaitingAction,
            Self::Stepping { .. } => LoopState::Stepping,
            Self::Ending { .. } => LoopState::EndingEpisode,
        }
    }
}

// ---------------------------------------------------------------------------
// EpisodeTracker
// ---------------------------------------------------------------------------

/// Running totals for the current episode.
#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    /// Episodes started since the loop began.
    pub episode_number: u64,
    pub step_count: u64,
    pub total_reward: f32,
    started: Instant,
}

impl Default for EpisodeTracker {
    fn default() -> Self {
        Self {
            episode_number: 0,
            step_count: 0,
            total_reward: 0.0,
            started: Instant::now(),
        }
    }
}

impl EpisodeTracker {
    /// Start counting a new episode.
    pub fn begin(&mut self) {
        self.episode_number += 1;
        self.step_count = 0;
        self.total_reward = 0.0;
        self.started = Instant::now();
    }

    pub fn advance(&mut self, reward: f32) {
        self.step_count += 1;
        self.total_reward += reward;
    }

    /// Zero the totals once an episode has been reported.
    pub const fn clear(&mut self) {
        self.step_count = 0;
        self.total_reward = 0.0;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Totals logged when an episode ends.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeReport {
    pub id: EpisodeId,
    pub episode_number: u64,
    pub steps: u64,
    pub total_reward: f32,
    pub event: TerminationEvent,
    pub elapsed: Duration,
    pub actions_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxEpisodes,
    StopReward,
}

/// Result of a bounded [`EpisodeLoop::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub episodes: u64,
    pub total_steps: u64,
    /// Mean reward over the last [`REWARD_WINDOW`] episodes.
    pub mean_reward: f32,
    pub reason: StopReason,
}

// ---------------------------------------------------------------------------
// EpisodeLoop
// ---------------------------------------------------------------------------

pub struct EpisodeLoop {
    env: CelesteEnv,
    source: Arc<dyn PolicySource>,
    forwarder: ReturnsForwarder,
    config: ClientConfig,
    phase: Phase,
    tracker: EpisodeTracker,
    recent_rewards: VecDeque<f32>,
    episodes_completed: u64,
    total_steps: u64,
}

impl EpisodeLoop {
    pub fn new(env: CelesteEnv, source: Arc<dyn PolicySource>, config: ClientConfig) -> Self {
        let forwarder = ReturnsForwarder::spawn(Arc::clone(&source));
        Self {
            env,
            source,
            forwarder,
            config,
            phase: Phase::Starting,
            tracker: EpisodeTracker::default(),
            recent_rewards: VecDeque::with_capacity(REWARD_WINDOW),
            episodes_completed: 0,
            total_steps: 0,
        }
    }

    pub const fn state(&self) -> LoopState {
        self.phase.state()
    }

    /// Reward accumulated in the current episode.
    pub const fn accumulated_reward(&self) -> f32 {
        self.tracker.total_reward
    }

    pub const fn tracker(&self) -> &EpisodeTracker {
        &self.tracker
    }

    pub const fn env(&self) -> &CelesteEnv {
        &self.env
    }

    pub const fn episodes_completed(&self) -> u64 {
        self.episodes_completed
    }

    /// Id of the episode in progress.
    pub const fn current_episode(&self) -> Option<&EpisodeId> {
        match &self.phase {
            Phase::Starting => None,
            Phase::Awaiting { id, .. } | Phase::Stepping { id, .. } | Phase::Ending { id, .. } => {
                Some(id)
            }
        }
    }

    /// Mean reward over the last [`REWARD_WINDOW`] completed episodes.
    pub fn mean_reward(&self) -> Option<f32> {
        if self.recent_rewards.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.recent_rewards.len() as f32;
        Some(self.recent_rewards.iter().sum::<f32>() / n)
    }

    /// Perform one state transition.
    ///
    /// Returns the episode's report on the `EndingEpisode` →
    /// `StartingEpisode` transition. After an error the loop is back in
    /// `StartingEpisode`.
    pub fn tick(&mut self) -> Result<Option<EpisodeReport>, ClientError> {
        match std::mem::replace(&mut self.phase, Phase::Starting) {
            Phase::Starting => {
                let reset = self.env.reset()?;
                let id = self.source.start_episode(self.config.training_enabled)?;
                self.tracker.begin();
                tracing::info!(
                    episode = %id,
                    number = self.tracker.episode_number,
                    "Started episode"
                );
                tracing::debug!(observation = ?reset.observation, "Initial observation");
                self.phase = Phase::Awaiting {
                    id,
                    obs: reset.observation,
                };
                Ok(None)
            }
            Phase::Awaiting { id, obs } => {
                let action = match self.source.get_action(&id, &obs) {
                    Ok(action) => action,
                    Err(e) => {
                        tracing::error!(
                            episode = %id,
                            call = e.call(),
                            retryable = e.is_retryable(),
                            observation = ?obs,
                            reason = %e,
                            "Policy call failed while processing observation"
                        );
                        return Err(e.into());
                    }
                };
                self.phase = Phase::Stepping { id, obs, action };
                Ok(None)
            }
            Phase::Stepping { id, obs: _, action } => {
                let result = self.env.step(action)?;
                self.tracker.advance(result.reward);
                self.total_steps += 1;
                self.forwarder.send(id.clone(), result.reward, result.info)?;

                self.phase = if result.terminated {
                    Phase::Ending {
                        id,
                        obs: result.observation,
                        event: TerminationEvent::from_flags(
                            result.info.died,
                            result.info.finished_level,
                        ),
                    }
                } else {
                    Phase::Awaiting {
                        id,
                        obs: result.observation,
                    }
                };
                Ok(None)
            }
            Phase::Ending { id, obs, event } => {
                if !self.forwarder.flush(self.config.flush_timeout())? {
                    tracing::warn!(
                        episode = %id,
                        timeout_ms = self.config.flush_timeout_ms,
                        "Timed out flushing returns before end_episode"
                    );
                }
                self.source.end_episode(&id, &obs)?;
                let report = self.report(id, event);
                self.tracker.clear();
                Ok(Some(report))
            }
        }
    }

    /// Run episodes until a configured stop condition holds.
    ///
    /// Without `max_episodes` or `stop_reward` this only returns on error.
    pub fn run(&mut self) -> Result<RunSummary, ClientError> {
        loop {
            if let Some(reason) = self.stop_reason() {
                let summary = RunSummary {
                    episodes: self.episodes_completed,
                    total_steps: self.total_steps,
                    mean_reward: self.mean_reward().unwrap_or(0.0),
                    reason,
                };
                tracing::info!(?summary, "Stopping episode loop");
                return Ok(summary);
            }
            self.tick()?;
        }
    }

    /// Stop the reward forwarder after it drains.
    pub fn shutdown(self) -> ForwarderStats {
        self.forwarder.shutdown()
    }

    fn stop_reason(&self) -> Option<StopReason> {
        if self.state() != LoopState::StartingEpisode {
            return None;
        }
        if self
            .config
            .max_episodes
            .is_some_and(|max| self.episodes_completed >= max)
        {
            return Some(StopReason::MaxEpisodes);
        }
        match (self.config.stop_reward, self.mean_reward()) {
            (Some(target), Some(mean)) if mean >= target => Some(StopReason::StopReward),
            _ => None,
        }
    }

    fn report(&mut self, id: EpisodeId, event: TerminationEvent) -> EpisodeReport {
        let elapsed = self.tracker.elapsed();
        let secs = elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let actions_per_sec = if secs > 0.0 {
            self.tracker.step_count as f64 / secs
        } else {
            0.0
        };
        let report = EpisodeReport {
            id,
            episode_number: self.tracker.episode_number,
            steps: self.tracker.step_count,
            total_reward: self.tracker.total_reward,
            event,
            elapsed,
            actions_per_sec,
        };

        self.episodes_completed += 1;
        if self.recent_rewards.len() == REWARD_WINDOW {
            self.recent_rewards.pop_front();
        }
        self.recent_rewards.push_back(report.total_reward);

        tracing::info!(
            episode = %report.id,
            number = report.episode_number,
            %event,
            steps = report.steps,
            total_reward = report.total_reward,
            elapsed_s = secs,
            actions_per_sec,
            "Episode finished"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
