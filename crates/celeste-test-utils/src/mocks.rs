//! Mock policy sources for tests.

use std::sync::{Mutex, PoisonError};

use celeste_core::error::PolicyCallError;
use celeste_core::traits::PolicySource;
use celeste_core::types::{Action, EpisodeId, Observation, StepInfo};

/// One call seen by a [`RecordingSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCall {
    Start { training_enabled: bool },
    GetAction(EpisodeId),
    LogReturns { episode: EpisodeId, reward: f32 },
    End(EpisodeId),
}

/// Policy source that answers with a fixed action and records every call.
pub struct RecordingSource {
    action: Action,
    calls: Mutex<Vec<SourceCall>>,
    next_id: Mutex<u64>,
}

impl RecordingSource {
    pub const fn new(action: Action) -> Self {
        Self {
            action,
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Calls seen so far, in order.
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of rewards logged for `episode`.
    pub fn returns_for(&self, episode: &EpisodeId) -> f32 {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                SourceCall::LogReturns { episode: e, reward } if e == episode => Some(*reward),
                _ => None,
            })
            .sum()
    }

    fn push(&self, call: SourceCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl PolicySource for RecordingSource {
    fn start_episode(&self, training_enabled: bool) -> Result<EpisodeId, PolicyCallError> {
        self.push(SourceCall::Start { training_enabled });
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        *next += 1;
        Ok(EpisodeId::new(format!("episode-{next}")))
    }

    fn get_action(&self, episode: &EpisodeId, _obs: &Observation) -> Result<Action, PolicyCallError> {
        self.push(SourceCall::GetAction(episode.clone()));
        Ok(self.action.clone())
    }

    fn log_returns(
        &self,
        episode: &EpisodeId,
        reward: f32,
        _info: StepInfo,
    ) -> Result<(), PolicyCallError> {
        self.push(SourceCall::LogReturns {
            episode: episode.clone(),
            reward,
        });
        Ok(())
    }

    fn end_episode(&self, episode: &EpisodeId, _obs: &Observation) -> Result<(), PolicyCallError> {
        self.push(SourceCall::End(episode.clone()));
        Ok(())
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "RecordingSource"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::Schema;

    use super::*;

    #[test]
    fn recording_source_records_in_order() {
        let source = RecordingSource::new(Action::noop(4));
        let obs = Schema::default().blank_observation();
        let id = source.start_episode(true).unwrap();
        assert_eq!(id.as_str(), "episode-1");
        assert!(source.get_action(&id, &obs).unwrap().is_noop());
        source.log_returns(&id, 2.5, StepInfo::default()).unwrap();
        source.end_episode(&id, &obs).unwrap();

        assert_eq!(
            source.calls(),
            vec![
                SourceCall::Start {
                    training_enabled: true
                },
                SourceCall::GetAction(id.clone()),
                SourceCall::LogReturns {
                    episode: id.clone(),
                    reward: 2.5
                },
                SourceCall::End(id.clone()),
            ]
        );
        assert!((source.returns_for(&id) - 2.5).abs() < f32::EPSILON);
    }
}
