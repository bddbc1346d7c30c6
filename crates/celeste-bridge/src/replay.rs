//! Scripted action replay.
//!
//! Feeds a fixed action sequence through a [`CelesteEnv`] instead of asking
//! a policy, which is handy for reproducing a run by hand. Scripts are
//! either a JSON list of action lists or a text file with one command chord
//! per line:
//!
//! ```text
//! # walk right, then jump over the gap
//! right * 4
//! right+jump
//! wait * 2
//! ```

use std::path::Path;

use thiserror::Error;

use celeste_core::controls::parse_chord;
use celeste_core::schema::Schema;
use celeste_core::types::Action;

use crate::env::CelesteEnv;
use crate::error::BridgeError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON action script: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Totals of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplaySummary {
    pub steps: usize,
    pub episodes_finished: usize,
    pub total_reward: f32,
}

/// A parsed action script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionScript {
    actions: Vec<Action>,
}

impl ActionScript {
    pub const fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Load a script, encoding chords for `schema`.
    pub fn from_file(path: impl AsRef<Path>, schema: &Schema) -> Result<Self, ReplayError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, schema)
    }

    pub fn parse(content: &str, schema: &Schema) -> Result<Self, ReplayError> {
        if content.trim_start().starts_with('[') {
            let actions: Vec<Action> = serde_json::from_str(content)?;
            return Ok(Self::new(actions));
        }

        let mut actions = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let parse_err = |message: String| ReplayError::Parse {
                line: index + 1,
                message,
            };
            let (chord, repeat) = match line.split_once('*') {
                Some((chord, count)) => {
                    let count = count
                        .trim()
                        .parse::<usize>()
                        .map_err(|e| parse_err(format!("bad repeat count: {e}")))?;
                    (chord.trim(), count)
                }
                None => (line, 1),
            };
            let action = parse_chord(chord).map_err(parse_err)?.encode(schema);
            actions.extend(std::iter::repeat_n(action, repeat));
        }
        Ok(Self::new(actions))
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub const fn len(&self) -> usize {
        self.actions.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Reset once, then step through every action, resetting after each
    /// terminal step.
    pub fn run(&self, env: &mut CelesteEnv) -> Result<ReplaySummary, ReplayError> {
        let mut summary = ReplaySummary::default();
        if self.actions.is_empty() {
            return Ok(summary);
        }
        env.reset()?;
        for action in &self.actions {
            let result = env.step(action.clone())?;
            summary.steps += 1;
            summary.total_reward += result.reward;
            if result.is_done() {
                summary.episodes_finished += 1;
                tracing::info!(
                    step = summary.steps,
                    died = result.info.died,
                    "Replay episode ended"
                );
                env.reset()?;
            }
        }
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
