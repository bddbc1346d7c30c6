//! How an episode ends.
//!
//! Every game tick carries exactly one [`TerminationEvent`]. Only
//! [`Death`](TerminationEvent::Death) and
//! [`FinishedLevel`](TerminationEvent::FinishedLevel) end the episode.

use serde::{Deserialize, Serialize};

use crate::types::StepInfo;

/// Outcome of a single game tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationEvent {
    /// The episode continues.
    #[default]
    Normal,
    /// The player died.
    Death,
    /// The player reached the end of the level.
    FinishedLevel,
}

impl TerminationEvent {
    /// Derive the event from the raw tick flags. Death wins over a level
    /// completion reported on the same tick.
    pub const fn from_flags(death: bool, finished_level: bool) -> Self {
        if death {
            Self::Death
        } else if finished_level {
            Self::FinishedLevel
        } else {
            Self::Normal
        }
    }

    /// `true` for events that end the episode.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Death | Self::FinishedLevel)
    }

    /// Step info flags for this event.
    pub const fn info(self) -> StepInfo {
        StepInfo {
            died: matches!(self, Self::Death),
            finished_level: matches!(self, Self::FinishedLevel),
        }
    }
}

impl std::fmt::Display for TerminationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Death => "death",
            Self::FinishedLevel => "finished_level",
        };
        f.write_str(name)
    }
}
