//! Basic policies and the in-process policy source.
//!
//! Provides non-learning policies (noop, constant, random, scripted) and
//! [`LocalPolicySource`](local::LocalPolicySource), which serves actions
//! from any of them without a policy server.
//!
//! # Example
//!
//! ```
//! use celeste_core::prelude::*;
//! use celeste_policy::prelude::*;
//!
//! let schema = Schema::default();
//! let source = LocalPolicySource::new(Box::new(NoopPolicy::new(schema.action_len())), 0);
//! let episode = source.start_episode(true).unwrap();
//! let action = source.get_action(&episode, &schema.blank_observation()).unwrap();
//! assert!(action.is_noop());
//! ```

pub mod local;
pub mod policies;

use celeste_core::schema::Schema;
use celeste_core::traits::Policy;

// ---------------------------------------------------------------------------
// PolicyKind
// ---------------------------------------------------------------------------

/// Built-in policy selector, as named on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicyKind {
    #[default]
    Noop,
    Random,
}

impl PolicyKind {
    /// Build the policy for `schema`'s action space.
    pub fn build(self, schema: &Schema, seed: u64) -> Box<dyn Policy> {
        match self {
            Self::Noop => Box::new(policies::NoopPolicy::new(schema.action_len())),
            Self::Random => Box::new(policies::RandomPolicy::new(schema.action_space(), seed)),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown policy '{other}' (expected noop or random)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        PolicyKind,
        local::{CompletedEpisode, LocalPolicySource},
        policies::{ConstantPolicy, NoopPolicy, RandomPolicy, ScriptedPolicy},
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use celeste_core::schema::SchemaVersion;

    use super::*;

    #[test]
    fn policy_kind_parses() {
        assert_eq!("Random".parse::<PolicyKind>().unwrap(), PolicyKind::Random);
        assert!("greedy".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn built_policies_match_action_space() {
        let schema = Schema::new(SchemaVersion::V3);
        let obs = schema.blank_observation();
        for kind in [PolicyKind::Noop, PolicyKind::Random] {
            let policy = kind.build(&schema, 3);
            assert!(schema.action_space().contains(&policy.get_action(&obs)));
        }
    }
}
