//! Basic policy implementations.
//!
//! All policies implement [`Policy`] from `celeste-core`. None of them
//! learn; they exist for smoke runs, local inference and tests.

use std::sync::{Mutex, PoisonError};

use celeste_core::traits::Policy;
use celeste_core::types::{Action, ActionSpace, Observation};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// ---------------------------------------------------------------------------
// NoopPolicy
// ---------------------------------------------------------------------------

/// Policy that always returns the NOOP action.
pub struct NoopPolicy {
    axes: usize,
}

impl NoopPolicy {
    pub const fn new(axes: usize) -> Self {
        Self { axes }
    }
}

impl Policy for NoopPolicy {
    fn get_action(&self, _obs: &Observation) -> Action {
        Action::noop(self.axes)
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "NoopPolicy"
    }
}

// ---------------------------------------------------------------------------
// ConstantPolicy
// ---------------------------------------------------------------------------

/// Policy that always returns the same fixed action.
pub struct ConstantPolicy {
    action: Action,
}

impl ConstantPolicy {
    pub const fn new(action: Action) -> Self {
        Self { action }
    }
}

impl Policy for ConstantPolicy {
    fn get_action(&self, _obs: &Observation) -> Action {
        self.action.clone()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ConstantPolicy"
    }
}

// ---------------------------------------------------------------------------
// RandomPolicy
// ---------------------------------------------------------------------------

/// Policy that samples uniformly from a multi-discrete action space.
///
/// Uses a seeded RNG for determinism. Thread-safe via [`Mutex`].
pub struct RandomPolicy {
    space: ActionSpace,
    rng: Mutex<ChaCha8Rng>,
}

impl RandomPolicy {
    /// Create a random policy for the given action space and seed.
    pub fn new(space: ActionSpace, seed: u64) -> Self {
        Self {
            space,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl Policy for RandomPolicy {
    fn get_action(&self, _obs: &Observation) -> Action {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.space.sample(&mut *rng)
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "RandomPolicy"
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ScriptedPolicy
// ---------------------------------------------------------------------------

/// Policy that replays a fixed sequence of actions, cycling when exhausted.
pub struct ScriptedPolicy {
    actions: Vec<Action>,
    index: Mutex<usize>,
}

impl ScriptedPolicy {
    /// Create a scripted policy from a sequence of actions.
    ///
    /// # Panics
    ///
    /// Panics if `actions` is empty.
    pub fn new(actions: Vec<Action>) -> Self {
        assert!(
            !actions.is_empty(),
            "ScriptedPolicy requires at least one action"
        );
        Self {
            actions,
            index: Mutex::new(0),
        }
    }
}

impl Policy for ScriptedPolicy {
    fn get_action(&self, _obs: &Observation) -> Action {
        let mut idx = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let action = self.actions[*idx].clone();
        *idx = (*idx + 1) % self.actions.len();
        action
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ScriptedPolicy"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
