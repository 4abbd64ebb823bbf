//! Discrete phase-program actions and the action space they are drawn from

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a phase program chosen for a junction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscreteAction(pub usize);

impl DiscreteAction {
    /// Get the action index
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for DiscreteAction {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for DiscreteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discrete action space `[0, n)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete action space
    ///
    /// # Errors
    /// Returns [`crate::RLError::Config`] for an empty space.
    pub fn new(n: usize) -> crate::Result<Self> {
        if n == 0 {
            return Err(crate::RLError::Config(
                "action space must contain at least one action".to_string(),
            ));
        }
        Ok(Self { n })
    }

    /// Sample an action uniformly at random
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DiscreteAction {
        DiscreteAction(rng.gen_range(0..self.n))
    }

    /// Check if an action is valid within this space
    #[must_use]
    pub fn contains(&self, action: DiscreteAction) -> bool {
        action.0 < self.n
    }

    /// Reject actions outside the space
    ///
    /// # Errors
    /// Returns [`crate::RLError::InvalidAction`] when the index is out of range.
    pub fn check(&self, action: DiscreteAction) -> crate::Result<()> {
        if self.contains(action) {
            Ok(())
        } else {
            Err(crate::RLError::InvalidAction(format!(
                "action {} outside [0, {})",
                action, self.n
            )))
        }
    }
}
