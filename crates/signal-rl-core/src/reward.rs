//! Reward signals derived from lane waiting time

use serde::{Deserialize, Serialize};

/// Reward signal for one junction decision
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Reward(pub f32);

impl Reward {
    /// Create a new reward
    #[must_use]
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    /// Penalty for the cumulative waiting time observed at a junction
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_waiting_time(waiting_time: f64) -> Self {
        Self(-(waiting_time as f32))
    }

    /// Get the reward value
    #[must_use]
    pub fn value(&self) -> f32 {
        self.0
    }
}

impl From<f32> for Reward {
    fn from(value: f32) -> Self {
        Self(value)
    }
}

impl From<Reward> for f32 {
    fn from(reward: Reward) -> Self {
        reward.0
    }
}

impl std::ops::Add for Reward {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self(self.0 + other.0)
    }
}

impl std::ops::Mul<f32> for Reward {
    type Output = Self;

    fn mul(self, scalar: f32) -> Self::Output {
        Self(self.0 * scalar)
    }
}
