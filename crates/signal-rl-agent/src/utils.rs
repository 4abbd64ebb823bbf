//! Exploration schedule helpers

use serde::{Deserialize, Serialize};

use signal_rl_core::{RLError, Result};

/// Epsilon-greedy exploration settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Starting exploration rate
    pub epsilon_start: f64,
    /// Floor the rate never decays below
    pub epsilon_end: f64,
    /// Amount subtracted after every learning call
    pub epsilon_dec: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            epsilon_start: 1.0,
            epsilon_end: 0.05,
            epsilon_dec: 5e-4,
        }
    }
}

impl ExplorationConfig {
    /// Require `0 <= floor <= start <= 1` and a non-negative decrement
    ///
    /// # Errors
    /// Returns [`RLError::Config`] when the bounds are violated.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.epsilon_start) || !in_unit(self.epsilon_end) {
            return Err(RLError::Config(format!(
                "epsilon bounds must lie in [0, 1], got start {} floor {}",
                self.epsilon_start, self.epsilon_end
            )));
        }
        if self.epsilon_start < self.epsilon_end {
            return Err(RLError::Config(format!(
                "epsilon start {} is below the floor {}",
                self.epsilon_start, self.epsilon_end
            )));
        }
        if !(self.epsilon_dec.is_finite() && self.epsilon_dec >= 0.0) {
            return Err(RLError::Config(format!(
                "epsilon decrement must be non-negative, got {}",
                self.epsilon_dec
            )));
        }
        Ok(())
    }
}

/// Linearly decaying exploration rate with a floor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    value: f64,
    floor: f64,
    decrement: f64,
}

impl EpsilonSchedule {
    /// Create a schedule at `epsilon_start`
    ///
    /// # Errors
    /// Propagates [`ExplorationConfig::validate`] errors.
    pub fn new(config: &ExplorationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            value: config.epsilon_start,
            floor: config.epsilon_end,
            decrement: config.epsilon_dec,
        })
    }

    /// Current rate
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Floor of the schedule
    #[must_use]
    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Apply one decrement, clamped at the floor, and return the new rate
    ///
    /// A rate already at or below the floor is left alone.
    pub fn decay(&mut self) -> f64 {
        if self.value > self.floor {
            self.value = (self.value - self.decrement).max(self.floor);
        }
        self.value
    }

    /// Override the current rate, e.g. 0 for greedy evaluation
    pub fn set(&mut self, value: f64) {
        self.value = value.clamp(0.0, 1.0);
    }
}
