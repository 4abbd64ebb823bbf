//! Action-value functions and greedy selection

use ndarray::{Array1, ArrayView1};
use num_traits::Float;

use crate::DiscreteAction;

/// Index of the largest value, first occurrence on ties
///
/// NaN entries never win. An empty slice yields index 0.
pub fn argmax<T: Float>(values: ArrayView1<'_, T>) -> usize {
    let mut best_index = 0;
    let mut best = T::neg_infinity();
    for (index, &value) in values.iter().enumerate() {
        if value > best {
            best = value;
            best_index = index;
        }
    }
    best_index
}

/// Action value function Q(s, ·)
pub trait ActionValueFunction {
    /// Get Q-values for all actions of one observation
    ///
    /// # Errors
    /// Returns an error when the observation has the wrong dimensionality.
    fn action_values(&self, observation: ArrayView1<'_, f32>) -> crate::Result<Array1<f32>>;

    /// Get the greedy action and its value
    ///
    /// # Errors
    /// Propagates errors from [`ActionValueFunction::action_values`].
    fn best_action_value(
        &self,
        observation: ArrayView1<'_, f32>,
    ) -> crate::Result<(DiscreteAction, f32)> {
        let values = self.action_values(observation)?;
        let index = argmax(values.view());
        let value = values.get(index).copied().unwrap_or(f32::NEG_INFINITY);
        Ok((DiscreteAction(index), value))
    }
}
