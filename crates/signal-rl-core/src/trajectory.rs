//! Transitions and sampled transition batches

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, LaneObservation, Reward};

/// Single recorded decision of one junction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Observation the action was chosen from
    pub state: LaneObservation,
    /// Observation at the next decision point
    pub next_state: LaneObservation,
    /// Action taken
    pub action: DiscreteAction,
    /// Reward received
    pub reward: Reward,
    /// Whether this was the last step of the episode
    pub done: bool,
}

impl Transition {
    /// Create a new transition from raw values
    #[must_use]
    pub fn new(state: Vec<f32>, next_state: Vec<f32>, action: usize, reward: f32, done: bool) -> Self {
        Self {
            state: LaneObservation::from(state),
            next_state: LaneObservation::from(next_state),
            action: DiscreteAction(action),
            reward: Reward(reward),
            done,
        }
    }
}

/// Row-aligned batch of transitions gathered for one learning step
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionBatch {
    /// `(batch, input_dims)` states
    pub states: Array2<f32>,
    /// `(batch, input_dims)` next states
    pub next_states: Array2<f32>,
    /// Rewards
    pub rewards: Array1<f32>,
    /// Action indices
    pub actions: Vec<usize>,
    /// Terminal flags
    pub terminals: Vec<bool>,
}

impl TransitionBatch {
    /// Build a batch from individual transitions
    ///
    /// # Errors
    /// Returns [`crate::RLError::DimensionMismatch`] when the transitions do
    /// not share one observation length.
    pub fn from_transitions(transitions: &[Transition]) -> crate::Result<Self> {
        let dim = transitions.first().map_or(0, |t| t.state.len());
        let mut states = Array2::zeros((transitions.len(), dim));
        let mut next_states = Array2::zeros((transitions.len(), dim));
        let mut rewards = Array1::zeros(transitions.len());
        let mut actions = Vec::with_capacity(transitions.len());
        let mut terminals = Vec::with_capacity(transitions.len());

        for (row, t) in transitions.iter().enumerate() {
            for obs in [&t.state, &t.next_state] {
                if obs.len() != dim {
                    return Err(crate::RLError::DimensionMismatch {
                        expected: dim,
                        actual: obs.len(),
                    });
                }
            }
            states.row_mut(row).assign(&t.state.view());
            next_states.row_mut(row).assign(&t.next_state.view());
            rewards[row] = t.reward.value();
            actions.push(t.action.index());
            terminals.push(t.done);
        }

        Ok(Self {
            states,
            next_states,
            rewards,
            actions,
            terminals,
        })
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_rows_follow_transition_order() {
        let transitions = vec![
            Transition::new(vec![1.0, 2.0], vec![3.0, 4.0], 1, -1.0, false),
            Transition::new(vec![5.0, 6.0], vec![7.0, 8.0], 3, -2.0, true),
        ];
        let batch = TransitionBatch::from_transitions(&transitions).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.states.row(1).to_vec(), vec![5.0, 6.0]);
        assert_eq!(batch.next_states.row(0).to_vec(), vec![3.0, 4.0]);
        assert_eq!(batch.actions, vec![1, 3]);
        assert_eq!(batch.terminals, vec![false, true]);
        assert_eq!(batch.rewards.to_vec(), vec![-1.0, -2.0]);
    }

    #[test]
    fn ragged_transitions_are_rejected() {
        let transitions = vec![
            Transition::new(vec![1.0, 2.0], vec![3.0, 4.0], 0, 0.0, false),
            Transition::new(vec![1.0], vec![3.0, 4.0], 0, 0.0, false),
        ];
        assert!(TransitionBatch::from_transitions(&transitions).is_err());
    }
}
