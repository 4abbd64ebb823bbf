//! Agent traits and types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, LaneObservation, Transition};

/// Learning hyperparameters shared by value-based agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Batch size for training
    pub batch_size: usize,
    /// Replay capacity per junction
    pub buffer_size: usize,
    /// Learning calls between target-network hard updates
    pub replace_interval: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            gamma: 0.99,
            batch_size: 1024,
            buffer_size: 100_000,
            replace_interval: 5,
        }
    }
}

impl AgentConfig {
    /// Check the hyperparameters for values no agent can work with
    ///
    /// # Errors
    /// Returns [`crate::RLError::Config`] describing the first bad value.
    pub fn validate(&self) -> crate::Result<()> {
        let fail = |msg: String| Err(crate::RLError::Config(msg));
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return fail(format!("learning rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return fail(format!("gamma must lie in [0, 1], got {}", self.gamma));
        }
        if self.batch_size == 0 {
            return fail("batch size must be positive".to_string());
        }
        if self.buffer_size < self.batch_size {
            return fail(format!(
                "buffer size {} is smaller than batch size {}",
                self.buffer_size, self.batch_size
            ));
        }
        if self.replace_interval == 0 {
            return fail("replace interval must be positive".to_string());
        }
        Ok(())
    }
}

/// Outcome of one completed learning step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnStats {
    /// Mean squared TD error before the update
    pub loss: f32,
    /// Exploration rate after decay
    pub epsilon: f64,
    /// Learning calls completed so far
    pub iteration: u64,
    /// Whether the target network was re-synchronised by this call
    pub target_synced: bool,
}

/// Agent metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Actions chosen
    pub decisions: u64,
    /// Completed learning calls
    pub learn_steps: u64,
    /// Current exploration rate
    pub epsilon: f64,
    /// Loss of the last learning call
    pub loss: Option<f32>,
}

/// Core agent trait driven by the control loop
///
/// All calls are synchronous; the control loop owns the agent and never
/// shares it across tasks.
pub trait Agent {
    /// Serializable weights snapshot used for checkpoints
    type Checkpoint: Serialize + DeserializeOwned + Send + Sync;

    /// Length of the observations the agent accepts
    fn observation_dim(&self) -> usize;

    /// Number of discrete actions the agent chooses between
    fn action_count(&self) -> usize;

    /// Select an action given an observation
    ///
    /// # Errors
    /// Returns an error when the observation has the wrong length.
    fn choose_action(&mut self, observation: &LaneObservation) -> crate::Result<DiscreteAction>;

    /// Record a transition for a junction
    ///
    /// A junction seen for the first time gets a fresh memory.
    ///
    /// # Errors
    /// Returns an error for a malformed transition.
    fn store_transition(&mut self, junction: usize, transition: &Transition) -> crate::Result<()>;

    /// Run one learning step on a junction's memory
    ///
    /// Returns `Ok(None)` when the junction does not yet hold a full batch.
    ///
    /// # Errors
    /// Returns an error for an unknown junction or a numerical failure.
    fn learn(&mut self, junction: usize) -> crate::Result<Option<LearnStats>>;

    /// Forget stored transitions for the given junctions
    ///
    /// The next transition stored for each of them lands in ring slot 0.
    ///
    /// # Errors
    /// Returns an error when a memory cannot be created.
    fn reset(&mut self, junctions: &[usize]) -> crate::Result<()>;

    /// Snapshot the weights used for acting
    fn checkpoint(&self) -> Self::Checkpoint;

    /// Restore weights from a checkpoint
    ///
    /// # Errors
    /// Returns an error when the checkpoint does not fit the agent.
    fn restore(&mut self, checkpoint: Self::Checkpoint) -> crate::Result<()>;

    /// Get agent metrics
    fn metrics(&self) -> AgentMetrics {
        AgentMetrics::default()
    }
}
