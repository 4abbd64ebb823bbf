//! Value-based agents for adaptive traffic-signal control
//!
//! This crate provides:
//! - a pure-ndarray action-value network with an Adam optimiser
//! - per-junction replay memory
//! - a DQN agent with single- and dual-network value learning
//! - named checkpoints and the episode control loop

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod checkpoint;
pub mod dqn;
pub mod network;
pub mod runner;
pub mod utils;

// Re-export agents
pub use dqn::{DqnAgent, DqnConfig, DualNetwork, Learner, SingleNetwork, TargetEstimator, ValueLearning};

// Re-export building blocks
pub use buffer::{MemoryBank, ReplayMemory};
pub use checkpoint::{Checkpoint, ModelStore};
pub use network::{DenseLayer, NetworkConfig, NetworkWeights, QNetwork};
pub use runner::{BestCheckpoint, EpisodeReport, JunctionState, RunConfig, RunReport, Runner};
pub use utils::{EpsilonSchedule, ExplorationConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DqnAgent, DqnConfig, ModelStore, NetworkConfig, RunConfig, Runner, ValueLearning,
    };
    pub use signal_rl_core::prelude::*;
}
