//! Core reinforcement learning traits and types for adaptive signal control
//!
//! This crate provides the shared vocabulary of the workspace: observations,
//! transitions, phase programs, and the seams through which an agent talks to
//! a traffic simulator and to optional phase observers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod agent;
pub mod environment;
pub mod error;
pub mod observation;
pub mod phase;
pub mod reward;
pub mod trajectory;
pub mod value;

// Re-export core traits and types
pub use action::{DiscreteAction, DiscreteSpace};
pub use agent::{Agent, AgentConfig, AgentMetrics, LearnStats};
pub use environment::{EpisodeSummary, PhaseEvent, PhaseObserver, TrafficSimulator};
pub use error::{RLError, Result};
pub use observation::{LaneObservation, ObservationSpace};
pub use phase::{PhaseProgram, PhaseStep, PhaseTable};
pub use reward::Reward;
pub use trajectory::{Transition, TransitionBatch};
pub use value::{argmax, ActionValueFunction};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Agent, AgentConfig, DiscreteAction, DiscreteSpace, LaneObservation, PhaseObserver,
        PhaseTable, Result, Reward, RLError, TrafficSimulator, Transition,
    };
}
