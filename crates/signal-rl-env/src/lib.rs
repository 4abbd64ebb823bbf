//! Traffic simulator back-ends for adaptive signal control
//!
//! This crate provides:
//! - a minimal TraCI client
//! - a SUMO back-end that launches one SUMO process per episode
//! - a deterministic synthetic grid for tests and quick experiments

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod sumo;
pub mod synthetic;
pub mod traci;

pub use backend::{AnySimulator, SimulatorKind};
pub use sumo::{SumoConfig, SumoSimulator};
pub use synthetic::{GridConfig, GridSimulator};
pub use traci::TraciClient;

// Re-export core types
pub use signal_rl_core::{PhaseEvent, PhaseObserver, TrafficSimulator};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{AnySimulator, GridConfig, GridSimulator, SimulatorKind, SumoConfig, SumoSimulator};
    pub use signal_rl_core::prelude::*;
}
