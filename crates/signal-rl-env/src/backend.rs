//! Simulator selection by name

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use signal_rl_core::{RLError, Result, TrafficSimulator};

use crate::{GridConfig, GridSimulator, SumoConfig, SumoSimulator};

/// Available simulator back-ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    /// SUMO over TraCI
    #[default]
    Sumo,
    /// Built-in synthetic grid
    Synthetic,
}

impl SimulatorKind {
    /// Names accepted by [`FromStr`]
    pub const NAMES: &'static [&'static str] = &["sumo", "synthetic"];

    /// Build the selected back-end
    ///
    /// # Errors
    /// Returns [`RLError::Config`] when the selected configuration is invalid.
    pub fn build(self, sumo: &SumoConfig, grid: &GridConfig) -> Result<AnySimulator> {
        Ok(match self {
            Self::Sumo => AnySimulator::Sumo(SumoSimulator::new(sumo.clone())?),
            Self::Synthetic => AnySimulator::Synthetic(GridSimulator::new(grid.clone())?),
        })
    }
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sumo => "sumo",
            Self::Synthetic => "synthetic",
        })
    }
}

impl FromStr for SimulatorKind {
    type Err = RLError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sumo" | "traci" => Ok(Self::Sumo),
            "synthetic" | "grid" => Ok(Self::Synthetic),
            other => Err(RLError::Config(format!(
                "unknown simulator '{other}', expected one of {:?}",
                Self::NAMES
            ))),
        }
    }
}

/// Either back-end behind one concrete type
#[derive(Debug)]
pub enum AnySimulator {
    /// SUMO over TraCI
    Sumo(SumoSimulator),
    /// Synthetic grid
    Synthetic(GridSimulator),
}

macro_rules! dispatch {
    ($self:ident, $sim:ident => $call:expr) => {
        match $self {
            AnySimulator::Sumo($sim) => $call,
            AnySimulator::Synthetic($sim) => $call,
        }
    };
}

#[async_trait]
impl TrafficSimulator for AnySimulator {
    async fn start(&mut self, episode: usize) -> Result<()> {
        dispatch!(self, sim => sim.start(episode).await)
    }

    async fn step(&mut self) -> Result<()> {
        dispatch!(self, sim => sim.step().await)
    }

    async fn junction_ids(&mut self) -> Result<Vec<String>> {
        dispatch!(self, sim => sim.junction_ids().await)
    }

    async fn controlled_lanes(&mut self, junction: &str) -> Result<Vec<String>> {
        dispatch!(self, sim => sim.controlled_lanes(junction).await)
    }

    async fn vehicle_count(&mut self, lane: &str, min_position: f64) -> Result<usize> {
        dispatch!(self, sim => sim.vehicle_count(lane, min_position).await)
    }

    async fn waiting_time(&mut self, lane: &str) -> Result<f64> {
        dispatch!(self, sim => sim.waiting_time(lane).await)
    }

    async fn set_phase(&mut self, junction: &str, duration: f64, state: &str) -> Result<()> {
        dispatch!(self, sim => sim.set_phase(junction, duration, state).await)
    }

    async fn close(&mut self) -> Result<()> {
        dispatch!(self, sim => sim.close().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_by_name() {
        assert_eq!("sumo".parse::<SimulatorKind>().unwrap(), SimulatorKind::Sumo);
        assert_eq!("Grid".parse::<SimulatorKind>().unwrap(), SimulatorKind::Synthetic);
        assert!("vissim".parse::<SimulatorKind>().is_err());
        assert_eq!(SimulatorKind::Synthetic.to_string(), "synthetic");
    }

    #[tokio::test]
    async fn synthetic_backend_dispatches() {
        let mut sim = SimulatorKind::Synthetic
            .build(&SumoConfig::default(), &GridConfig::default())
            .unwrap();
        assert!(matches!(sim, AnySimulator::Synthetic(_)));
        sim.start(0).await.unwrap();
        sim.step().await.unwrap();
        assert_eq!(sim.junction_ids().await.unwrap().len(), 4);
        sim.close().await.unwrap();
    }
}
