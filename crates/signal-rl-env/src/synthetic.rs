//! Synthetic signalised grid
//!
//! A self-contained stand-in for SUMO: every junction has one incoming lane
//! per approach, vehicles arrive as a Poisson process, drive at constant
//! speed and queue behind the stop line while their lane shows red. It is
//! deterministic for a given seed and episode, which makes it suitable for
//! tests and quick experiments.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use signal_rl_core::{RLError, Result, TrafficSimulator};

/// Grid layout and traffic parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Signal-controlled junctions
    pub junctions: usize,
    /// Incoming lanes per junction
    pub approaches: usize,
    /// Controlled links per incoming lane
    pub links_per_lane: usize,
    /// Lane length in metres; the stop line sits at the end
    pub lane_length: f64,
    /// Free-flow distance covered per step in metres
    pub speed: f64,
    /// Minimum distance between consecutive vehicles in metres
    pub vehicle_gap: f64,
    /// Mean arrivals per lane per step
    pub arrival_rate: f64,
    /// Base seed; episode `e` runs with `seed + e`
    pub seed: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            junctions: 4,
            approaches: 4,
            links_per_lane: 3,
            lane_length: 100.0,
            speed: 10.0,
            vehicle_gap: 7.5,
            arrival_rate: 0.08,
            seed: 42,
        }
    }
}

impl GridConfig {
    /// Check the configuration
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for empty layouts or non-positive
    /// distances and rates.
    pub fn validate(&self) -> Result<()> {
        if self.junctions == 0 || self.approaches == 0 || self.links_per_lane == 0 {
            return Err(RLError::Config(
                "grid needs at least one junction, approach and link".to_string(),
            ));
        }
        for (name, value) in [
            ("lane_length", self.lane_length),
            ("speed", self.speed),
            ("vehicle_gap", self.vehicle_gap),
            ("arrival_rate", self.arrival_rate),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RLError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.vehicle_gap >= self.lane_length {
            return Err(RLError::Config(
                "vehicle_gap must be shorter than lane_length".to_string(),
            ));
        }
        Ok(())
    }

    /// Length of a junction's signal state string
    #[must_use]
    pub fn links(&self) -> usize {
        self.approaches * self.links_per_lane
    }

    /// Identifier of junction `j`
    #[must_use]
    pub fn junction_id(j: usize) -> String {
        format!("J{j}")
    }

    /// Identifier of incoming lane `k` of junction `j`
    #[must_use]
    pub fn lane_id(j: usize, k: usize) -> String {
        format!("J{j}_in{k}_0")
    }
}

#[derive(Debug, Clone)]
struct Vehicle {
    position: f64,
    waiting: f64,
}

#[derive(Debug, Clone, Default)]
struct Lane {
    /// Front vehicle first
    vehicles: Vec<Vehicle>,
    /// Arrived but not yet inserted for lack of space
    pending: usize,
}

#[derive(Debug, Clone)]
struct Junction {
    state: Vec<char>,
    remaining: f64,
    lanes: Vec<Lane>,
}

/// Grid of independent signalised junctions
#[derive(Debug)]
pub struct GridSimulator {
    config: GridConfig,
    arrivals: Poisson<f64>,
    lane_index: HashMap<String, (usize, usize)>,
    junctions: Vec<Junction>,
    rng: StdRng,
    running: bool,
    steps: usize,
    departed: usize,
}

impl GridSimulator {
    /// Create a simulator; traffic starts with [`TrafficSimulator::start`]
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for an invalid configuration.
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let arrivals = Poisson::new(config.arrival_rate)
            .map_err(|e| RLError::Config(format!("arrival_rate: {e}")))?;
        let lane_index = (0..config.junctions)
            .flat_map(|j| (0..config.approaches).map(move |k| (GridConfig::lane_id(j, k), (j, k))))
            .collect();
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            arrivals,
            lane_index,
            junctions: Vec::new(),
            rng,
            running: false,
            steps: 0,
            departed: 0,
        })
    }

    /// Layout and traffic parameters
    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Steps simulated in the current episode
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Vehicles that crossed a stop line in the current episode
    #[must_use]
    pub fn departed(&self) -> usize {
        self.departed
    }

    /// Vehicles currently on lanes
    #[must_use]
    pub fn vehicles(&self) -> usize {
        self.junctions
            .iter()
            .flat_map(|j| &j.lanes)
            .map(|l| l.vehicles.len())
            .sum()
    }

    /// Steps left before the junction's current phase would have expired
    ///
    /// # Errors
    /// Returns [`RLError::Simulator`] for an unknown junction or when the
    /// simulation is not running.
    pub fn remaining_duration(&self, junction: &str) -> Result<f64> {
        self.ensure_running()?;
        Ok(self.junctions[self.junction_index(junction)?].remaining)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running {
            Ok(())
        } else {
            Err(RLError::Simulator("grid simulation is not running".to_string()))
        }
    }

    fn lane(&self, lane: &str) -> Result<&Lane> {
        self.ensure_running()?;
        let &(j, k) = self
            .lane_index
            .get(lane)
            .ok_or_else(|| RLError::Simulator(format!("unknown lane '{lane}'")))?;
        Ok(&self.junctions[j].lanes[k])
    }

    fn junction_index(&self, junction: &str) -> Result<usize> {
        junction
            .strip_prefix('J')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&j| j < self.config.junctions && GridConfig::junction_id(j) == junction)
            .ok_or_else(|| RLError::Simulator(format!("unknown junction '{junction}'")))
    }

    /// Whether any link of lane `k` shows green
    fn is_green(&self, junction: &Junction, k: usize) -> bool {
        let links = self.config.links_per_lane;
        junction.state[k * links..(k + 1) * links]
            .iter()
            .any(|&c| matches!(c, 'G' | 'g'))
    }

    fn advance_lane(config: &GridConfig, lane: &mut Lane, green: bool) -> usize {
        let mut departed = 0;
        let mut leader: Option<f64> = None;
        let mut kept = Vec::with_capacity(lane.vehicles.len());

        for mut vehicle in lane.vehicles.drain(..) {
            let free = vehicle.position + config.speed;
            let limit = match leader {
                Some(ahead) => ahead - config.vehicle_gap,
                None if green => f64::INFINITY,
                None => config.lane_length,
            };
            let next = free.min(limit).max(vehicle.position);

            if leader.is_none() && next >= config.lane_length && green {
                departed += 1;
                continue;
            }
            if next - vehicle.position < 0.1 {
                vehicle.waiting += 1.0;
            } else {
                vehicle.waiting = 0.0;
            }
            vehicle.position = next;
            leader = Some(next);
            kept.push(vehicle);
        }
        lane.vehicles = kept;

        let has_room = lane
            .vehicles
            .last()
            .map_or(true, |v| v.position >= config.vehicle_gap);
        if lane.pending > 0 && has_room {
            lane.pending -= 1;
            lane.vehicles.push(Vehicle {
                position: 0.0,
                waiting: 0.0,
            });
        }
        departed
    }
}

#[async_trait]
impl TrafficSimulator for GridSimulator {
    async fn start(&mut self, episode: usize) -> Result<()> {
        let lanes = vec![Lane::default(); self.config.approaches];
        self.junctions = (0..self.config.junctions)
            .map(|_| Junction {
                state: vec!['r'; self.config.links()],
                remaining: 0.0,
                lanes: lanes.clone(),
            })
            .collect();
        self.rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(episode as u64));
        self.steps = 0;
        self.departed = 0;
        self.running = true;
        debug!(episode, junctions = self.config.junctions, "grid simulation started");
        Ok(())
    }

    async fn step(&mut self) -> Result<()> {
        self.ensure_running()?;
        let mut departed = 0;
        for j in 0..self.junctions.len() {
            let green: Vec<bool> = (0..self.config.approaches)
                .map(|k| self.is_green(&self.junctions[j], k))
                .collect();
            let junction = &mut self.junctions[j];
            junction.remaining = (junction.remaining - 1.0).max(0.0);
            for (lane, green) in junction.lanes.iter_mut().zip(green) {
                // Poisson samples are non-negative whole numbers.
                let arrived = self.arrivals.sample(&mut self.rng) as usize;
                lane.pending += arrived;
                departed += Self::advance_lane(&self.config, lane, green);
            }
        }
        self.steps += 1;
        self.departed += departed;
        trace!(step = self.steps, departed, "grid step");
        Ok(())
    }

    async fn junction_ids(&mut self) -> Result<Vec<String>> {
        self.ensure_running()?;
        Ok((0..self.config.junctions).map(GridConfig::junction_id).collect())
    }

    async fn controlled_lanes(&mut self, junction: &str) -> Result<Vec<String>> {
        self.ensure_running()?;
        let j = self.junction_index(junction)?;
        Ok((0..self.config.approaches)
            .flat_map(|k| std::iter::repeat(GridConfig::lane_id(j, k)).take(self.config.links_per_lane))
            .collect())
    }

    async fn vehicle_count(&mut self, lane: &str, min_position: f64) -> Result<usize> {
        Ok(self
            .lane(lane)?
            .vehicles
            .iter()
            .filter(|v| v.position > min_position)
            .count())
    }

    async fn waiting_time(&mut self, lane: &str) -> Result<f64> {
        Ok(self.lane(lane)?.vehicles.iter().map(|v| v.waiting).sum())
    }

    async fn set_phase(&mut self, junction: &str, duration: f64, state: &str) -> Result<()> {
        self.ensure_running()?;
        let j = self.junction_index(junction)?;
        let links = self.config.links();
        let signals: Vec<char> = state.chars().collect();
        if signals.len() != links {
            return Err(RLError::Simulator(format!(
                "state '{state}' has {} links, junction {junction} controls {links}",
                signals.len()
            )));
        }
        let target = &mut self.junctions[j];
        target.state = signals;
        target.remaining = duration;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.running {
            debug!(steps = self.steps, departed = self.departed, "grid simulation closed");
        }
        self.running = false;
        Ok(())
    }
}
