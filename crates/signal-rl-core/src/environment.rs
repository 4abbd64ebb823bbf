//! Simulator and observer seams

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, PhaseProgram};

/// Traffic simulator driven one step at a time
///
/// Junctions are addressed by the identifiers returned from
/// [`TrafficSimulator::junction_ids`]; lanes by the identifiers returned from
/// [`TrafficSimulator::controlled_lanes`]. Controlled lanes come back once per
/// controlled link, so a lane may appear several times.
#[async_trait]
pub trait TrafficSimulator: Send {
    /// Start (or restart) the simulation for an episode
    async fn start(&mut self, episode: usize) -> crate::Result<()>;

    /// Advance the simulation by one step
    async fn step(&mut self) -> crate::Result<()>;

    /// Identifiers of all signal-controlled junctions
    async fn junction_ids(&mut self) -> crate::Result<Vec<String>>;

    /// Lanes controlled by a junction, one entry per controlled link
    async fn controlled_lanes(&mut self, junction: &str) -> crate::Result<Vec<String>>;

    /// Vehicles on a lane whose position along it exceeds `min_position`
    async fn vehicle_count(&mut self, lane: &str, min_position: f64) -> crate::Result<usize>;

    /// Cumulative waiting time of the vehicles currently on a lane
    async fn waiting_time(&mut self, lane: &str) -> crate::Result<f64>;

    /// Set a junction's signal state for the given number of steps
    async fn set_phase(&mut self, junction: &str, duration: f64, state: &str) -> crate::Result<()>;

    /// Shut the simulation down
    async fn close(&mut self) -> crate::Result<()>;
}

/// Phase program chosen for a junction
#[derive(Debug, Clone)]
pub struct PhaseEvent<'a> {
    /// Episode index
    pub episode: usize,
    /// Step within the episode
    pub step: usize,
    /// Junction index
    pub junction: usize,
    /// Junction identifier in the simulator
    pub junction_id: &'a str,
    /// Chosen action
    pub action: DiscreteAction,
    /// Program applied for the action
    pub program: &'a PhaseProgram,
}

/// Receives every phase decision, e.g. to relay it to hardware
///
/// Errors are reported back to the control loop, which logs them and keeps
/// running.
pub trait PhaseObserver: Send {
    /// Called after the transition step of a program has been applied
    ///
    /// # Errors
    /// Implementations return an error when the decision could not be relayed.
    fn on_phase(&mut self, event: &PhaseEvent<'_>) -> crate::Result<()>;
}

/// Summary of one finished episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    /// Episode ID
    pub id: String,
    /// Episode index
    pub episode: usize,
    /// Waiting time summed over all junctions and steps
    pub total_waiting_time: f64,
    /// Number of simulation steps
    pub steps: usize,
    /// Phase decisions taken over all junctions
    pub decisions: usize,
    /// Learning calls that completed an update
    pub learn_steps: usize,
    /// Exploration rate at episode end
    pub epsilon: f64,
    /// Start time
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// End time
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl EpisodeSummary {
    /// Begin a summary for a new episode
    #[must_use]
    pub fn begin(episode: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            episode,
            total_waiting_time: 0.0,
            steps: 0,
            decisions: 0,
            learn_steps: 0,
            epsilon: 0.0,
            start_time: chrono::Utc::now(),
            end_time: None,
        }
    }

    /// Mark the episode as finished
    pub fn finish(&mut self, epsilon: f64) {
        self.epsilon = epsilon;
        self.end_time = Some(chrono::Utc::now());
    }

    /// Wall-clock duration, if finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_records_end_time() {
        let mut summary = EpisodeSummary::begin(3);
        assert!(summary.duration().is_none());
        summary.total_waiting_time = 42.0;
        summary.finish(0.5);
        assert_eq!(summary.episode, 3);
        assert!(summary.duration().is_some());
        assert!((summary.epsilon - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn summaries_get_distinct_ids() {
        assert_ne!(EpisodeSummary::begin(0).id, EpisodeSummary::begin(0).id);
    }
}
