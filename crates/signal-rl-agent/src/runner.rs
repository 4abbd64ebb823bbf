//! Episode control loop
//!
//! Drives a [`TrafficSimulator`] one step at a time. Each junction holds its
//! current phase program until its timer runs out; it then observes its
//! lanes, stores the transition that led here, picks the next program and
//! (when training) runs one learning step. Waiting time is accumulated per
//! step and per episode, and the weights of the best training episode are
//! checkpointed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use signal_rl_core::{
    Agent, DiscreteAction, EpisodeSummary, LaneObservation, PhaseEvent, PhaseObserver,
    PhaseProgram, PhaseStep, PhaseTable, RLError, Result, Reward, TrafficSimulator, Transition,
};

use crate::checkpoint::{Checkpoint, ModelStore};

/// Episode loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Episodes to run when training
    pub episodes: usize,
    /// Last step index; an episode runs `steps + 1` simulation steps
    pub steps: usize,
    /// Store-and-learn mode versus pure evaluation
    pub training: bool,
    /// Vehicles count towards an observation only past this lane position
    pub min_position: f64,
    /// Rewind every junction's replay memory at the start of each episode
    pub reset_memory: bool,
    /// Checkpoint name
    pub model_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            episodes: 50,
            steps: 500,
            training: true,
            min_position: 10.0,
            reset_memory: false,
            model_name: "model".to_string(),
        }
    }
}

impl RunConfig {
    /// Same settings as a single greedy evaluation episode
    #[must_use]
    pub fn evaluation(self) -> Self {
        Self {
            episodes: 1,
            training: false,
            ..self
        }
    }
}

/// Per-junction loop state
#[derive(Debug, Clone)]
pub struct JunctionState {
    /// Stable junction index used by the agent
    pub index: usize,
    /// Junction identifier in the simulator
    pub id: String,
    /// Controlled lanes, de-duplicated in first-seen order
    pub lanes: Vec<String>,
    /// Controlled lanes as reported, one entry per controlled link
    pub links: Vec<String>,
    /// Steps left in the current phase program
    pub timer: u32,
    /// Observation at the last decision
    pub prev_observation: LaneObservation,
    /// Action taken at the last decision
    pub prev_action: DiscreteAction,
}

impl JunctionState {
    fn new(index: usize, id: String, controlled: Vec<String>, dim: usize) -> Self {
        let mut lanes: Vec<String> = Vec::with_capacity(controlled.len());
        for lane in &controlled {
            if !lanes.contains(lane) {
                lanes.push(lane.clone());
            }
        }
        Self {
            index,
            id,
            lanes,
            links: controlled,
            timer: 0,
            prev_observation: LaneObservation::zeros(dim),
            prev_action: DiscreteAction::default(),
        }
    }
}

/// Best episode seen so far
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpoint {
    /// Episode index
    pub episode: usize,
    /// Its total waiting time
    pub total_waiting_time: f64,
}

impl BestCheckpoint {
    /// Replace `current` when `total_waiting_time` is strictly lower
    ///
    /// Returns the new best and whether it changed.
    #[must_use]
    pub fn update(current: Option<Self>, episode: usize, total_waiting_time: f64) -> (Option<Self>, bool) {
        match current {
            Some(best) if best.total_waiting_time <= total_waiting_time => (Some(best), false),
            _ => (
                Some(Self {
                    episode,
                    total_waiting_time,
                }),
                true,
            ),
        }
    }
}

/// Outcome of one episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// Episode summary
    pub summary: EpisodeSummary,
    /// Waiting time summed over junctions, one entry per step
    pub waiting_per_step: Vec<f64>,
    /// Whether this episode became the best so far
    pub improved: bool,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Episodes in order
    pub episodes: Vec<EpisodeReport>,
    /// Best episode
    pub best: Option<BestCheckpoint>,
}

impl RunReport {
    /// `(episode, total waiting time)` series
    #[must_use]
    pub fn totals(&self) -> Vec<(usize, f64)> {
        self.episodes
            .iter()
            .map(|e| (e.summary.episode, e.summary.total_waiting_time))
            .collect()
    }
}

/// Control loop binding a simulator, a phase table and optional observers
pub struct Runner<S> {
    config: RunConfig,
    phases: PhaseTable,
    simulator: S,
    observers: Vec<Box<dyn PhaseObserver>>,
    store: Option<(ModelStore, String)>,
}

impl<S: TrafficSimulator> Runner<S> {
    /// Create a runner
    pub fn new(config: RunConfig, phases: PhaseTable, simulator: S) -> Self {
        Self {
            config,
            phases,
            simulator,
            observers: Vec::new(),
            store: None,
        }
    }

    /// Notify `observer` of every phase decision
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn PhaseObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Checkpoint improving training episodes into `store`, tagged with the
    /// agent variant
    #[must_use]
    pub fn with_store(mut self, store: ModelStore, variant: impl Into<String>) -> Self {
        self.store = Some((store, variant.into()));
        self
    }

    /// Loop settings
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The simulator
    pub fn simulator_mut(&mut self) -> &mut S {
        &mut self.simulator
    }

    /// Give the simulator back
    pub fn into_simulator(self) -> S {
        self.simulator
    }

    /// Run every configured episode
    ///
    /// # Errors
    /// Returns [`RLError::Config`] before touching the simulator when the
    /// phase table does not provide one program per agent action.
    /// Simulator, agent and checkpoint errors abort the run. The simulator
    /// is closed before the error is returned.
    pub async fn run<A: Agent>(&mut self, agent: &mut A) -> Result<RunReport> {
        self.phases.validate(agent.action_count())?;
        let episodes = if self.config.training { self.config.episodes } else { 1 };
        let mut report = RunReport::default();

        for episode in 0..episodes {
            let outcome = self.run_episode(agent, episode).await;
            let close = self.simulator.close().await;
            let mut episode_report = match (outcome, close) {
                (Ok(r), Ok(())) => r,
                (Ok(_), Err(e)) => return Err(e),
                (Err(e), close) => {
                    if let Err(close_err) = close {
                        warn!(error = %close_err, "failed to close simulator after error");
                    }
                    return Err(e);
                }
            };

            let total = episode_report.summary.total_waiting_time;
            let (best, improved) = BestCheckpoint::update(report.best, episode, total);
            report.best = best;
            episode_report.improved = improved;

            info!(
                episode,
                total_waiting_time = total,
                decisions = episode_report.summary.decisions,
                learn_steps = episode_report.summary.learn_steps,
                epsilon = episode_report.summary.epsilon,
                improved,
                "episode finished"
            );

            if improved && self.config.training {
                self.save_checkpoint(agent, episode, total).await?;
            }
            report.episodes.push(episode_report);
        }
        Ok(report)
    }

    async fn save_checkpoint<A: Agent>(&self, agent: &A, episode: usize, total: f64) -> Result<()> {
        let Some((store, variant)) = &self.store else {
            return Ok(());
        };
        let checkpoint = Checkpoint {
            name: self.config.model_name.clone(),
            variant: variant.clone(),
            episode: Some(episode),
            total_waiting_time: Some(total),
            saved_at: chrono::Utc::now(),
            weights: agent.checkpoint(),
        };
        store.save(&checkpoint).await?;
        Ok(())
    }

    async fn discover(&mut self, dim: usize) -> Result<Vec<JunctionState>> {
        let ids = self.simulator.junction_ids().await?;
        let mut junctions = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            let controlled = self.simulator.controlled_lanes(&id).await?;
            let junction = JunctionState::new(index, id, controlled, dim);
            if junction.lanes.len() != dim {
                return Err(RLError::DimensionMismatch {
                    expected: dim,
                    actual: junction.lanes.len(),
                });
            }
            junctions.push(junction);
        }
        Ok(junctions)
    }

    async fn observe(&mut self, lanes: &[String]) -> Result<LaneObservation> {
        let mut counts = Vec::with_capacity(lanes.len());
        for lane in lanes {
            counts.push(self.simulator.vehicle_count(lane, self.config.min_position).await?);
        }
        Ok(LaneObservation::from_counts(&counts))
    }

    async fn waiting_time(&mut self, lanes: &[String]) -> Result<f64> {
        let mut total = 0.0;
        for lane in lanes {
            total += self.simulator.waiting_time(lane).await?;
        }
        Ok(total)
    }

    async fn apply(&mut self, junction: &str, step: &PhaseStep) -> Result<()> {
        self.simulator
            .set_phase(junction, f64::from(step.duration), &step.state)
            .await
    }

    fn notify(&mut self, event: &PhaseEvent<'_>) {
        for observer in &mut self.observers {
            if let Err(e) = observer.on_phase(event) {
                warn!(junction = event.junction_id, error = %e, "phase observer failed");
            }
        }
    }

    async fn run_episode<A: Agent>(&mut self, agent: &mut A, episode: usize) -> Result<EpisodeReport> {
        self.simulator.start(episode).await?;
        let dim = agent.observation_dim();
        let mut junctions = self.discover(dim).await?;
        if self.config.reset_memory {
            let indices: Vec<usize> = junctions.iter().map(|j| j.index).collect();
            agent.reset(&indices)?;
        }
        debug!(episode, junctions = junctions.len(), "episode started");

        let steps = self.config.steps;
        let mut summary = EpisodeSummary::begin(episode);
        let mut waiting_per_step = Vec::with_capacity(steps + 1);

        for step in 0..=steps {
            self.simulator.step().await?;
            let mut step_waiting = 0.0;

            for junction in &mut junctions {
                let waiting = self.waiting_time(&junction.links).await?;
                step_waiting += waiting;

                if junction.timer == 0 {
                    self.decide(agent, junction, waiting, episode, step).await?;
                    summary.decisions += 1;
                    if self.config.training && agent.learn(junction.index)?.is_some() {
                        summary.learn_steps += 1;
                    }
                } else {
                    junction.timer -= 1;
                    let program = self.program(junction.prev_action)?;
                    if program.transition.duration > 0 && junction.timer == program.green.duration {
                        self.apply(&junction.id, &program.green).await?;
                    }
                }
            }

            waiting_per_step.push(step_waiting);
            summary.total_waiting_time += step_waiting;
        }

        summary.steps = steps + 1;
        summary.finish(agent.metrics().epsilon);
        Ok(EpisodeReport {
            summary,
            waiting_per_step,
            improved: false,
        })
    }

    fn program(&self, action: DiscreteAction) -> Result<PhaseProgram> {
        self.phases.program(action).cloned()
    }

    async fn decide<A: Agent>(
        &mut self,
        agent: &mut A,
        junction: &mut JunctionState,
        waiting: f64,
        episode: usize,
        step: usize,
    ) -> Result<()> {
        let observation = self.observe(&junction.lanes).await?;
        let transition = Transition {
            state: std::mem::replace(&mut junction.prev_observation, observation.clone()),
            next_state: observation,
            action: junction.prev_action,
            reward: Reward::from_waiting_time(waiting),
            done: step == self.config.steps,
        };
        agent.store_transition(junction.index, &transition)?;

        let action = agent.choose_action(&transition.next_state)?;
        let program = self.program(action)?;
        self.apply(&junction.id, &program.transition).await?;
        if program.transition.duration == 0 {
            self.apply(&junction.id, &program.green).await?;
        }
        junction.timer = program.total_duration();
        junction.prev_action = action;

        debug!(
            episode,
            step,
            junction = %junction.id,
            action = action.index(),
            reward = transition.reward.value(),
            "phase decision"
        );
        self.notify(&PhaseEvent {
            episode,
            step,
            junction: junction.index,
            junction_id: &junction.id,
            action,
            program: &program,
        });
        Ok(())
    }
}
