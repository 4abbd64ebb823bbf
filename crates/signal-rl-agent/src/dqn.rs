//! Deep Q-Network (DQN) agent with an optional target network
//!
//! The single-network variant bootstraps from the online network. The
//! dual-network variant picks the bootstrap action with the online network,
//! reads its value from a target network that is hard-synchronised every
//! `replace_interval` learning calls, and acts greedily through that target
//! network.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use signal_rl_core::{
    argmax, Agent, AgentConfig, AgentMetrics, DiscreteAction, DiscreteSpace, LaneObservation,
    LearnStats, ObservationSpace, RLError, Result, Transition, TransitionBatch,
};

use crate::buffer::MemoryBank;
use crate::network::{NetworkConfig, NetworkWeights, QNetwork};
use crate::utils::{EpsilonSchedule, ExplorationConfig};

/// Value-learning variant, fixed at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueLearning {
    /// Single online network
    #[default]
    Dqn,
    /// Online network plus a periodically synchronised target network
    Ddqn,
}

impl FromStr for ValueLearning {
    type Err = RLError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dqn" | "single" => Ok(Self::Dqn),
            "ddqn" | "double" | "dual" => Ok(Self::Ddqn),
            other => Err(RLError::Config(format!(
                "unknown value-learning variant '{other}', expected 'dqn' or 'ddqn'"
            ))),
        }
    }
}

impl fmt::Display for ValueLearning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dqn => write!(f, "dqn"),
            Self::Ddqn => write!(f, "ddqn"),
        }
    }
}

/// DQN-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// Layer sizes
    pub network: NetworkConfig,
    /// Epsilon-greedy settings
    pub exploration: ExplorationConfig,
    /// Single or dual network
    pub variant: ValueLearning,
    /// Seed for weight initialisation, exploration and sampling
    pub seed: Option<u64>,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            network: NetworkConfig::default(),
            exploration: ExplorationConfig::default(),
            variant: ValueLearning::Dqn,
            seed: None,
        }
    }
}

impl DqnConfig {
    /// Validate every section
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        self.network.validate()?;
        self.exploration.validate()
    }
}

/// Computes bootstrap values `V(s')` for a batch of next states
///
/// Terminal rows are zeroed by the caller.
pub trait TargetEstimator {
    /// One bootstrap value per row of `next_states`
    ///
    /// # Errors
    /// Propagates network errors.
    fn bootstrap_values(&self, online: &QNetwork, next_states: ArrayView2<'_, f32>) -> Result<Array1<f32>>;
}

/// Bootstraps from the online network's own maximum
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNetwork;

impl TargetEstimator for SingleNetwork {
    fn bootstrap_values(&self, online: &QNetwork, next_states: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        let values = online.forward(next_states)?;
        Ok(values.map_axis(Axis(1), |row| row[argmax(row)]))
    }
}

/// Online network selects, target network evaluates
#[derive(Debug, Clone)]
pub struct DualNetwork {
    target: QNetwork,
    replace_interval: u64,
}

impl DualNetwork {
    /// Start with an exact copy of the online network
    #[must_use]
    pub fn new(online: &QNetwork, replace_interval: usize) -> Self {
        Self {
            target: online.clone(),
            replace_interval: replace_interval.max(1) as u64,
        }
    }

    /// The target network
    #[must_use]
    pub fn target(&self) -> &QNetwork {
        &self.target
    }

    /// Hard-copy the online network when `iteration` completes an interval
    fn maybe_sync(&mut self, online: &QNetwork, iteration: u64) -> Result<bool> {
        if iteration % self.replace_interval == 0 {
            self.target.copy_from(online)?;
            return Ok(true);
        }
        Ok(false)
    }
}

impl TargetEstimator for DualNetwork {
    fn bootstrap_values(&self, online: &QNetwork, next_states: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        let selection = online.forward(next_states)?;
        let evaluation = self.target.forward(next_states)?;
        Ok(Array1::from_iter(
            selection
                .outer_iter()
                .zip(evaluation.outer_iter())
                .map(|(select, evaluate)| evaluate[argmax(select)]),
        ))
    }
}

/// Variant dispatch resolved once at construction
#[derive(Debug, Clone)]
pub enum Learner {
    /// Single-network learning
    Single(SingleNetwork),
    /// Dual-network learning
    Dual(DualNetwork),
}

impl Learner {
    fn new(variant: ValueLearning, online: &QNetwork, replace_interval: usize) -> Self {
        match variant {
            ValueLearning::Dqn => Self::Single(SingleNetwork),
            ValueLearning::Ddqn => Self::Dual(DualNetwork::new(online, replace_interval)),
        }
    }
}

impl TargetEstimator for Learner {
    fn bootstrap_values(&self, online: &QNetwork, next_states: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        match self {
            Self::Single(single) => single.bootstrap_values(online, next_states),
            Self::Dual(dual) => dual.bootstrap_values(online, next_states),
        }
    }
}

/// DQN agent with per-junction replay memory
#[derive(Debug)]
pub struct DqnAgent {
    config: DqnConfig,
    action_space: DiscreteSpace,
    observation_space: ObservationSpace,
    online: QNetwork,
    learner: Learner,
    memory: MemoryBank,
    epsilon: EpsilonSchedule,
    rng: StdRng,
    learn_steps: u64,
    decisions: u64,
    last_loss: Option<f32>,
}

impl DqnAgent {
    /// Create a new agent
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for invalid settings.
    pub fn new(config: DqnConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let online = QNetwork::new(config.network, config.base.learning_rate, &mut rng)?;
        let learner = Learner::new(config.variant, &online, config.base.replace_interval);
        let memory = MemoryBank::new(config.base.buffer_size, config.network.input_dims)?;
        let epsilon = EpsilonSchedule::new(&config.exploration)?;

        debug!(
            variant = %config.variant,
            input_dims = config.network.input_dims,
            n_actions = config.network.n_actions,
            "created DQN agent"
        );

        Ok(Self {
            action_space: DiscreteSpace::new(config.network.n_actions)?,
            observation_space: ObservationSpace::new(config.network.input_dims),
            config,
            online,
            learner,
            memory,
            epsilon,
            rng,
            learn_steps: 0,
            decisions: 0,
            last_loss: None,
        })
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &DqnConfig {
        &self.config
    }

    /// Variant chosen at construction
    #[must_use]
    pub fn variant(&self) -> ValueLearning {
        self.config.variant
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon.value()
    }

    /// Override the exploration rate; 0 gives greedy behaviour
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon.set(epsilon);
    }

    /// The online network
    #[must_use]
    pub fn online(&self) -> &QNetwork {
        &self.online
    }

    /// The target network, in dual mode
    #[must_use]
    pub fn target(&self) -> Option<&QNetwork> {
        match &self.learner {
            Learner::Single(_) => None,
            Learner::Dual(dual) => Some(dual.target()),
        }
    }

    /// Network used for greedy action selection
    ///
    /// In dual mode this is the target network.
    #[must_use]
    pub fn acting_network(&self) -> &QNetwork {
        self.target().unwrap_or(&self.online)
    }

    /// Per-junction replay memories
    #[must_use]
    pub fn memory(&self) -> &MemoryBank {
        &self.memory
    }

    /// TD targets `r + gamma * V(s')` with `V(s') = 0` on terminal rows
    ///
    /// # Errors
    /// Propagates network errors.
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute_targets(&self, batch: &TransitionBatch) -> Result<Array1<f32>> {
        let mut bootstrap = self
            .learner
            .bootstrap_values(&self.online, batch.next_states.view())?;
        for (value, &terminal) in bootstrap.iter_mut().zip(&batch.terminals) {
            if terminal {
                *value = 0.0;
            }
        }
        let gamma = self.config.base.gamma as f32;
        Ok(&batch.rewards + &(bootstrap * gamma))
    }
}

impl Agent for DqnAgent {
    type Checkpoint = NetworkWeights;

    fn observation_dim(&self) -> usize {
        self.observation_space.dim
    }

    fn action_count(&self) -> usize {
        self.action_space.n
    }

    fn choose_action(&mut self, observation: &LaneObservation) -> Result<DiscreteAction> {
        self.observation_space.check(observation.as_slice())?;
        self.decisions += 1;

        if self.rng.gen::<f64>() < self.epsilon.value() {
            let action = self.action_space.sample(&mut self.rng);
            trace!(action = action.index(), "exploring");
            return Ok(action);
        }

        let values = self.acting_network().predict(observation.view())?;
        Ok(DiscreteAction(argmax(values.view())))
    }

    fn store_transition(&mut self, junction: usize, transition: &Transition) -> Result<()> {
        self.action_space.check(transition.action)?;
        self.memory.store(junction, transition)
    }

    fn learn(&mut self, junction: usize) -> Result<Option<LearnStats>> {
        let batch_size = self.config.base.batch_size;
        let memory = self.memory.memory(junction)?;
        if memory.len() < batch_size {
            return Ok(None);
        }

        let batch = memory.sample(batch_size, &mut self.rng)?;
        let targets = self.compute_targets(&batch)?;
        let loss = self
            .online
            .train_step(batch.states.view(), &batch.actions, targets.view())?;

        self.learn_steps += 1;
        self.last_loss = Some(loss);
        let epsilon = self.epsilon.decay();
        let target_synced = match &mut self.learner {
            Learner::Single(_) => false,
            Learner::Dual(dual) => dual.maybe_sync(&self.online, self.learn_steps)?,
        };

        debug!(junction, loss, epsilon, iteration = self.learn_steps, target_synced, "learn step");
        Ok(Some(LearnStats {
            loss,
            epsilon,
            iteration: self.learn_steps,
            target_synced,
        }))
    }

    fn reset(&mut self, junctions: &[usize]) -> Result<()> {
        for &junction in junctions {
            self.memory.reset(junction)?;
        }
        Ok(())
    }

    fn checkpoint(&self) -> NetworkWeights {
        self.acting_network().weights()
    }

    fn restore(&mut self, checkpoint: NetworkWeights) -> Result<()> {
        self.online.load_weights(&checkpoint)?;
        if let Learner::Dual(dual) = &mut self.learner {
            dual.target.load_weights(&checkpoint)?;
        }
        Ok(())
    }

    fn metrics(&self) -> AgentMetrics {
        AgentMetrics {
            decisions: self.decisions,
            learn_steps: self.learn_steps,
            epsilon: self.epsilon.value(),
            loss: self.last_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array2};

    fn config(variant: ValueLearning, seed: u64) -> DqnConfig {
        DqnConfig {
            base: AgentConfig {
                learning_rate: 0.01,
                gamma: 0.9,
                batch_size: 4,
                buffer_size: 10,
                replace_interval: 3,
            },
            network: NetworkConfig {
                input_dims: 2,
                fc1_dims: 16,
                fc2_dims: 16,
                n_actions: 4,
            },
            exploration: ExplorationConfig::default(),
            variant,
            seed: Some(seed),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn fill(agent: &mut DqnAgent, junction: usize, count: usize) {
        for i in 0..count {
            let x = (i % 5) as f32;
            agent
                .store_transition(
                    junction,
                    &Transition::new(vec![x, 1.0], vec![x + 1.0, 0.5], i % 4, -x, i == count - 1),
                )
                .unwrap();
        }
    }

    #[test]
    fn variant_names_parse() {
        assert_eq!("dqn".parse::<ValueLearning>().unwrap(), ValueLearning::Dqn);
        assert_eq!("DDQN".parse::<ValueLearning>().unwrap(), ValueLearning::Ddqn);
        assert_eq!("dual".parse::<ValueLearning>().unwrap(), ValueLearning::Ddqn);
        assert!(matches!("a2c".parse::<ValueLearning>(), Err(RLError::Config(_))));
    }

    #[test]
    fn greedy_single_network_acts_through_online() {
        let mut agent = DqnAgent::new(config(ValueLearning::Dqn, 1)).unwrap();
        agent.set_epsilon(0.0);
        for obs in [[0.0_f32, 0.0], [1.0, 3.0], [5.0, 2.0]] {
            let expected = argmax(agent.online().predict(arr1(&obs).view()).unwrap().view());
            let chosen = agent.choose_action(&LaneObservation::from(obs.to_vec())).unwrap();
            assert_eq!(chosen.index(), expected);
        }
    }

    #[test]
    fn greedy_dual_network_acts_through_target() {
        let mut agent = DqnAgent::new(config(ValueLearning::Ddqn, 2)).unwrap();
        fill(&mut agent, 0, 8);
        // One learn call leaves online and target apart (interval is 3).
        agent.learn(0).unwrap();
        assert_ne!(agent.online().weights(), agent.target().unwrap().weights());

        agent.set_epsilon(0.0);
        let obs = LaneObservation::from(vec![2.0, 1.0]);
        let via_target = argmax(agent.target().unwrap().predict(obs.view()).unwrap().view());
        assert_eq!(agent.choose_action(&obs).unwrap().index(), via_target);
    }

    #[test]
    fn full_exploration_is_uniform() {
        let mut agent = DqnAgent::new(config(ValueLearning::Dqn, 3)).unwrap();
        agent.set_epsilon(1.0);
        let obs = LaneObservation::zeros(2);
        let mut counts = [0_u32; 4];
        for _ in 0..10_000 {
            counts[agent.choose_action(&obs).unwrap().index()] += 1;
        }
        let expected = 2500.0;
        let chi_square: f64 = counts
            .iter()
            .map(|&c| (f64::from(c) - expected).powi(2) / expected)
            .sum();
        // 99.9th percentile of chi-square with 3 degrees of freedom.
        assert!(chi_square < 16.27, "chi-square {chi_square} for {counts:?}");
    }

    #[test]
    fn terminal_targets_equal_rewards_in_both_modes() {
        for variant in [ValueLearning::Dqn, ValueLearning::Ddqn] {
            let agent = DqnAgent::new(config(variant, 4)).unwrap();
            let batch = TransitionBatch {
                states: Array2::ones((3, 2)),
                next_states: Array2::from_elem((3, 2), 7.0),
                rewards: arr1(&[-1.0, 2.5, 0.0]),
                actions: vec![0, 1, 2],
                terminals: vec![true, true, true],
            };
            let targets = agent.compute_targets(&batch).unwrap();
            assert_eq!(targets, batch.rewards);
        }
    }

    #[test]
    fn non_terminal_targets_bootstrap() {
        let agent = DqnAgent::new(config(ValueLearning::Dqn, 5)).unwrap();
        let next = Array2::from_elem((1, 2), 3.0_f32);
        let batch = TransitionBatch {
            states: Array2::zeros((1, 2)),
            next_states: next.clone(),
            rewards: arr1(&[1.0]),
            actions: vec![0],
            terminals: vec![false],
        };
        let values = agent.online().predict(next.row(0)).unwrap();
        let best = values[argmax(values.view())];
        let targets = agent.compute_targets(&batch).unwrap();
        assert_relative_eq!(targets[0], 1.0 + 0.9 * best, epsilon = 1e-5);
    }

    #[test]
    fn target_network_syncs_on_interval() {
        let mut agent = DqnAgent::new(config(ValueLearning::Ddqn, 6)).unwrap();
        assert_eq!(agent.online().weights(), agent.target().unwrap().weights());
        fill(&mut agent, 0, 10);

        for call in 1..=7_u64 {
            let stats = agent.learn(0).unwrap().unwrap();
            let identical = agent.online().weights() == agent.target().unwrap().weights();
            let on_interval = call % 3 == 0;
            assert_eq!(stats.target_synced, on_interval);
            assert_eq!(identical, on_interval, "after learn call {call}");
        }
    }

    #[test]
    fn epsilon_never_increases_and_respects_floor() {
        let mut cfg = config(ValueLearning::Dqn, 7);
        cfg.exploration = ExplorationConfig {
            epsilon_start: 0.1,
            epsilon_end: 0.05,
            epsilon_dec: 0.02,
        };
        let mut agent = DqnAgent::new(cfg).unwrap();
        fill(&mut agent, 0, 6);

        let mut previous = agent.epsilon();
        for _ in 0..6 {
            agent.learn(0).unwrap();
            assert!(agent.epsilon() <= previous);
            assert!(agent.epsilon() >= 0.05);
            previous = agent.epsilon();
        }
        assert_relative_eq!(agent.epsilon(), 0.05);
    }

    #[test]
    fn learning_waits_for_a_full_batch() {
        let mut agent = DqnAgent::new(config(ValueLearning::Dqn, 8)).unwrap();
        fill(&mut agent, 1, 3);
        let before = agent.online().weights();
        assert!(agent.learn(1).unwrap().is_none());
        assert_eq!(agent.online().weights(), before);
        assert_relative_eq!(agent.epsilon(), 1.0);
        assert!(matches!(agent.learn(9), Err(RLError::UnknownJunction(9))));
    }

    #[test]
    fn single_learn_step_end_to_end() {
        let mut cfg = config(ValueLearning::Dqn, 9);
        cfg.base.gamma = 0.99;
        let mut agent = DqnAgent::new(cfg).unwrap();
        for i in 0..4 {
            #[allow(clippy::cast_precision_loss)]
            let reward = (i + 1) as f32;
            agent
                .store_transition(0, &Transition::new(vec![0.0; 2], vec![0.0; 2], i, reward, i == 3))
                .unwrap();
        }
        let before = agent.online().weights();
        let epsilon_before = agent.epsilon();

        let stats = agent.learn(0).unwrap().expect("batch of four is available");
        assert!(stats.loss.is_finite());
        assert_ne!(agent.online().weights(), before);
        assert_relative_eq!(agent.epsilon(), (epsilon_before - 5e-4).max(0.05), epsilon = 1e-12);
        assert_eq!(stats.iteration, 1);
    }

    #[test]
    fn memory_reset_restarts_the_ring() {
        let mut agent = DqnAgent::new(config(ValueLearning::Dqn, 10)).unwrap();
        fill(&mut agent, 2, 7);
        agent.reset(&[2]).unwrap();
        assert_eq!(agent.memory().memory(2).unwrap().write_index(), 0);
        assert!(agent.learn(2).unwrap().is_none());
    }

    #[test]
    fn wrong_observation_length_is_an_error() {
        let mut agent = DqnAgent::new(config(ValueLearning::Dqn, 11)).unwrap();
        assert!(matches!(
            agent.choose_action(&LaneObservation::zeros(3)),
            Err(RLError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        let bad = Transition::new(vec![0.0; 2], vec![0.0; 2], 7, 0.0, false);
        assert!(agent.store_transition(0, &bad).is_err());
    }

    #[test]
    fn checkpoint_carries_acting_weights_and_restores_both_networks() {
        let mut trained = DqnAgent::new(config(ValueLearning::Ddqn, 12)).unwrap();
        fill(&mut trained, 0, 8);
        trained.learn(0).unwrap();
        let snapshot = trained.checkpoint();
        assert_eq!(snapshot, trained.target().unwrap().weights());

        let mut fresh = DqnAgent::new(config(ValueLearning::Ddqn, 13)).unwrap();
        fresh.restore(snapshot.clone()).unwrap();
        assert_eq!(fresh.online().weights(), snapshot);
        assert_eq!(fresh.target().unwrap().weights(), snapshot);
    }

    #[test]
    fn config_round_trips_with_flattened_base() {
        let json = r#"{"learning_rate": 0.05, "batch_size": 32, "variant": "ddqn"}"#;
        let cfg: DqnConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.base.batch_size, 32);
        assert_eq!(cfg.variant, ValueLearning::Ddqn);
        assert_eq!(cfg.network, NetworkConfig::default());
    }
}
