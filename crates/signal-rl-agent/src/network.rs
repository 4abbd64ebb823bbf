//! Action-value network
//!
//! A three-layer perceptron (`input -> fc1 -> fc2 -> n_actions`) with ReLU
//! after the two hidden layers and a linear output, implemented in pure
//! ndarray with hand-written backpropagation and an Adam optimiser.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use signal_rl_core::{ActionValueFunction, RLError, Result};

/// Layer sizes of the value network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Observation length
    pub input_dims: usize,
    /// Width of the first hidden layer
    pub fc1_dims: usize,
    /// Width of the second hidden layer
    pub fc2_dims: usize,
    /// Number of actions (output width)
    pub n_actions: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_dims: 4,
            fc1_dims: 256,
            fc2_dims: 256,
            n_actions: 4,
        }
    }
}

impl NetworkConfig {
    /// Reject zero-width layers
    ///
    /// # Errors
    /// Returns [`RLError::Config`] naming the empty layer.
    pub fn validate(&self) -> Result<()> {
        for (name, width) in [
            ("input_dims", self.input_dims),
            ("fc1_dims", self.fc1_dims),
            ("fc2_dims", self.fc2_dims),
            ("n_actions", self.n_actions),
        ] {
            if width == 0 {
                return Err(RLError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    fn shapes(&self) -> [(usize, usize); 3] {
        [
            (self.input_dims, self.fc1_dims),
            (self.fc1_dims, self.fc2_dims),
            (self.fc2_dims, self.n_actions),
        ]
    }
}

/// Fully connected layer, weights stored as `(in, out)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weight matrix
    pub weights: Array2<f32>,
    /// Bias vector
    pub bias: Array1<f32>,
}

impl DenseLayer {
    /// Uniform initialisation in `±1/sqrt(fan_in)` for weights and bias
    #[allow(clippy::cast_precision_loss)]
    fn uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (fan_in as f32).sqrt();
        Self {
            weights: Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..=bound)),
            bias: Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..=bound)),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weights: Array2::zeros(self.weights.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    fn affine(&self, input: &ArrayView2<'_, f32>) -> Array2<f32> {
        input.dot(&self.weights) + &self.bias
    }
}

/// Serializable snapshot of all layer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    /// Layer sizes the weights were produced with
    pub config: NetworkConfig,
    /// Layers in forward order
    pub layers: Vec<DenseLayer>,
}

/// Adam with PyTorch's default betas and epsilon
#[derive(Debug, Clone)]
struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    first_moment: Vec<DenseLayer>,
    second_moment: Vec<DenseLayer>,
}

impl Adam {
    fn new(learning_rate: f32, layers: &[DenseLayer]) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            first_moment: layers.iter().map(DenseLayer::zeros_like).collect(),
            second_moment: layers.iter().map(DenseLayer::zeros_like).collect(),
        }
    }

    fn update(&mut self, layers: &mut [DenseLayer], grads: &[DenseLayer]) {
        self.step = self.step.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        let step_size = self.learning_rate / (1.0 - b1.powi(self.step));
        let bias_correction2 = (1.0 - b2.powi(self.step)).sqrt();

        let apply = |param: &mut f32, m: &mut f32, v: &mut f32, g: &f32| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *param -= step_size * *m / (v.sqrt() / bias_correction2 + eps);
        };

        for (((layer, grad), m), v) in layers
            .iter_mut()
            .zip(grads)
            .zip(&mut self.first_moment)
            .zip(&mut self.second_moment)
        {
            Zip::from(&mut layer.weights)
                .and(&mut m.weights)
                .and(&mut v.weights)
                .and(&grad.weights)
                .for_each(apply);
            Zip::from(&mut layer.bias)
                .and(&mut m.bias)
                .and(&mut v.bias)
                .and(&grad.bias)
                .for_each(apply);
        }
    }
}

/// Activations kept from a forward pass for backpropagation
struct ForwardCache {
    hidden1: Array2<f32>,
    hidden2: Array2<f32>,
    output: Array2<f32>,
}

/// Action-value network with its own optimiser
#[derive(Debug, Clone)]
pub struct QNetwork {
    config: NetworkConfig,
    layers: Vec<DenseLayer>,
    optimizer: Adam,
}

impl QNetwork {
    /// Create a network with freshly initialised weights
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for zero-width layers or a non-positive
    /// learning rate.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new<R: Rng + ?Sized>(config: NetworkConfig, learning_rate: f64, rng: &mut R) -> Result<Self> {
        config.validate()?;
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(RLError::Config(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        let layers: Vec<DenseLayer> = config
            .shapes()
            .iter()
            .map(|&(fan_in, fan_out)| DenseLayer::uniform(fan_in, fan_out, rng))
            .collect();
        let optimizer = Adam::new(learning_rate as f32, &layers);
        Ok(Self {
            config,
            layers,
            optimizer,
        })
    }

    /// Layer sizes
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn check_input(&self, width: usize) -> Result<()> {
        if width == self.config.input_dims {
            Ok(())
        } else {
            Err(RLError::DimensionMismatch {
                expected: self.config.input_dims,
                actual: width,
            })
        }
    }

    fn forward_cached(&self, input: &ArrayView2<'_, f32>) -> ForwardCache {
        let hidden1 = self.layers[0].affine(input).mapv_into(|v| v.max(0.0));
        let hidden2 = self.layers[1].affine(&hidden1.view()).mapv_into(|v| v.max(0.0));
        let output = self.layers[2].affine(&hidden2.view());
        ForwardCache {
            hidden1,
            hidden2,
            output,
        }
    }

    /// Action values for a batch of observations, shape `(batch, n_actions)`
    ///
    /// # Errors
    /// Returns [`RLError::DimensionMismatch`] when the rows are not
    /// `input_dims` wide.
    pub fn forward(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_input(input.ncols())?;
        Ok(self.forward_cached(&input).output)
    }

    /// Action values for a single observation
    ///
    /// # Errors
    /// Returns [`RLError::DimensionMismatch`] for an observation of the wrong
    /// length.
    pub fn predict(&self, observation: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        self.check_input(observation.len())?;
        let row = observation.insert_axis(Axis(0));
        Ok(self.forward_cached(&row).output.index_axis_move(Axis(0), 0))
    }

    /// One optimiser step minimising the mean squared error between the
    /// value of each taken action and its target
    ///
    /// Targets are constants; no gradient flows into whatever produced them.
    /// Returns the loss measured before the update.
    ///
    /// # Errors
    /// Returns [`RLError::DimensionMismatch`] for misaligned inputs,
    /// [`RLError::InvalidAction`] for an out-of-range action and
    /// [`RLError::Computation`] when the loss is not finite. The weights are
    /// left untouched on every error.
    #[allow(clippy::cast_precision_loss)]
    pub fn train_step(
        &mut self,
        states: ArrayView2<'_, f32>,
        actions: &[usize],
        targets: ArrayView1<'_, f32>,
    ) -> Result<f32> {
        self.check_input(states.ncols())?;
        let batch = states.nrows();
        for len in [actions.len(), targets.len()] {
            if len != batch {
                return Err(RLError::DimensionMismatch {
                    expected: batch,
                    actual: len,
                });
            }
        }
        if batch == 0 {
            return Err(RLError::Computation("empty training batch".to_string()));
        }
        if let Some(&bad) = actions.iter().find(|&&a| a >= self.config.n_actions) {
            return Err(RLError::InvalidAction(format!(
                "action {bad} outside [0, {})",
                self.config.n_actions
            )));
        }

        let cache = self.forward_cached(&states);
        let n = batch as f32;

        let mut grad_output = Array2::<f32>::zeros(cache.output.raw_dim());
        let mut loss = 0.0_f32;
        for (row, (&action, &target)) in actions.iter().zip(targets.iter()).enumerate() {
            let diff = cache.output[[row, action]] - target;
            loss += diff * diff;
            grad_output[[row, action]] = 2.0 * diff / n;
        }
        loss /= n;
        if !loss.is_finite() {
            return Err(RLError::Computation(format!("non-finite loss {loss}")));
        }

        let grads = self.backward(&states, &cache, &grad_output);
        self.optimizer.update(&mut self.layers, &grads);
        Ok(loss)
    }

    fn backward(
        &self,
        input: &ArrayView2<'_, f32>,
        cache: &ForwardCache,
        grad_output: &Array2<f32>,
    ) -> Vec<DenseLayer> {
        let relu_grad = |grad: Array2<f32>, activation: &Array2<f32>| {
            let mut grad = grad;
            Zip::from(&mut grad).and(activation).for_each(|g, &a| {
                if a <= 0.0 {
                    *g = 0.0;
                }
            });
            grad
        };

        let out = DenseLayer {
            weights: cache.hidden2.t().dot(grad_output),
            bias: grad_output.sum_axis(Axis(0)),
        };
        let grad_hidden2 = relu_grad(grad_output.dot(&self.layers[2].weights.t()), &cache.hidden2);
        let fc2 = DenseLayer {
            weights: cache.hidden1.t().dot(&grad_hidden2),
            bias: grad_hidden2.sum_axis(Axis(0)),
        };
        let grad_hidden1 = relu_grad(grad_hidden2.dot(&self.layers[1].weights.t()), &cache.hidden1);
        let fc1 = DenseLayer {
            weights: input.t().dot(&grad_hidden1),
            bias: grad_hidden1.sum_axis(Axis(0)),
        };
        vec![fc1, fc2, out]
    }

    /// Snapshot of the current parameters
    #[must_use]
    pub fn weights(&self) -> NetworkWeights {
        NetworkWeights {
            config: self.config,
            layers: self.layers.clone(),
        }
    }

    /// Replace the parameters with a snapshot
    ///
    /// Optimiser state is kept.
    ///
    /// # Errors
    /// Returns [`RLError::Checkpoint`] when the snapshot was produced with
    /// different layer sizes.
    pub fn load_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        let shapes_match = weights.layers.len() == 3
            && weights
                .layers
                .iter()
                .zip(self.config.shapes())
                .all(|(layer, (fan_in, fan_out))| {
                    layer.weights.dim() == (fan_in, fan_out) && layer.bias.len() == fan_out
                });
        if !shapes_match {
            return Err(RLError::Checkpoint(format!(
                "weights for {:?} do not fit a network of {:?}",
                weights.config, self.config
            )));
        }
        self.layers.clone_from(&weights.layers);
        Ok(())
    }

    /// Hard-copy another network's parameters into this one
    ///
    /// # Errors
    /// Returns [`RLError::Checkpoint`] when the layer sizes differ.
    pub fn copy_from(&mut self, other: &QNetwork) -> Result<()> {
        if other.config != self.config {
            return Err(RLError::Checkpoint(format!(
                "cannot copy {:?} into {:?}",
                other.config, self.config
            )));
        }
        self.layers.clone_from(&other.layers);
        Ok(())
    }
}

impl ActionValueFunction for QNetwork {
    fn action_values(&self, observation: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        self.predict(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small() -> NetworkConfig {
        NetworkConfig {
            input_dims: 3,
            fc1_dims: 8,
            fc2_dims: 8,
            n_actions: 4,
        }
    }

    fn network(seed: u64) -> QNetwork {
        let mut rng = StdRng::seed_from_u64(seed);
        QNetwork::new(small(), 0.01, &mut rng).unwrap()
    }

    #[test]
    fn initial_weights_respect_fan_in_bound() {
        let net = network(1);
        let weights = net.weights();
        let bound = 1.0 / 3.0_f32.sqrt();
        assert!(weights.layers[0].weights.iter().all(|w| w.abs() <= bound));
        assert!(weights.layers[0].bias.iter().all(|b| b.abs() <= bound));
        assert_eq!(weights.layers[2].weights.dim(), (8, 4));
    }

    #[test]
    fn forward_is_a_pure_function_of_weights_and_input() {
        let net = network(2);
        let input = arr2(&[[1.0_f32, 0.0, 2.0], [0.0, 3.0, 1.0]]);
        let first = net.forward(input.view()).unwrap();
        let second = net.forward(input.view()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.dim(), (2, 4));

        let single = net.predict(input.row(1)).unwrap();
        for (a, b) in single.iter().zip(first.row(1).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let net = network(3);
        assert!(matches!(
            net.predict(arr1(&[1.0_f32, 2.0]).view()),
            Err(RLError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn training_reduces_loss_on_a_fixed_batch() {
        let mut net = network(4);
        let states = arr2(&[[1.0_f32, 0.5, 0.0], [0.0, 1.0, 2.0], [2.0, 0.0, 1.0]]);
        let actions = [0, 2, 3];
        let targets = arr1(&[1.0_f32, -2.0, 0.5]);

        let first = net.train_step(states.view(), &actions, targets.view()).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net.train_step(states.view(), &actions, targets.view()).unwrap();
        }
        assert!(last < first * 0.1, "loss went from {first} to {last}");
    }

    #[test]
    fn non_finite_targets_leave_weights_untouched() {
        let mut net = network(5);
        let before = net.weights();
        let states = Array2::<f32>::ones((2, 3));
        let result = net.train_step(states.view(), &[0, 1], arr1(&[f32::NAN, 0.0]).view());
        assert!(matches!(result, Err(RLError::Computation(_))));
        assert_eq!(net.weights(), before);
    }

    #[test]
    fn out_of_range_action_is_rejected() {
        let mut net = network(6);
        let states = Array2::<f32>::ones((1, 3));
        assert!(net.train_step(states.view(), &[4], arr1(&[0.0]).view()).is_err());
    }

    #[test]
    fn copies_are_bit_identical() {
        let source = network(7);
        let mut copy = network(8);
        assert_ne!(source.weights(), copy.weights());
        copy.copy_from(&source).unwrap();
        assert_eq!(source.weights(), copy.weights());
    }

    #[test]
    fn weights_round_trip_through_json() {
        let net = network(9);
        let json = serde_json::to_string(&net.weights()).unwrap();
        let restored: NetworkWeights = serde_json::from_str(&json).unwrap();

        let mut other = network(10);
        other.load_weights(&restored).unwrap();
        assert_eq!(other.weights(), net.weights());
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let mut rng = StdRng::seed_from_u64(11);
        let wide = QNetwork::new(NetworkConfig::default(), 0.01, &mut rng).unwrap();
        let mut net = network(12);
        assert!(matches!(
            net.load_weights(&wide.weights()),
            Err(RLError::Checkpoint(_))
        ));
    }
}
