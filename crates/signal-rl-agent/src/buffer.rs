//! Per-junction replay memory
//!
//! Each junction owns a fixed-capacity ring of transitions stored as
//! parallel arrays. Writes land at `mem_cntr % capacity` and overwrite the
//! oldest entry once the ring is full; samples are drawn uniformly without
//! replacement from the filled part.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use signal_rl_core::{RLError, Result, Transition, TransitionBatch};

/// Fixed-capacity ring of transitions for one junction
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    capacity: usize,
    states: Array2<f32>,
    next_states: Array2<f32>,
    rewards: Array1<f32>,
    actions: Vec<usize>,
    terminals: Vec<bool>,
    mem_cntr: usize,
}

impl ReplayMemory {
    /// Create an empty memory
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for a zero capacity or observation length.
    pub fn new(capacity: usize, input_dims: usize) -> Result<Self> {
        if capacity == 0 || input_dims == 0 {
            return Err(RLError::Config(format!(
                "replay memory needs a positive capacity and width, got {capacity}x{input_dims}"
            )));
        }
        Ok(Self {
            capacity,
            states: Array2::zeros((capacity, input_dims)),
            next_states: Array2::zeros((capacity, input_dims)),
            rewards: Array1::zeros(capacity),
            actions: vec![0; capacity],
            terminals: vec![false; capacity],
            mem_cntr: 0,
        })
    }

    /// Maximum number of transitions held
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of stores since creation or the last reset
    #[must_use]
    pub fn mem_cntr(&self) -> usize {
        self.mem_cntr
    }

    /// Number of transitions that can be sampled
    #[must_use]
    pub fn len(&self) -> usize {
        self.mem_cntr.min(self.capacity)
    }

    /// Check whether nothing can be sampled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mem_cntr == 0
    }

    /// Ring index the next store will write to
    #[must_use]
    pub fn write_index(&self) -> usize {
        self.mem_cntr % self.capacity
    }

    /// Write a transition at the current ring index
    ///
    /// # Errors
    /// Returns [`RLError::DimensionMismatch`] when either observation does not
    /// match the memory width.
    pub fn store(&mut self, transition: &Transition) -> Result<()> {
        let width = self.states.ncols();
        for obs in [&transition.state, &transition.next_state] {
            if obs.len() != width {
                return Err(RLError::DimensionMismatch {
                    expected: width,
                    actual: obs.len(),
                });
            }
        }

        let index = self.write_index();
        self.states.row_mut(index).assign(&transition.state.view());
        self.next_states.row_mut(index).assign(&transition.next_state.view());
        self.rewards[index] = transition.reward.value();
        self.actions[index] = transition.action.index();
        self.terminals[index] = transition.done;
        self.mem_cntr += 1;
        Ok(())
    }

    /// Transition stored at a ring index, if that slot has been written
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Transition> {
        (index < self.len()).then(|| {
            Transition::new(
                self.states.row(index).to_vec(),
                self.next_states.row(index).to_vec(),
                self.actions[index],
                self.rewards[index],
                self.terminals[index],
            )
        })
    }

    /// Draw `batch_size` distinct transitions uniformly at random
    ///
    /// # Errors
    /// Returns [`RLError::InsufficientSamples`] when fewer than `batch_size`
    /// transitions are stored.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<TransitionBatch> {
        let available = self.len();
        if batch_size > available {
            return Err(RLError::InsufficientSamples {
                requested: batch_size,
                available,
            });
        }
        let indices = rand::seq::index::sample(rng, available, batch_size).into_vec();
        Ok(TransitionBatch {
            states: self.states.select(Axis(0), &indices),
            next_states: self.next_states.select(Axis(0), &indices),
            rewards: self.rewards.select(Axis(0), &indices),
            actions: indices.iter().map(|&i| self.actions[i]).collect(),
            terminals: indices.iter().map(|&i| self.terminals[i]).collect(),
        })
    }

    /// Forget everything by rewinding the counter
    ///
    /// Old slots keep their contents but become unreachable until
    /// overwritten.
    pub fn reset(&mut self) {
        self.mem_cntr = 0;
    }
}

/// Replay memories keyed by junction index
#[derive(Debug, Clone)]
pub struct MemoryBank {
    capacity: usize,
    input_dims: usize,
    memories: BTreeMap<usize, ReplayMemory>,
}

impl MemoryBank {
    /// Create an empty bank whose memories share one capacity and width
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for a zero capacity or width.
    pub fn new(capacity: usize, input_dims: usize) -> Result<Self> {
        if capacity == 0 || input_dims == 0 {
            return Err(RLError::Config(format!(
                "replay memory needs a positive capacity and width, got {capacity}x{input_dims}"
            )));
        }
        Ok(Self {
            capacity,
            input_dims,
            memories: BTreeMap::new(),
        })
    }

    /// Give a junction a fresh, empty memory
    ///
    /// Any existing memory of the junction is rewound, not reallocated.
    ///
    /// # Errors
    /// Returns [`RLError::Config`] if the memory cannot be allocated.
    pub fn reset(&mut self, junction: usize) -> Result<()> {
        match self.memories.get_mut(&junction) {
            Some(memory) => memory.reset(),
            None => {
                self.memories
                    .insert(junction, ReplayMemory::new(self.capacity, self.input_dims)?);
            }
        }
        Ok(())
    }

    /// Store a transition, creating the junction's memory on first use
    ///
    /// # Errors
    /// Propagates [`ReplayMemory::store`] errors.
    pub fn store(&mut self, junction: usize, transition: &Transition) -> Result<()> {
        if !self.memories.contains_key(&junction) {
            self.reset(junction)?;
        }
        self.memory_mut(junction)?.store(transition)
    }

    /// Memory of a junction
    ///
    /// # Errors
    /// Returns [`RLError::UnknownJunction`] when nothing was stored for it.
    pub fn memory(&self, junction: usize) -> Result<&ReplayMemory> {
        self.memories
            .get(&junction)
            .ok_or(RLError::UnknownJunction(junction))
    }

    fn memory_mut(&mut self, junction: usize) -> Result<&mut ReplayMemory> {
        self.memories
            .get_mut(&junction)
            .ok_or(RLError::UnknownJunction(junction))
    }

    /// Junction indices with a memory, in ascending order
    pub fn junctions(&self) -> impl Iterator<Item = usize> + '_ {
        self.memories.keys().copied()
    }

    /// Number of junctions with a memory
    #[must_use]
    pub fn len(&self) -> usize {
        self.memories.len()
    }

    /// Check whether no junction has a memory
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}
