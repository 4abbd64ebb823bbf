//! Per-junction lane-occupancy observations

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Vehicle counts for each controlled lane group of one junction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneObservation {
    /// One count per lane group, in controlled-lane order
    pub counts: Vec<f32>,
}

impl LaneObservation {
    /// All-zero observation, used before a junction has been observed
    #[must_use]
    pub fn zeros(dim: usize) -> Self {
        Self {
            counts: vec![0.0; dim],
        }
    }

    /// Build an observation from integer vehicle counts
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(counts: &[usize]) -> Self {
        Self {
            counts: counts.iter().map(|&c| c as f32).collect(),
        }
    }

    /// Number of lane groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check whether the observation is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Borrow the raw values
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.counts
    }

    /// View as an ndarray vector
    #[must_use]
    pub fn view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(self.counts.as_slice())
    }

    /// Copy into an owned ndarray vector
    #[must_use]
    pub fn to_array(&self) -> Array1<f32> {
        Array1::from_vec(self.counts.clone())
    }
}

impl From<Vec<f32>> for LaneObservation {
    fn from(counts: Vec<f32>) -> Self {
        Self { counts }
    }
}

/// Fixed-length observation space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationSpace {
    /// Number of lane groups per junction
    pub dim: usize,
}

impl ObservationSpace {
    /// Create a new observation space
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Reject observations of the wrong length
    ///
    /// # Errors
    /// Returns [`crate::RLError::DimensionMismatch`] on a length mismatch.
    pub fn check(&self, values: &[f32]) -> crate::Result<()> {
        if values.len() == self.dim {
            Ok(())
        } else {
            Err(crate::RLError::DimensionMismatch {
                expected: self.dim,
                actual: values.len(),
            })
        }
    }
}
