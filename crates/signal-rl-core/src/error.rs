//! Error types for the RL core library

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by the traffic simulator or its process
    #[error("Simulator error: {0}")]
    Simulator(String),

    /// Malformed or rejected simulator protocol exchange
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Junction index with no registered state
    #[error("Unknown junction: {0}")]
    UnknownJunction(usize),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Not enough stored transitions to draw a batch
    #[error("Insufficient samples: requested {requested}, available {available}")]
    InsufficientSamples {
        /// Requested batch size
        requested: usize,
        /// Transitions currently available
        available: usize,
    },

    /// Checkpoint could not be written or read back
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Numerical failure during a learning step
    #[error("Computation error: {0}")]
    Computation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;
