//! Error types for the tensor-parallel layer.

use thiserror::Error;

/// Errors surfaced by partitioning, collectives, and the forward pass.
#[derive(Error, Debug)]
pub enum DistributedError {
    /// A global dimension cannot be split evenly across the worker group.
    /// Detected once, at construction; there is no recovery path.
    #[error("size {global} is not divisible by world_size {world_size}")]
    UnevenPartition { global: usize, world_size: usize },

    /// A required entry is missing from a named tensor map.
    #[error("missing required tensor '{key}'")]
    MissingTensor { key: &'static str },

    /// A collective produced a tensor of a different shape than its input.
    #[error("tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The preregistered-buffer channel was used out of contract
    /// (e.g. reduce without a prior successful buffer swap).
    #[error("custom all-reduce protocol violation: {0}")]
    CustomAllReduceProtocol(String),

    /// Underlying tensor or device operation failed.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, DistributedError>;
