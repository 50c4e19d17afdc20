//! Collective reduction primitive.
//!
//! [`DeviceCommunicator`] is the general cross-worker collective the forward
//! pass falls back to when the preregistered-buffer channel is unavailable.
//! Group semantics: every worker must issue a matching call with the same
//! element count, or the group stalls. There is no timeout at this layer; a
//! hung collective is fatal for the whole group.

use candle_core::Tensor;

use super::error::Result;
use super::process_group::ProcessGroup;

/// Reduction operations for collective primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Element-wise sum.
    Sum,
    /// Element-wise minimum.
    Min,
    /// Element-wise maximum.
    Max,
    /// Average (sum / world_size).
    Average,
}

/// Cross-worker collective operations.
///
/// Implementations back this with NCCL (or similar) for real multi-device
/// groups; for a single worker every operation is identity and no group
/// call is issued.
pub trait DeviceCommunicator: Send + Sync {
    /// The worker group this communicator operates on.
    fn process_group(&self) -> &dyn ProcessGroup;

    /// Apply `op` across all workers; every worker receives the result.
    ///
    /// The result has exactly the shape of `tensor`. Blocking for the
    /// group: all members must call with the same element count.
    fn all_reduce(&self, tensor: &Tensor, op: ReduceOp) -> Result<Tensor>;

    /// Synchronize all workers.
    fn barrier(&self) -> Result<()>;
}

/// Communicator for single-worker execution.
///
/// Collectives are identity since there is only one rank. Also usable as a
/// stand-in rank of a larger group when the test only exercises control
/// flow, not reduction values.
pub struct MockCommunicator<P: ProcessGroup> {
    process_group: P,
}

impl<P: ProcessGroup> MockCommunicator<P> {
    pub fn new(process_group: P) -> Self {
        Self { process_group }
    }
}

impl<P: ProcessGroup + Send + Sync> DeviceCommunicator for MockCommunicator<P> {
    fn process_group(&self) -> &dyn ProcessGroup {
        &self.process_group
    }

    fn all_reduce(&self, tensor: &Tensor, _op: ReduceOp) -> Result<Tensor> {
        Ok(tensor.clone())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}
