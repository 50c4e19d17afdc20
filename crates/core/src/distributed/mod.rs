//! Tensor-parallel orchestration: partitioning, worker groups, collectives.
//!
//! The forward path per inference step: optionally stage the output slot in
//! the custom channel's preregistered buffer, run the local compute layer,
//! then sum partial results across the group via whichever channel was
//! prepared. Single-worker groups skip the group call entirely.

mod communicator;
mod custom_all_reduce;
mod error;
pub mod partition;
mod process_group;
mod tensor_parallel_ffn;

pub use communicator::{DeviceCommunicator, MockCommunicator, ReduceOp};
pub use custom_all_reduce::CustomAllReduce;
pub use error::{DistributedError, Result};
pub use partition::{local_size, local_sizes, LocalFfnSizes};
pub use process_group::{LocalProcessGroup, ProcessGroup};
pub use tensor_parallel_ffn::TensorParallelFfn;
