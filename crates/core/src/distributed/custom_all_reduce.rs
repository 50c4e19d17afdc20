//! Optional zero-copy reduction channel.
//!
//! Some communication backends keep a preregistered buffer that peers can
//! read directly, avoiding the copy into a collective library's staging
//! area. The channel exposes two operations: a buffer swap that substitutes
//! a tensor's backing storage with the registered buffer for the duration of
//! one forward call, and a reduce over that buffer. Buffer registration and
//! the wire protocol are the backend's concern, not this crate's.

use candle_core::Tensor;

use super::error::Result;

/// Preregistered-buffer all-reduce channel.
///
/// Shared across clones of a layer via `Arc`; the underlying channel and
/// its buffer exist once per worker.
pub trait CustomAllReduce: Send + Sync {
    /// Try to stage `tensor`'s storage in the preregistered buffer.
    ///
    /// Returns `false` when the channel cannot take this call (element
    /// count exceeds the registered capacity, buffer busy); the caller then
    /// uses the general collective instead. A `true` return obligates the
    /// caller to follow up with exactly one [`all_reduce`](Self::all_reduce)
    /// of the same element count.
    fn try_swap_buffer(&self, tensor: &Tensor, elem_count: usize) -> bool;

    /// Sum the swapped buffer across all workers.
    ///
    /// `tensor` is this worker's partial result occupying the swapped
    /// buffer; the returned tensor is the group sum, same shape. Calling
    /// this without a prior successful swap of `elem_count` elements is a
    /// protocol violation and must fail, never silently reduce.
    fn all_reduce(&self, tensor: &Tensor, elem_count: usize) -> Result<Tensor>;
}
