//! Shared test utilities.
//!
//! Simulated group collectives so reduction semantics are testable in one
//! process without devices: each helper is primed with the OTHER workers'
//! known partial results and returns the elementwise group sum.

mod collectives;

use candle_core::{Device, Tensor};

pub use collectives::{PeerSumAllReduce, PeerSumCommunicator};

/// `n x n` f32 identity matrix on the host.
pub fn eye(n: usize) -> Tensor {
    let mut data = vec![0f32; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0;
    }
    Tensor::from_vec(data, (n, n), &Device::Cpu).expect("identity tensor")
}
