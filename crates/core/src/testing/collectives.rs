//! Simulated collectives for single-process tests.

use std::sync::Mutex;

use candle_core::Tensor;

use crate::distributed::{
    CustomAllReduce, DeviceCommunicator, DistributedError, LocalProcessGroup, ProcessGroup,
    ReduceOp, Result,
};

fn sum_with_peers(tensor: &Tensor, peers: &[Tensor]) -> Result<Tensor> {
    let mut acc = tensor.clone();
    for peer in peers {
        if peer.dims() != tensor.dims() {
            return Err(DistributedError::ShapeMismatch {
                expected: tensor.dims().to_vec(),
                actual: peer.dims().to_vec(),
            });
        }
        acc = (&acc + peer).map_err(DistributedError::from)?;
    }
    Ok(acc)
}

/// Communicator standing in for one rank of a group whose other members'
/// partial results are known up front. `all_reduce(Sum)` returns the input
/// plus every peer partial.
pub struct PeerSumCommunicator {
    group: LocalProcessGroup,
    peers: Vec<Tensor>,
    poisoned: bool,
}

impl PeerSumCommunicator {
    pub fn new(group: LocalProcessGroup, peers: Vec<Tensor>) -> Self {
        Self {
            group,
            peers,
            poisoned: false,
        }
    }

    /// A communicator that fails on any group call. Used to prove a code
    /// path never issues a collective (e.g. the single-worker bypass).
    pub fn poisoned(group: LocalProcessGroup) -> Self {
        Self {
            group,
            peers: Vec::new(),
            poisoned: true,
        }
    }
}

impl DeviceCommunicator for PeerSumCommunicator {
    fn process_group(&self) -> &dyn ProcessGroup {
        &self.group
    }

    fn all_reduce(&self, tensor: &Tensor, op: ReduceOp) -> Result<Tensor> {
        if self.poisoned {
            return Err(DistributedError::TensorError(candle_core::Error::Msg(
                "unexpected collective call".to_string(),
            )));
        }
        if op != ReduceOp::Sum {
            return Err(DistributedError::TensorError(candle_core::Error::Msg(
                format!("unsupported reduce op {op:?}"),
            )));
        }
        sum_with_peers(tensor, &self.peers)
    }

    fn barrier(&self) -> Result<()> {
        if self.poisoned {
            return Err(DistributedError::TensorError(candle_core::Error::Msg(
                "unexpected barrier call".to_string(),
            )));
        }
        Ok(())
    }
}

/// Custom channel double with a fixed buffer capacity and known peer
/// partials. Enforces the swap-before-reduce protocol the way a real
/// channel's registered buffer does.
pub struct PeerSumAllReduce {
    peers: Vec<Tensor>,
    capacity: usize,
    swapped: Mutex<Option<usize>>,
}

impl PeerSumAllReduce {
    pub fn new(peers: Vec<Tensor>, capacity: usize) -> Self {
        Self {
            peers,
            capacity,
            swapped: Mutex::new(None),
        }
    }

    /// Number of successful swaps is observable through this for tests
    /// asserting which reduction path ran.
    pub fn swap_pending(&self) -> bool {
        self.swapped.lock().expect("swap state").is_some()
    }
}

impl CustomAllReduce for PeerSumAllReduce {
    fn try_swap_buffer(&self, tensor: &Tensor, elem_count: usize) -> bool {
        if elem_count > self.capacity || tensor.elem_count() != elem_count {
            return false;
        }
        *self.swapped.lock().expect("swap state") = Some(elem_count);
        true
    }

    fn all_reduce(&self, tensor: &Tensor, elem_count: usize) -> Result<Tensor> {
        let staged = self.swapped.lock().expect("swap state").take();
        match staged {
            Some(n) if n == elem_count => sum_with_peers(tensor, &self.peers),
            Some(n) => Err(DistributedError::CustomAllReduceProtocol(format!(
                "reduce of {elem_count} elements after swap of {n}"
            ))),
            None => Err(DistributedError::CustomAllReduceProtocol(
                "reduce without a prior buffer swap".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn ones(shape: &[usize]) -> Tensor {
        Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn peer_sum_adds_all_partials() {
        let comm = PeerSumCommunicator::new(
            LocalProcessGroup::with_rank(0, 3),
            vec![ones(&[2, 2]), ones(&[2, 2])],
        );
        let out = comm.all_reduce(&ones(&[2, 2]), ReduceOp::Sum).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![3.0, 3.0]; 2]);
    }

    #[test]
    fn poisoned_communicator_rejects_collectives() {
        let comm = PeerSumCommunicator::poisoned(LocalProcessGroup::new());
        assert!(comm.all_reduce(&ones(&[1]), ReduceOp::Sum).is_err());
        assert!(comm.barrier().is_err());
    }

    #[test]
    fn swap_respects_capacity() {
        let ch = PeerSumAllReduce::new(Vec::new(), 4);
        assert!(!ch.try_swap_buffer(&ones(&[2, 4]), 8));
        assert!(ch.try_swap_buffer(&ones(&[2, 2]), 4));
        assert!(ch.swap_pending());
    }

    #[test]
    fn reduce_without_swap_is_protocol_error() {
        let ch = PeerSumAllReduce::new(Vec::new(), 16);
        let err = ch.all_reduce(&ones(&[2, 2]), 4).unwrap_err();
        assert!(matches!(err, DistributedError::CustomAllReduceProtocol(_)));
    }

    #[test]
    fn swap_then_reduce_sums_peers() {
        let ch = PeerSumAllReduce::new(vec![ones(&[2, 2])], 16);
        assert!(ch.try_swap_buffer(&ones(&[2, 2]), 4));
        let out = ch.all_reduce(&ones(&[2, 2]), 4).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![2.0, 2.0]; 2]);
        assert!(!ch.swap_pending());
    }
}
