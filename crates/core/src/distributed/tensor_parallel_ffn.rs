//! Tensor-parallel FFN orchestration.
//!
//! Each worker holds `1/world_size` of the FFN intermediate dimension and
//! computes a partial output of the full `[token_count, hidden_size]`
//! shape; the partials are summed across the group before the sublayer's
//! output is consumed. This module owns the partitioning at construction
//! and the reduction-path selection per forward call; the arithmetic lives
//! in [`layers`](crate::layers), the collectives behind
//! [`DeviceCommunicator`] / [`CustomAllReduce`].

use std::sync::Arc;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::config::FfnConfig;
use crate::layers::{DenseFfn, FfnForward, FfnWeightShard};
use crate::tensor_map::{keys, TensorMap};

use super::communicator::{DeviceCommunicator, ReduceOp};
use super::custom_all_reduce::CustomAllReduce;
use super::error::{DistributedError, Result};
use super::partition::LocalFfnSizes;

/// One worker's view of a tensor-parallel feed-forward sublayer.
///
/// Built once per sublayer per worker process. Calls on one instance must
/// be serialized; all workers in the group must issue forward calls in
/// identical order or the group's collectives stall.
///
/// Cloning duplicates the configuration and re-shares the communicator and
/// custom channel handles — the underlying channel exists once per worker.
#[derive(Clone)]
pub struct TensorParallelFfn {
    ffn: Arc<dyn FfnForward>,
    config: FfnConfig,
    comm: Arc<dyn DeviceCommunicator>,
    custom_all_reduce: Option<Arc<dyn CustomAllReduce>>,
    device: Device,
    do_all_reduce: bool,
    enable_custom_all_reduce: bool,
}

impl std::fmt::Debug for TensorParallelFfn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorParallelFfn")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("do_all_reduce", &self.do_all_reduce)
            .field("enable_custom_all_reduce", &self.enable_custom_all_reduce)
            .finish_non_exhaustive()
    }
}

impl TensorParallelFfn {
    /// Partition `config` for the communicator's worker group and build the
    /// local compute layer from the partitioned sizes.
    ///
    /// Fails with [`DistributedError::UnevenPartition`] when the global
    /// intermediate size (or any per-sublayer entry) does not divide evenly
    /// by the group's world size; there is no usable layer in that case.
    pub fn new(
        config: FfnConfig,
        comm: Arc<dyn DeviceCommunicator>,
        custom_all_reduce: Option<Arc<dyn CustomAllReduce>>,
        device: Device,
    ) -> Result<Self> {
        let world_size = comm.process_group().world_size();
        let local = LocalFfnSizes::partition(&config, world_size)?;
        let ffn = DenseFfn::new(&config, local)?;
        Ok(Self::from_parts(
            Arc::new(ffn),
            config,
            comm,
            custom_all_reduce,
            device,
        ))
    }

    /// Compose over an externally built local compute layer.
    pub fn from_parts(
        ffn: Arc<dyn FfnForward>,
        config: FfnConfig,
        comm: Arc<dyn DeviceCommunicator>,
        custom_all_reduce: Option<Arc<dyn CustomAllReduce>>,
        device: Device,
    ) -> Self {
        let do_all_reduce = config.do_all_reduce;
        let enable_custom_all_reduce = config.enable_custom_all_reduce;
        Self {
            ffn,
            config,
            comm,
            custom_all_reduce,
            device,
            do_all_reduce,
            enable_custom_all_reduce,
        }
    }

    pub fn config(&self) -> &FfnConfig {
        &self.config
    }

    pub fn world_size(&self) -> usize {
        self.comm.process_group().world_size()
    }

    pub fn rank(&self) -> usize {
        self.comm.process_group().rank()
    }

    /// Forward pass over named tensor maps.
    ///
    /// `outputs` must hold `ffn_output` with shape
    /// `[token_count, hidden_size]`; `inputs` must hold `ffn_input` (plus
    /// the LoRA keys when the caller uses them — they pass through to the
    /// local layer unmodified). On return the `ffn_output` slot holds the
    /// group-reduced activation, same shape. With `do_all_reduce` off or a
    /// single-worker group the slot holds the unreduced local partial,
    /// which is the intended behavior when the caller reduces elsewhere.
    pub fn forward(
        &self,
        outputs: &mut TensorMap,
        inputs: &TensorMap,
        weights: &FfnWeightShard,
    ) -> Result<()> {
        let out = outputs
            .get(keys::FFN_OUTPUT)
            .ok_or(DistributedError::MissingTensor {
                key: keys::FFN_OUTPUT,
            })?;
        let (token_count, hidden_size) = out.dims2().map_err(DistributedError::from)?;
        let elem_count = token_count * hidden_size;
        debug!(token_count, hidden_size, rank = self.rank(), "ffn forward");

        // Stage the output slot in the channel's preregistered buffer so the
        // local layer writes into memory the peers can reduce without a copy.
        let channel = if self.enable_custom_all_reduce {
            self.custom_all_reduce.as_deref()
        } else {
            None
        };
        let swapped = channel
            .map(|ch| ch.try_swap_buffer(out, elem_count))
            .unwrap_or(false);

        // Local partial result, written into the (possibly swapped) slot.
        self.ffn.forward(outputs, inputs, weights)?;

        if self.do_all_reduce && self.world_size() > 1 {
            let partial = outputs
                .get(keys::FFN_OUTPUT)
                .ok_or(DistributedError::MissingTensor {
                    key: keys::FFN_OUTPUT,
                })?;
            let reduced = match (swapped, channel) {
                (true, Some(ch)) => {
                    debug!(elem_count, "custom all-reduce");
                    ch.all_reduce(partial, elem_count)?
                }
                _ => {
                    debug!(elem_count, "collective all-reduce");
                    self.comm.all_reduce(partial, ReduceOp::Sum)?
                }
            };
            if reduced.dims() != partial.dims() {
                return Err(DistributedError::ShapeMismatch {
                    expected: partial.dims().to_vec(),
                    actual: reduced.dims().to_vec(),
                });
            }
            outputs.insert(keys::FFN_OUTPUT, reduced);
        }

        // Surface any asynchronous device fault before handing the output
        // downstream; stream ordering already sequences compute and reduce.
        self.device.synchronize().map_err(DistributedError::from)?;
        Ok(())
    }

    /// Positional-tensor adapter: wraps one input/output pair into the map
    /// convention and runs [`forward`](Self::forward).
    pub fn forward_tensors(
        &self,
        ffn_output: &Tensor,
        ffn_input: &Tensor,
        weights: &FfnWeightShard,
    ) -> Result<Tensor> {
        let mut inputs = TensorMap::new();
        inputs.insert(keys::FFN_INPUT, ffn_input.clone());
        let mut outputs = TensorMap::new();
        outputs.insert(keys::FFN_OUTPUT, ffn_output.clone());

        self.forward(&mut outputs, &inputs, weights)?;
        outputs
            .remove(keys::FFN_OUTPUT)
            .ok_or(DistributedError::MissingTensor {
                key: keys::FFN_OUTPUT,
            })
    }

    /// LoRA-aware adapter: additionally packages the sublayer id, adapter
    /// ids, per-request input lengths, and the per-call batch size. The
    /// extra tensors are opaque here; the local layer interprets them.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_with_lora(
        &self,
        ffn_output: &Tensor,
        ffn_input: &Tensor,
        layer_id: u32,
        lora_ids: &Tensor,
        lora_input_lengths: &Tensor,
        lora_batch_size: u32,
        weights: &FfnWeightShard,
    ) -> Result<Tensor> {
        let host = Device::Cpu;
        let mut inputs = TensorMap::new();
        inputs.insert(keys::FFN_INPUT, ffn_input.clone());
        inputs.insert(keys::LAYER_ID, Tensor::new(&[layer_id], &host)?);
        inputs.insert(keys::LORA_IDS, lora_ids.clone());
        inputs.insert(keys::LORA_INPUT_LENGTHS, lora_input_lengths.clone());
        inputs.insert(keys::BATCH_SIZE, Tensor::new(&[lora_batch_size], &host)?);
        let mut outputs = TensorMap::new();
        outputs.insert(keys::FFN_OUTPUT, ffn_output.clone());

        self.forward(&mut outputs, &inputs, weights)?;
        outputs
            .remove(keys::FFN_OUTPUT)
            .ok_or(DistributedError::MissingTensor {
                key: keys::FFN_OUTPUT,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{LocalProcessGroup, MockCommunicator};
    use crate::testing::{eye, PeerSumAllReduce, PeerSumCommunicator};
    use candle_core::{DType, Device};

    fn tiny_config() -> FfnConfig {
        FfnConfig {
            num_attention_heads: 2,
            head_dim: 2,
            intermediate_size: 8,
            intermediate_padding_size: 8,
            hidden_act: "relu".to_string(),
            ..FfnConfig::default()
        }
    }

    fn identity_shard(hidden: usize, inter: usize) -> FfnWeightShard {
        // up = [inter, hidden] with identity in the top block, down = transpose.
        let up = eye(inter.max(hidden))
            .narrow(0, 0, inter)
            .unwrap()
            .narrow(1, 0, hidden)
            .unwrap()
            .contiguous()
            .unwrap();
        let down = up.t().unwrap().contiguous().unwrap();
        FfnWeightShard::ungated(up, down)
    }

    #[test]
    fn uneven_partition_fails_construction() {
        let cfg = FfnConfig {
            intermediate_size: 10,
            intermediate_padding_size: 10,
            ..tiny_config()
        };
        let comm = Arc::new(MockCommunicator::new(LocalProcessGroup::with_rank(0, 4)));
        let err = TensorParallelFfn::new(cfg, comm, None, Device::Cpu).unwrap_err();
        assert!(matches!(
            err,
            DistributedError::UnevenPartition {
                global: 10,
                world_size: 4
            }
        ));
    }

    #[test]
    fn uneven_per_layer_entry_fails_construction() {
        let cfg = FfnConfig {
            layer_intermediate_sizes: vec![8, 6],
            layer_intermediate_padding_sizes: vec![8, 6],
            ..tiny_config()
        };
        let comm = Arc::new(MockCommunicator::new(LocalProcessGroup::with_rank(0, 4)));
        assert!(TensorParallelFfn::new(cfg, comm, None, Device::Cpu).is_err());
    }

    #[test]
    fn single_worker_reduce_is_noop() {
        let comm = Arc::new(PeerSumCommunicator::poisoned(LocalProcessGroup::new()));
        let layer = TensorParallelFfn::new(tiny_config(), comm, None, Device::Cpu).unwrap();

        let input =
            Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 4), &Device::Cpu).unwrap();
        let out_slot = Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap();
        let weights = identity_shard(4, 8);

        // A poisoned communicator errors on any group call; world size 1
        // must never reach it.
        let out = layer.forward_tensors(&out_slot, &input, &weights).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn missing_output_tensor_is_an_error() {
        let comm = Arc::new(MockCommunicator::new(LocalProcessGroup::new()));
        let layer = TensorParallelFfn::new(tiny_config(), comm, None, Device::Cpu).unwrap();

        let mut inputs = TensorMap::new();
        inputs.insert(
            keys::FFN_INPUT,
            Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap(),
        );
        let mut outputs = TensorMap::new();
        let err = layer
            .forward(&mut outputs, &inputs, &identity_shard(4, 8))
            .unwrap_err();
        assert!(matches!(
            err,
            DistributedError::MissingTensor { key } if key == keys::FFN_OUTPUT
        ));
    }

    #[test]
    fn clone_reshares_custom_channel() {
        let comm = Arc::new(MockCommunicator::new(LocalProcessGroup::with_rank(0, 2)));
        let channel: Arc<dyn CustomAllReduce> =
            Arc::new(PeerSumAllReduce::new(Vec::new(), usize::MAX));
        let cfg = FfnConfig {
            enable_custom_all_reduce: true,
            ..tiny_config()
        };
        let layer =
            TensorParallelFfn::new(cfg, comm, Some(channel.clone()), Device::Cpu).unwrap();
        let copy = layer.clone();

        let a = layer.custom_all_reduce.as_ref().unwrap();
        let b = copy.custom_all_reduce.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(copy.config().intermediate_size, layer.config().intermediate_size);
    }

    #[test]
    fn do_all_reduce_false_keeps_local_partial() {
        let peer = Tensor::full(7f32, (1, 4), &Device::Cpu).unwrap();
        let comm = Arc::new(PeerSumCommunicator::new(
            LocalProcessGroup::with_rank(0, 2),
            vec![peer],
        ));
        let cfg = FfnConfig {
            do_all_reduce: false,
            ..tiny_config()
        };
        let layer = TensorParallelFfn::new(cfg, comm, None, Device::Cpu).unwrap();

        let input = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 4), &Device::Cpu).unwrap();
        let out_slot = Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap();
        // World size 2: the local shard is half the global intermediate size.
        let out = layer
            .forward_tensors(&out_slot, &input, &identity_shard(4, 4))
            .unwrap();

        // Peer contribution must not appear.
        assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0, 3.0, 4.0]]);
    }
}
