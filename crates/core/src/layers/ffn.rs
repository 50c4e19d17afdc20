//! Local feed-forward computation over this worker's weight shard.
//!
//! The dense layer here owns all per-element arithmetic; everything
//! cross-worker (partitioning, reduction) lives in
//! [`distributed`](crate::distributed). Weights arrive per call, already
//! sharded to the local intermediate size, and stay owned by the caller.

use candle_core::{bail, Result, Tensor};
use candle_nn::Activation;

use crate::config::FfnConfig;
use crate::distributed::partition::LocalFfnSizes;
use crate::tensor_map::{keys, TensorMap};

/// This worker's shard of one sublayer's FFN weights.
///
/// `up_proj` and `gate_proj` are `[local_inter, hidden]`, `down_proj` is
/// `[hidden, local_inter]`. `gate_proj` is present for gated activations
/// (SwiGLU and friends). No down-projection bias: a per-worker output bias
/// would be multiplied by world size after the cross-worker sum, so the
/// engines add it downstream of the reduction.
#[derive(Debug, Clone)]
pub struct FfnWeightShard {
    pub gate_proj: Option<Tensor>,
    pub up_proj: Tensor,
    pub down_proj: Tensor,
}

impl FfnWeightShard {
    pub fn gated(gate_proj: Tensor, up_proj: Tensor, down_proj: Tensor) -> Self {
        Self {
            gate_proj: Some(gate_proj),
            up_proj,
            down_proj,
        }
    }

    pub fn ungated(up_proj: Tensor, down_proj: Tensor) -> Self {
        Self {
            gate_proj: None,
            up_proj,
            down_proj,
        }
    }
}

/// Forward contract of the local compute layer.
///
/// Consumes `ffn_input` (LoRA keys, when present, are interpreted here or
/// ignored; they are opaque to the orchestration above), and produces
/// `ffn_output` in the output map with the exact shape the caller put
/// there. Device execution errors propagate to the caller.
pub trait FfnForward: Send + Sync {
    fn forward(
        &self,
        outputs: &mut TensorMap,
        inputs: &TensorMap,
        weights: &FfnWeightShard,
    ) -> Result<()>;
}

/// Dense FFN over the local shard: `down(act(gate(x)) * up(x))` when gated,
/// `down(act(up(x)))` otherwise.
#[derive(Debug, Clone)]
pub struct DenseFfn {
    hidden_size: usize,
    local: LocalFfnSizes,
    activation: Activation,
}

impl DenseFfn {
    /// Build from the global config and the already-partitioned local sizes.
    pub fn new(config: &FfnConfig, local: LocalFfnSizes) -> Result<Self> {
        let activation = match config.hidden_act.as_str() {
            "silu" | "swish" => Activation::Silu,
            "gelu" => Activation::Gelu,
            "gelu_new" | "gelu_pytorch_tanh" => Activation::NewGelu,
            "relu" => Activation::Relu,
            other => bail!("unsupported activation '{other}'"),
        };
        Ok(Self {
            hidden_size: config.hidden_size(),
            local,
            activation,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn local_sizes(&self) -> &LocalFfnSizes {
        &self.local
    }

    // Sublayer index from the map, when the caller provided one.
    fn layer_id(inputs: &TensorMap) -> Result<Option<usize>> {
        let Some(tensor) = inputs.get(keys::LAYER_ID) else {
            return Ok(None);
        };
        let ids = tensor.to_vec1::<u32>()?;
        match ids.first() {
            Some(&id) => Ok(Some(id as usize)),
            None => bail!("empty '{}' tensor", keys::LAYER_ID),
        }
    }

    fn check_shard(&self, weights: &FfnWeightShard, layer_id: Option<usize>) -> Result<()> {
        let (inter, hidden_in) = weights.up_proj.dims2()?;
        if hidden_in != self.hidden_size {
            bail!(
                "up_proj input dim {hidden_in} does not match hidden size {}",
                self.hidden_size
            );
        }
        let layer_id = layer_id.unwrap_or(0);
        let expected = self.local.intermediate_size_for_layer(layer_id);
        let padded = self.local.padding_size_for_layer(layer_id);
        if inter != expected && inter != padded {
            bail!(
                "up_proj intermediate dim {inter} does not match local shard size {expected} (padded {padded})"
            );
        }
        if let Some(gate) = &weights.gate_proj {
            if gate.dims2()? != (inter, hidden_in) {
                bail!("gate_proj shape {:?} does not match up_proj", gate.dims());
            }
        }
        let (hidden_out, inter_in) = weights.down_proj.dims2()?;
        if hidden_out != self.hidden_size || inter_in != inter {
            bail!(
                "down_proj shape {:?} does not match [{}, {inter}]",
                weights.down_proj.dims(),
                self.hidden_size
            );
        }
        Ok(())
    }
}

impl FfnForward for DenseFfn {
    fn forward(
        &self,
        outputs: &mut TensorMap,
        inputs: &TensorMap,
        weights: &FfnWeightShard,
    ) -> Result<()> {
        let Some(input) = inputs.get(keys::FFN_INPUT) else {
            bail!("missing '{}' tensor", keys::FFN_INPUT);
        };
        let Some(out_slot) = outputs.get(keys::FFN_OUTPUT) else {
            bail!("missing '{}' tensor", keys::FFN_OUTPUT);
        };
        let out_dims = out_slot.dims().to_vec();

        self.check_shard(weights, Self::layer_id(inputs)?)?;

        let up = input.matmul(&weights.up_proj.t()?)?;
        let intermediate = match &weights.gate_proj {
            Some(gate) => {
                let gated = input.matmul(&gate.t()?)?.apply(&self.activation)?;
                (gated * up)?
            }
            None => up.apply(&self.activation)?,
        };
        let output = intermediate.matmul(&weights.down_proj.t()?)?;

        if output.dims() != out_dims {
            bail!(
                "ffn output shape {:?} does not match output slot {:?}",
                output.dims(),
                out_dims
            );
        }
        outputs.insert(keys::FFN_OUTPUT, output);
        Ok(())
    }
}
