//! Partition computation: global model dimensions to this worker's shard.

use crate::config::FfnConfig;

use super::error::{DistributedError, Result};

/// Local shard size for a global dimension split across `world_size` workers.
///
/// An uneven split has no well-defined shard, so it is a structural
/// configuration error rather than something to round.
pub fn local_size(global: usize, world_size: usize) -> Result<usize> {
    if world_size == 0 || global % world_size != 0 {
        return Err(DistributedError::UnevenPartition { global, world_size });
    }
    Ok(global / world_size)
}

/// Elementwise [`local_size`] over a per-sublayer size list.
///
/// Every entry is validated with the same divisibility check as the scalar
/// size; an uneven entry fails construction instead of sharding wrong.
pub fn local_sizes(global: &[usize], world_size: usize) -> Result<Vec<usize>> {
    global
        .iter()
        .map(|&size| local_size(size, world_size))
        .collect()
}

/// This worker's partitioned intermediate sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFfnSizes {
    pub intermediate_size: usize,
    pub intermediate_padding_size: usize,
    pub layer_intermediate_sizes: Vec<usize>,
    pub layer_intermediate_padding_sizes: Vec<usize>,
}

impl LocalFfnSizes {
    /// Partition a layer configuration for a group of `world_size` workers.
    pub fn partition(config: &FfnConfig, world_size: usize) -> Result<Self> {
        Ok(Self {
            intermediate_size: local_size(config.intermediate_size, world_size)?,
            intermediate_padding_size: local_size(config.intermediate_padding_size, world_size)?,
            layer_intermediate_sizes: local_sizes(&config.layer_intermediate_sizes, world_size)?,
            layer_intermediate_padding_sizes: local_sizes(
                &config.layer_intermediate_padding_sizes,
                world_size,
            )?,
        })
    }

    /// Local intermediate size for a given sublayer.
    pub fn intermediate_size_for_layer(&self, layer_id: usize) -> usize {
        self.layer_intermediate_sizes
            .get(layer_id)
            .copied()
            .unwrap_or(self.intermediate_size)
    }

    /// Local padded intermediate size for a given sublayer.
    pub fn padding_size_for_layer(&self, layer_id: usize) -> usize {
        self.layer_intermediate_padding_sizes
            .get(layer_id)
            .copied()
            .unwrap_or(self.intermediate_padding_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_size_divides_evenly() {
        for world_size in [1, 2, 4, 8] {
            let local = local_size(11008 * 8, world_size).unwrap();
            assert_eq!(local * world_size, 11008 * 8);
        }
    }

    #[test]
    fn local_size_rejects_uneven_split() {
        let err = local_size(11008, 3).unwrap_err();
        assert!(err.to_string().contains("not divisible"));
    }

    #[test]
    fn local_size_rejects_zero_world() {
        assert!(local_size(128, 0).is_err());
    }

    #[test]
    fn local_sizes_elementwise() {
        let locals = local_sizes(&[1024, 2048, 4096], 4).unwrap();
        assert_eq!(locals, vec![256, 512, 1024]);
    }

    #[test]
    fn local_sizes_rejects_uneven_entry() {
        // Scalar size divides; the second list entry does not.
        assert!(local_sizes(&[1024, 1000], 4).is_err());
    }

    #[test]
    fn partition_config() {
        let cfg = FfnConfig {
            intermediate_size: 8192,
            intermediate_padding_size: 8448,
            layer_intermediate_sizes: vec![8192, 4096],
            layer_intermediate_padding_sizes: vec![8448, 4096],
            ..FfnConfig::default()
        };
        let local = LocalFfnSizes::partition(&cfg, 4).unwrap();
        assert_eq!(local.intermediate_size, 2048);
        assert_eq!(local.intermediate_padding_size, 2112);
        assert_eq!(local.layer_intermediate_sizes, vec![2048, 1024]);
        assert_eq!(local.intermediate_size_for_layer(1), 1024);
        assert_eq!(local.intermediate_size_for_layer(9), 2048);
        assert_eq!(local.padding_size_for_layer(0), 2112);
    }
}
