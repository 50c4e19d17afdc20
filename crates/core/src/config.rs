use serde::Deserialize;

/// Configuration for one tensor-parallel feed-forward sublayer.
///
/// All sizes are GLOBAL (undivided) model dimensions; the partitioned
/// per-worker sizes are derived at construction time. None of these values
/// can be mutated after the layer is built.
#[derive(Debug, Clone, Deserialize)]
pub struct FfnConfig {
    pub max_batch_size: usize,
    pub max_seq_len: usize,
    pub num_attention_heads: usize,
    pub head_dim: usize,
    /// Number of routed experts; 0 for dense models.
    #[serde(default)]
    pub num_experts: usize,
    /// Global intermediate size, split across the worker group.
    pub intermediate_size: usize,
    /// Global intermediate size padded for kernel alignment.
    pub intermediate_padding_size: usize,
    /// Per-sublayer intermediate sizes; empty means every sublayer uses
    /// `intermediate_size`.
    #[serde(default)]
    pub layer_intermediate_sizes: Vec<usize>,
    #[serde(default)]
    pub layer_intermediate_padding_sizes: Vec<usize>,
    pub hidden_act: String,
    pub layernorm_eps: f64,
    #[serde(default)]
    pub is_sparse: bool,
    #[serde(default)]
    pub int8_mode: i32,
    /// Whether the forward pass reduces partial results across the group.
    /// Off when the caller reduces elsewhere or partitions a non-reduced axis.
    #[serde(default = "default_true")]
    pub do_all_reduce: bool,
    /// Whether the preregistered-buffer reduction path may be attempted.
    #[serde(default)]
    pub enable_custom_all_reduce: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl FfnConfig {
    /// Model hidden size, `heads * head_dim`.
    pub fn hidden_size(&self) -> usize {
        self.num_attention_heads * self.head_dim
    }

    /// Global intermediate size for a given sublayer.
    pub fn intermediate_size_for_layer(&self, layer_id: usize) -> usize {
        self.layer_intermediate_sizes
            .get(layer_id)
            .copied()
            .unwrap_or(self.intermediate_size)
    }
}

impl Default for FfnConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_seq_len: 2048,
            num_attention_heads: 32,
            head_dim: 128,
            num_experts: 0,
            intermediate_size: 11008,
            intermediate_padding_size: 11008,
            layer_intermediate_sizes: Vec::new(),
            layer_intermediate_padding_sizes: Vec::new(),
            hidden_act: "silu".to_string(),
            layernorm_eps: 1e-6,
            is_sparse: false,
            int8_mode: 0,
            do_all_reduce: true,
            enable_custom_all_reduce: false,
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LLAMA_FFN_CONFIG: &str = r#"{
        "max_batch_size": 16,
        "max_seq_len": 4096,
        "num_attention_heads": 32,
        "head_dim": 128,
        "intermediate_size": 11008,
        "intermediate_padding_size": 11264,
        "hidden_act": "silu",
        "layernorm_eps": 1e-06,
        "do_all_reduce": true,
        "enable_custom_all_reduce": true
    }"#;

    #[test]
    fn parses_llama_ffn_config() {
        let cfg: FfnConfig = serde_json::from_str(LLAMA_FFN_CONFIG).unwrap();
        assert_eq!(cfg.hidden_size(), 4096);
        assert_eq!(cfg.intermediate_size, 11008);
        assert_eq!(cfg.intermediate_padding_size, 11264);
        assert!(cfg.do_all_reduce);
        assert!(cfg.enable_custom_all_reduce);
        assert_eq!(cfg.num_experts, 0);
        assert!(cfg.layer_intermediate_sizes.is_empty());
    }

    #[test]
    fn per_layer_sizes_fall_back_to_global() {
        let cfg = FfnConfig {
            layer_intermediate_sizes: vec![1024, 2048],
            ..FfnConfig::default()
        };
        assert_eq!(cfg.intermediate_size_for_layer(1), 2048);
        assert_eq!(cfg.intermediate_size_for_layer(7), cfg.intermediate_size);
    }

    #[test]
    fn default_enables_all_reduce_only() {
        let cfg = FfnConfig::default();
        assert!(cfg.do_all_reduce);
        assert!(!cfg.enable_custom_all_reduce);
    }
}
