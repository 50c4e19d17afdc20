//! Named tensor map, the calling convention at the orchestration boundary.
//!
//! Callers hand the forward pass an input map and an output map keyed by
//! well-known names ([`keys`]). The map preserves insertion order and keeps
//! keys unique; tensor contents are opaque to the map itself.

use candle_core::Tensor;

/// Well-known map keys.
pub mod keys {
    /// Input activations, `[token_count, hidden_size]`.
    pub const FFN_INPUT: &str = "ffn_input";
    /// Output activations, `[token_count, hidden_size]`. Written in place.
    pub const FFN_OUTPUT: &str = "ffn_output";
    /// Scalar sublayer index, u32 on host.
    pub const LAYER_ID: &str = "layer_id";
    /// LoRA adapter ids, opaque to this crate.
    pub const LORA_IDS: &str = "lora_ids";
    /// Per-request input lengths for LoRA batching, opaque to this crate.
    pub const LORA_INPUT_LENGTHS: &str = "lora_input_lengths";
    /// Scalar per-call batch size, u32 on host.
    pub const BATCH_SIZE: &str = "batch_size";
}

/// Insertion-ordered `name -> Tensor` map with unique keys.
#[derive(Debug, Clone, Default)]
pub struct TensorMap {
    entries: Vec<(String, Tensor)>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor under `key`, replacing (in place) any existing entry.
    /// Returns the replaced tensor, if any.
    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, tensor));
        }
        self.entries.push((key, tensor));
        None
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| t)
    }

    pub fn remove(&mut self, key: &str) -> Option<Tensor> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }
}
