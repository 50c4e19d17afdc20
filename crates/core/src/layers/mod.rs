pub mod ffn;

pub use ffn::{DenseFfn, FfnForward, FfnWeightShard};
