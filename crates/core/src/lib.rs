pub mod config;
pub mod distributed;
pub mod layers;
pub mod tensor_map;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
