//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used by the uplink PHY
//! reference chain and its testbench.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
