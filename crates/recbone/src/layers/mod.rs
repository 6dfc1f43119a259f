//! Common low-level modules for building backbones in Burn.
pub mod blocks;
pub mod pool;
