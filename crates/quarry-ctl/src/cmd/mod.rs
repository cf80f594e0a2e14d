//! CLI command modules.

pub mod allocations;
pub mod http;
pub mod keygen;
pub mod retrieve;
pub mod status;
