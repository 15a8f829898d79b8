//! Agent Configuration
//!
//! TOML-backed configuration with live reload. The copier throttle is the
//! main consumer of change events; everything else reads a snapshot when
//! it needs one.

pub mod store;
pub mod types;

pub use store::ConfigStore;
pub use types::{AgentConfig, CopierConfig, HostEntry, NodeEntry, PartitionEntry, ReplicaEntry};

#[cfg(test)]
mod tests;
