//! HTTP endpoints and DTOs of the agent.

use serde::{Deserialize, Serialize};

/// Inter-node message endpoint.
pub const ENDPOINT_MESSAGE: &str = "/message";
/// Intra-process (same node) message endpoint.
pub const ENDPOINT_IPC_MESSAGE: &str = "/ipc/message";
pub const ENDPOINT_STATUS: &str = "/status";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub node_id: String,
    pub node_instance: u64,
    pub copier_limit: usize,
    pub copiers_in_flight: usize,
    pub live_processes: usize,
    pub copier_enabled: bool,
}
