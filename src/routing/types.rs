use crate::error::AgentError;
use crate::transport::message::{Message, TimeBudget};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A node identity plus the instance (incarnation) of the process on it.
///
/// Textual form is `<node_id>:<instance>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeInstance {
    pub node_id: String,
    pub instance: u64,
}

impl NodeInstance {
    pub fn new(node_id: impl Into<String>, instance: u64) -> Self {
        Self {
            node_id: node_id.into(),
            instance,
        }
    }
}

impl fmt::Display for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.instance)
    }
}

impl FromStr for NodeInstance {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AgentError::DestinationNotFound(format!("invalid node address '{}'", s));

        let (node_id, instance) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if node_id.is_empty() {
            return Err(invalid());
        }
        let instance = instance.parse::<u64>().map_err(|_| invalid())?;

        Ok(Self::new(node_id, instance))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicaRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub node_id: String,
    pub role: ReplicaRole,
}

/// Result of resolving a service partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedPartition {
    /// Address of the primary replica, if one is known.
    pub primary_location: Option<String>,
    #[serde(default)]
    pub secondary_locations: Vec<String>,
}

/// Where a forwarded message ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Node(NodeInstance),
    LocalHost { process_id: u32 },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Node(node) => write!(f, "node {}", node),
            Destination::LocalHost { process_id } => write!(f, "local process {}", process_id),
        }
    }
}

/// State of one forwarding operation.
#[derive(Debug)]
pub struct RoutingContext {
    pub message: Message,
    pub activity_id: Uuid,
    pub budget: TimeBudget,
    pub destination: Option<Destination>,
}

impl RoutingContext {
    pub fn new(message: Message, budget: TimeBudget) -> Self {
        Self {
            activity_id: message.activity_id(),
            message,
            budget,
            destination: None,
        }
    }
}
