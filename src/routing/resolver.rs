//! Resolution collaborators used by the router.

use super::types::{ReplicaInfo, ResolvedPartition};
use crate::error::AgentError;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Name of the cluster backup/restore system service.
pub const BACKUP_RESTORE_SERVICE_NAME: &str = "fabric:/System/BackupRestoreService";

/// Resolves service partitions to replica addresses.
#[async_trait]
pub trait PartitionResolver: Send + Sync {
    /// Resolves the single reserved partition of a system service.
    async fn resolve_system_service(
        &self,
        service_name: &str,
        timeout: Duration,
    ) -> Result<ResolvedPartition, AgentError>;
}

/// Cluster queries about partition placement.
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    async fn partition_replicas(
        &self,
        partition_id: Uuid,
        timeout: Duration,
    ) -> Result<Vec<ReplicaInfo>, AgentError>;
}

/// Finds the locally hosted service process serving a node's replicas.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn hosted_process(
        &self,
        node_id: &str,
        timeout: Duration,
    ) -> Result<Option<u32>, AgentError>;

    /// Process on this node that receives messages addressed to `actor`.
    async fn actor_process(
        &self,
        actor: &str,
        timeout: Duration,
    ) -> Result<Option<u32>, AgentError>;
}
