use super::resolver::{
    BACKUP_RESTORE_SERVICE_NAME, ClusterQuery, HostResolver, PartitionResolver,
};
use super::types::{Destination, NodeInstance, ReplicaRole, RoutingContext};
use crate::error::AgentError;
use crate::transport::client::{IpcTransport, NodeTransport};
use crate::transport::message::{Message, TimeBudget, actions};

use std::sync::Arc;

/// Forwards messages that cannot be answered by this agent.
///
/// Each forward is resolve-then-send with no retries: a failed resolution
/// becomes `DestinationNotFound`, a transport failure or a remote failure
/// reply is handed back unchanged.
pub struct CrossNodeRouter {
    partitions: Arc<dyn PartitionResolver>,
    cluster: Arc<dyn ClusterQuery>,
    hosts: Arc<dyn HostResolver>,
    node_transport: Arc<dyn NodeTransport>,
    ipc_transport: Arc<dyn IpcTransport>,
}

impl CrossNodeRouter {
    pub fn new(
        partitions: Arc<dyn PartitionResolver>,
        cluster: Arc<dyn ClusterQuery>,
        hosts: Arc<dyn HostResolver>,
        node_transport: Arc<dyn NodeTransport>,
        ipc_transport: Arc<dyn IpcTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            partitions,
            cluster,
            hosts,
            node_transport,
            ipc_transport,
        })
    }

    /// Returns true for the actions [`CrossNodeRouter::route`] accepts.
    pub fn handles(action: &str) -> bool {
        action == actions::FORWARD_TO_BRS || action == actions::FORWARD_TO_BAP
    }

    pub async fn route(&self, message: Message, budget: TimeBudget) -> Result<Message, AgentError> {
        let action = message.action().to_string();
        let ctx = RoutingContext::new(message, budget);

        match action.as_str() {
            actions::FORWARD_TO_BRS => self.forward_to_service(ctx).await,
            actions::FORWARD_TO_BAP => self.forward_to_partition_host(ctx).await,
            other => Err(AgentError::InvalidMessage(format!(
                "action '{}' is not routable",
                other
            ))),
        }
    }

    /// Sends the message to the node holding the primary replica of the
    /// backup/restore service.
    async fn forward_to_service(&self, mut ctx: RoutingContext) -> Result<Message, AgentError> {
        let resolved = self
            .partitions
            .resolve_system_service(BACKUP_RESTORE_SERVICE_NAME, ctx.budget.check()?)
            .await?;

        let location = resolved
            .primary_location
            .filter(|location| !location.trim().is_empty())
            .ok_or_else(|| {
                AgentError::DestinationNotFound(format!(
                    "{} has no primary replica",
                    BACKUP_RESTORE_SERVICE_NAME
                ))
            })?;
        let target: NodeInstance = location.parse()?;

        tracing::debug!("[{}] Forwarding to service primary {}", ctx.activity_id, target);
        ctx.destination = Some(Destination::Node(target.clone()));

        let remaining = ctx.budget.check()?;
        let outbound = ctx.message.unwrap_forwarding()?.with_remaining(&ctx.budget);

        self.node_transport
            .request(&target, outbound, remaining)
            .await?
            .into_result()
    }

    /// Delivers a message addressed to a service actor to the process on
    /// this node serving that actor. This is the receiving side of a
    /// service forward, which arrives here already unwrapped.
    ///
    /// Returns `None` when no local process serves the actor.
    pub async fn deliver_to_actor(
        &self,
        message: Message,
        budget: TimeBudget,
    ) -> Result<Option<Message>, AgentError> {
        let actor = message.headers.actor.clone();

        let Some(process_id) = self.hosts.actor_process(&actor, budget.check()?).await? else {
            return Ok(None);
        };

        tracing::debug!(
            "[{}] Delivering {} for {} to process {}",
            message.activity_id(),
            message.action(),
            actor,
            process_id
        );

        let remaining = budget.check()?;
        let outbound = message.with_remaining(&budget);

        self.ipc_transport
            .request(process_id, outbound, remaining)
            .await?
            .into_result()
            .map(Some)
    }

    /// Sends the message to the service process hosting the primary replica
    /// of the partition named in the target-partition header.
    async fn forward_to_partition_host(
        &self,
        mut ctx: RoutingContext,
    ) -> Result<Message, AgentError> {
        let partition_id = ctx.message.headers.target_partition.ok_or_else(|| {
            AgentError::InvalidMessage(format!(
                "{} message has no target partition header",
                actions::FORWARD_TO_BAP
            ))
        })?;

        let replicas = self
            .cluster
            .partition_replicas(partition_id, ctx.budget.check()?)
            .await?;

        let primary = replicas
            .into_iter()
            .find(|replica| replica.role == ReplicaRole::Primary)
            .ok_or_else(|| {
                AgentError::DestinationNotFound(format!(
                    "partition {} has no primary replica",
                    partition_id
                ))
            })?;

        let process_id = self
            .hosts
            .hosted_process(&primary.node_id, ctx.budget.check()?)
            .await?
            .ok_or_else(|| {
                AgentError::DestinationNotFound(format!(
                    "no service process hosts partition {} on node {}",
                    partition_id, primary.node_id
                ))
            })?;

        tracing::debug!(
            "[{}] Forwarding partition {} to process {}",
            ctx.activity_id,
            partition_id,
            process_id
        );
        ctx.destination = Some(Destination::LocalHost { process_id });

        let remaining = ctx.budget.check()?;
        let outbound = ctx.message.unwrap_forwarding()?.with_remaining(&ctx.budget);

        self.ipc_transport
            .request(process_id, outbound, remaining)
            .await?
            .into_result()
    }
}
