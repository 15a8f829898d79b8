//! Config-backed cluster topology.
//!
//! Implements the resolution collaborators from the static node, partition
//! and host tables in the agent configuration. System services have a
//! single reserved partition whose replicas are placed deterministically:
//! the nodes are sorted by id, the primary is `hash(service) % nodes` and the
//! next node in order holds the secondary. Every agent with the same node
//! table computes the same placement.

use super::resolver::{ClusterQuery, HostResolver, PartitionResolver};
use super::types::{NodeInstance, ReplicaInfo, ReplicaRole, ResolvedPartition};
use crate::config::ConfigStore;
use crate::error::AgentError;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct ConfiguredTopology {
    config: Arc<ConfigStore>,
}

impl ConfiguredTopology {
    pub fn new(config: Arc<ConfigStore>) -> Arc<Self> {
        Arc::new(Self { config })
    }

    /// All known nodes including the local one, sorted by node id.
    pub fn members(&self) -> Vec<NodeInstance> {
        let config = self.config.current();

        let mut members: Vec<NodeInstance> = config
            .nodes
            .iter()
            .filter(|node| node.node_id != config.node_id)
            .map(|node| NodeInstance::new(node.node_id.clone(), node.instance))
            .collect();
        members.push(NodeInstance::new(config.node_id.clone(), config.node_instance));

        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        members
    }

    /// Primary first, then the secondary (if there is more than one node).
    pub fn owners(&self, key: &str) -> Vec<NodeInstance> {
        let members = self.members();
        if members.is_empty() {
            return vec![];
        }

        let primary_idx = (stable_hash(key) % members.len() as u64) as usize;
        let mut owners = vec![members[primary_idx].clone()];
        if members.len() > 1 {
            owners.push(members[(primary_idx + 1) % members.len()].clone());
        }
        owners
    }
}

#[async_trait]
impl PartitionResolver for ConfiguredTopology {
    async fn resolve_system_service(
        &self,
        service_name: &str,
        _timeout: Duration,
    ) -> Result<ResolvedPartition, AgentError> {
        let mut owners = self.owners(service_name).into_iter();

        Ok(ResolvedPartition {
            primary_location: owners.next().map(|node| node.to_string()),
            secondary_locations: owners.map(|node| node.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ClusterQuery for ConfiguredTopology {
    async fn partition_replicas(
        &self,
        partition_id: Uuid,
        _timeout: Duration,
    ) -> Result<Vec<ReplicaInfo>, AgentError> {
        let config = self.config.current();

        let replicas = config
            .partitions
            .iter()
            .find(|partition| partition.partition_id == partition_id)
            .map(|partition| {
                partition
                    .replicas
                    .iter()
                    .map(|replica| ReplicaInfo {
                        node_id: replica.node_id.clone(),
                        role: if replica.primary {
                            ReplicaRole::Primary
                        } else {
                            ReplicaRole::Secondary
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(replicas)
    }
}

#[async_trait]
impl HostResolver for ConfiguredTopology {
    async fn hosted_process(
        &self,
        node_id: &str,
        _timeout: Duration,
    ) -> Result<Option<u32>, AgentError> {
        let config = self.config.current();

        Ok(config
            .hosts
            .iter()
            .find(|host| host.node_id == node_id)
            .map(|host| host.process_id))
    }

    async fn actor_process(
        &self,
        actor: &str,
        _timeout: Duration,
    ) -> Result<Option<u32>, AgentError> {
        let config = self.config.current();

        Ok(config
            .hosts
            .iter()
            .filter(|host| host.node_id == config.node_id)
            .find(|host| host.actors.iter().any(|served| served == actor))
            .map(|host| host.process_id))
    }
}

/// FNV-1a; identical on every node and toolchain.
fn stable_hash(key: &str) -> u64 {
    key.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::parse_config;

    fn topology(extra: &str) -> Arc<ConfiguredTopology> {
        let raw = format!(
            "node_id = \"node-b\"\nnode_instance = 2\nbind = \"127.0.0.1:7000\"\n{}",
            extra
        );
        ConfiguredTopology::new(ConfigStore::new(parse_config(&raw).unwrap()))
    }

    #[test]
    fn test_owners_are_deterministic() {
        let topology = topology(
            "[[nodes]]\nnode_id = \"node-a\"\ninstance = 1\naddress = \"127.0.0.1:7001\"\n\
             [[nodes]]\nnode_id = \"node-c\"\ninstance = 3\naddress = \"127.0.0.1:7002\"\n",
        );

        let first = topology.owners("fabric:/System/BackupRestoreService");
        let second = topology.owners("fabric:/System/BackupRestoreService");

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let topology = topology("");

        let owners = topology.owners("anything");
        assert_eq!(owners, vec![NodeInstance::new("node-b", 2)]);
    }

    #[test]
    fn test_local_node_listed_once() {
        let topology = topology(
            "[[nodes]]\nnode_id = \"node-b\"\ninstance = 2\naddress = \"127.0.0.1:7000\"\n",
        );

        assert_eq!(topology.members().len(), 1);
    }

    #[test]
    fn test_stable_hash_known_value() {
        // FNV-1a reference values
        assert_eq!(stable_hash(""), 0xcbf29ce484222325);
        assert_eq!(stable_hash("a"), 0xaf63dc4c8601ec8c);
    }

    #[tokio::test]
    async fn test_actor_process_only_matches_local_hosts() {
        let topology = topology(
            "[[hosts]]\nprocess_id = 11\nnode_id = \"node-a\"\nendpoint = \"http://127.0.0.1:7101\"\nactors = [\"BackupRestoreService\"]\n\
             [[hosts]]\nprocess_id = 22\nnode_id = \"node-b\"\nendpoint = \"http://127.0.0.1:7102\"\n\
             [[hosts]]\nprocess_id = 33\nnode_id = \"node-b\"\nendpoint = \"http://127.0.0.1:7103\"\nactors = [\"BackupRestoreService\"]\n",
        );
        let timeout = Duration::from_secs(1);

        assert_eq!(
            topology.actor_process("BackupRestoreService", timeout).await.unwrap(),
            Some(33)
        );
        assert_eq!(
            topology.actor_process("BackupRestoreProxy", timeout).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_partition_has_no_replicas() {
        let topology = topology("");
        let replicas = topology
            .partition_replicas(Uuid::new_v4(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(replicas.is_empty());
    }
}
