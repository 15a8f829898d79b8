use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default buffer subtracted from the caller timeout before it is handed
/// to the copier, so the copier can report its own timeout first.
pub const DEFAULT_TIMEOUT_BUFFER_SECS: u64 = 3;

pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;

pub const FALLBACK_CONCURRENT_JOBS: usize = 4;

/// Top-level agent configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Identity of the node this agent runs on.
    pub node_id: String,
    #[serde(default)]
    pub node_instance: u64,
    pub bind: SocketAddr,

    #[serde(default)]
    pub copier: CopierConfig,

    /// Peer nodes reachable over the inter-node transport.
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,

    /// Service processes hosted on this node, reachable over the
    /// intra-process transport.
    #[serde(default)]
    pub hosts: Vec<HostEntry>,

    /// Known partitions and their replica sets.
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopierConfig {
    /// Path of the backup copier executable.
    pub executable: PathBuf,
    /// Parent directory for per-run temp working directories.
    pub work_dir: PathBuf,
    /// Throttle: maximum number of copier processes running at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_timeout_buffer_secs")]
    pub timeout_buffer_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub default_operation_timeout_secs: u64,
}

impl CopierConfig {
    pub fn timeout_buffer(&self) -> Duration {
        Duration::from_secs(self.timeout_buffer_secs)
    }

    pub fn default_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.default_operation_timeout_secs)
    }
}

impl Default for CopierConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("BackupCopier.sh"),
            work_dir: std::env::temp_dir().join("backup-agent"),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            timeout_buffer_secs: DEFAULT_TIMEOUT_BUFFER_SECS,
            default_operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub node_id: String,
    pub instance: u64,
    /// HTTP address of the agent running on that node.
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    pub process_id: u32,
    pub node_id: String,
    /// Local endpoint of the hosted service process, e.g. `http://127.0.0.1:7100`.
    pub endpoint: String,
    /// Actors this process receives messages for, e.g. `BackupRestoreService`.
    #[serde(default)]
    pub actors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionEntry {
    pub partition_id: uuid::Uuid,
    pub replicas: Vec<ReplicaEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaEntry {
    pub node_id: String,
    #[serde(default)]
    pub primary: bool,
}

fn default_max_concurrent_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_CONCURRENT_JOBS)
}

fn default_timeout_buffer_secs() -> u64 {
    DEFAULT_TIMEOUT_BUFFER_SECS
}

fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}
