//! Outbound transports.
//!
//! The router only sees the two traits; the HTTP implementations below are
//! what the binary wires in. Delivery retries belong to the transport: a
//! connection failure is retried with backoff while the time budget lasts,
//! an answered request never is.

use super::message::Message;
use super::protocol::{ENDPOINT_IPC_MESSAGE, ENDPOINT_MESSAGE};
use crate::config::ConfigStore;
use crate::error::AgentError;
use crate::routing::types::NodeInstance;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const SEND_ATTEMPTS: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1200;

/// Request/reply over the inter-node transport.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn request(
        &self,
        target: &NodeInstance,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, AgentError>;
}

/// Request/reply to a service process hosted on this node.
#[async_trait]
pub trait IpcTransport: Send + Sync {
    async fn request(
        &self,
        process_id: u32,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, AgentError>;
}

pub struct HttpNodeTransport {
    config: Arc<ConfigStore>,
    http_client: reqwest::Client,
}

impl HttpNodeTransport {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn request(
        &self,
        target: &NodeInstance,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, AgentError> {
        let config = self.config.current();
        let node = config
            .nodes
            .iter()
            .find(|node| node.node_id == target.node_id)
            .ok_or_else(|| AgentError::Transport(format!("unknown node {}", target.node_id)))?;

        if node.instance != target.instance {
            return Err(AgentError::Transport(format!(
                "node {} is at instance {}, not {}",
                target.node_id, node.instance, target.instance
            )));
        }

        let url = format!("http://{}{}", node.address, ENDPOINT_MESSAGE);
        post_message(&self.http_client, url, &message, timeout).await
    }
}

pub struct HttpIpcTransport {
    config: Arc<ConfigStore>,
    http_client: reqwest::Client,
}

impl HttpIpcTransport {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IpcTransport for HttpIpcTransport {
    async fn request(
        &self,
        process_id: u32,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, AgentError> {
        let config = self.config.current();
        let host = config
            .hosts
            .iter()
            .find(|host| host.process_id == process_id)
            .ok_or_else(|| {
                AgentError::Transport(format!("no local endpoint for process {}", process_id))
            })?;

        let url = format!(
            "{}{}",
            host.endpoint.trim_end_matches('/'),
            ENDPOINT_IPC_MESSAGE
        );
        post_message(&self.http_client, url, &message, timeout).await
    }
}

async fn post_message(
    http_client: &reqwest::Client,
    url: String,
    message: &Message,
    timeout: Duration,
) -> Result<Message, AgentError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut delay_ms = INITIAL_BACKOFF_MS;

    for attempt in 0..SEND_ATTEMPTS {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(AgentError::Timeout);
        }

        let response = http_client
            .post(url.clone())
            .json(message)
            .timeout(remaining)
            .send()
            .await;

        match response {
            Ok(resp) => {
                if !resp.status().is_success() {
                    return Err(AgentError::Transport(format!(
                        "{} answered {}",
                        url,
                        resp.status()
                    )));
                }
                return resp
                    .json::<Message>()
                    .await
                    .map_err(|e| AgentError::Transport(format!("bad reply from {}: {}", url, e)));
            }
            Err(e) if e.is_timeout() => return Err(AgentError::Timeout),
            Err(e) if e.is_connect() && attempt + 1 < SEND_ATTEMPTS => {
                tracing::debug!("Connect to {} failed (attempt {}): {}", url, attempt + 1, e);
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(e) => return Err(AgentError::Transport(e.to_string())),
        }
    }

    Err(AgentError::Transport(format!(
        "retry attempts to {} exhausted",
        url
    )))
}
