//! Message envelope exchanged over both transports.
//!
//! A message is a set of headers plus an opaque JSON body. Only the headers
//! the agent routes on are modelled; bodies are interpreted by whichever
//! component owns the action.

use crate::error::{AgentError, ErrorDetails};

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub mod actions {
    pub const UPLOAD_BACKUP: &str = "UploadBackupAction";
    pub const DOWNLOAD_BACKUP: &str = "DownloadBackupAction";
    /// Forward to the cluster backup/restore service on its primary node.
    pub const FORWARD_TO_BRS: &str = "ForwardToBRSAction";
    /// Forward to the locally hosted backup agent process of a partition.
    pub const FORWARD_TO_BAP: &str = "ForwardToBAPAction";

    pub const REPLY: &str = "Reply";
    pub const FAILURE_REPLY: &str = "FailureReply";
}

pub mod actors {
    pub const BACKUP_AGENT: &str = "BackupAgent";
    pub const BACKUP_RESTORE_SERVICE: &str = "BackupRestoreService";
    pub const BACKUP_RESTORE_PROXY: &str = "BackupRestoreProxy";
}

/// Original actor/action of a message wrapped for forwarding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardingHeader {
    pub actor: String,
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageHeaders {
    pub actor: String,
    pub action: String,
    pub activity_id: Uuid,
    /// Remaining time budget of the caller, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_partition: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardingHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub headers: MessageHeaders,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Message {
    pub fn new(
        actor: &str,
        action: &str,
        activity_id: Uuid,
        body: serde_json::Value,
    ) -> Self {
        Self {
            headers: MessageHeaders {
                actor: actor.to_string(),
                action: action.to_string(),
                activity_id,
                ..MessageHeaders::default()
            },
            body,
        }
    }

    pub fn action(&self) -> &str {
        &self.headers.action
    }

    pub fn activity_id(&self) -> Uuid {
        self.headers.activity_id
    }

    pub fn with_body<T: Serialize>(mut self, body: &T) -> Result<Self, AgentError> {
        self.body =
            serde_json::to_value(body).map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(self)
    }

    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, AgentError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            AgentError::InvalidMessage(format!("cannot decode {} body: {}", self.action(), e))
        })
    }

    /// Wraps this message so it is delivered to `forward_action` first; the
    /// original actor/action travel in the forwarding header.
    pub fn wrap_for_forwarding(mut self, forward_action: &str) -> Self {
        self.headers.forwarding = Some(ForwardingHeader {
            actor: std::mem::take(&mut self.headers.actor),
            action: std::mem::replace(&mut self.headers.action, forward_action.to_string()),
        });
        self.headers.actor = actors::BACKUP_AGENT.to_string();
        self
    }

    /// Restores the original actor/action and drops the forwarding header.
    pub fn unwrap_forwarding(mut self) -> Result<Self, AgentError> {
        let forwarding = self.headers.forwarding.take().ok_or_else(|| {
            AgentError::InvalidMessage(format!(
                "{} message has no forwarding header",
                self.headers.action
            ))
        })?;
        self.headers.actor = forwarding.actor;
        self.headers.action = forwarding.action;
        Ok(self)
    }

    pub fn with_remaining(mut self, budget: &TimeBudget) -> Self {
        self.headers.remaining_timeout_ms = Some(budget.remaining().as_millis() as u64);
        self
    }

    /// Success reply to this request, carrying `body`.
    pub fn reply(&self, body: serde_json::Value) -> Message {
        Message::new(
            &self.headers.actor,
            actions::REPLY,
            self.headers.activity_id,
            body,
        )
    }

    pub fn failure_reply(&self, error: &AgentError) -> Message {
        let body = serde_json::to_value(error.to_details()).unwrap_or(serde_json::Value::Null);
        Message::new(
            &self.headers.actor,
            actions::FAILURE_REPLY,
            self.headers.activity_id,
            body,
        )
    }

    pub fn is_failure_reply(&self) -> bool {
        self.headers.action == actions::FAILURE_REPLY
    }

    /// Turns a failure reply back into the error it carries.
    pub fn into_result(self) -> Result<Message, AgentError> {
        if !self.is_failure_reply() {
            return Ok(self);
        }
        let details: ErrorDetails = serde_json::from_value(self.body).map_err(|e| {
            AgentError::Transport(format!("undecodable failure reply: {}", e))
        })?;
        Err(AgentError::from_details(&details))
    }
}

/// Caller deadline carried across hops.
///
/// Created once from the inbound remaining-timeout header; every outbound
/// hop sends what is left, never a fresh value.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    deadline: Instant,
}

impl TimeBudget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Budget from the message header, or `default` when absent.
    pub fn from_headers(headers: &MessageHeaders, default: Duration) -> Self {
        let timeout = headers
            .remaining_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default);
        Self::new(timeout)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Remaining time, or `Timeout` once the budget is spent.
    pub fn check(&self) -> Result<Duration, AgentError> {
        match self.remaining() {
            remaining if remaining.is_zero() => Err(AgentError::Timeout),
            remaining => Ok(remaining),
        }
    }
}
